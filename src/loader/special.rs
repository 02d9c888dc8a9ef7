use crate::{
    assembly::{AssemblyStore, StorageMode, TemplateRef},
    config::LoaderConfig,
    error::{LoaderError, LoaderResult},
    types::LoadingArguments,
};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialKind {
    Pointer,
    Box,
    Reference,
    Embed,
}

impl SpecialKind {
    const ALL: [SpecialKind; 4] = [
        SpecialKind::Pointer,
        SpecialKind::Box,
        SpecialKind::Reference,
        SpecialKind::Embed,
    ];

    fn storage(self) -> StorageMode {
        match self {
            SpecialKind::Box => StorageMode::Reference,
            _ => StorageMode::Value,
        }
    }

    fn export_name(self, config: &LoaderConfig) -> &str {
        match self {
            SpecialKind::Pointer => &config.pointer_type,
            SpecialKind::Box => &config.box_type,
            SpecialKind::Reference => &config.reference_type,
            SpecialKind::Embed => &config.embed_type,
        }
    }
}

/// Templates that cooperate with native code, identified once per loader.
#[derive(Debug, Clone, Default)]
pub struct SpecialTypes {
    templates: Vec<(SpecialKind, TemplateRef)>,
}

impl SpecialTypes {
    pub fn identify(store: &AssemblyStore, config: &LoaderConfig) -> LoaderResult<Self> {
        let mut templates = vec![];
        if !store.contains(&config.core_assembly) {
            return Ok(Self { templates });
        }
        for kind in SpecialKind::ALL {
            let name = kind.export_name(config);
            let Ok(found) = store.find_export_type(&config.core_assembly, name) else {
                continue;
            };
            let template = store.type_template(&found.assembly, found.id)?;
            let params = &template.generic.parameters;
            if params.variadic || params.counts != [1] || template.storage != kind.storage() {
                return Err(LoaderError::program(format!(
                    "{name} must take one generic parameter and use {:?} storage",
                    kind.storage()
                )));
            }
            debug!("special type {:?} is {}", kind, found);
            templates.push((kind, found));
        }
        Ok(Self { templates })
    }

    pub fn kind_of(&self, args: &LoadingArguments) -> Option<SpecialKind> {
        self.templates
            .iter()
            .find(|(_, t)| args.is_template(t))
            .map(|(k, _)| *k)
    }

    pub fn template(&self, kind: SpecialKind) -> Option<&TemplateRef> {
        self.templates
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, t)| t)
    }
}
