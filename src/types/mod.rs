use crate::assembly::TemplateRef;
use serde::Serialize;
use std::fmt;

pub mod layout;
pub mod runtime;

pub use layout::{FieldLayoutManager, HasLayout, LayoutManager, NativeLayout, PointerLayout};
pub use runtime::{
    ConstraintExportList, ExportValue, FieldHandle, InterfaceEntry, LoadingStage, NativeBinding,
    NativeCall, NativeFunction, RuntimeField, RuntimeFunction, RuntimeType, VirtualSlot,
};

/// Stable handle of a loaded type. Never reused for the loader's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TypeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FunctionId(pub usize);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// Identity of one instantiation: template plus segmented generic arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LoadingArguments {
    pub assembly: String,
    pub id: usize,
    pub arguments: Vec<Vec<TypeId>>,
}

impl LoadingArguments {
    pub fn new(assembly: impl Into<String>, id: usize, arguments: Vec<Vec<TypeId>>) -> Self {
        Self {
            assembly: assembly.into(),
            id,
            arguments,
        }
    }

    pub fn non_generic(assembly: impl Into<String>, id: usize) -> Self {
        Self::new(assembly, id, vec![])
    }

    pub fn template(&self) -> TemplateRef {
        TemplateRef::new(self.assembly.clone(), self.id)
    }

    pub fn is_template(&self, template: &TemplateRef) -> bool {
        self.id == template.id && self.assembly == template.assembly
    }

    pub fn flat_arguments(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.arguments.iter().flatten().copied()
    }
}

impl fmt::Display for LoadingArguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.assembly, self.id)?;
        if !self.arguments.is_empty() {
            let segments: Vec<String> = self
                .arguments
                .iter()
                .map(|s| {
                    s.iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .collect();
            write!(f, "<{}>", segments.join("; "))?;
        }
        Ok(())
    }
}
