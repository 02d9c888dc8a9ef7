#![allow(dead_code)]

use runtime_loader::{
    assembly::{
        Assembly, AssemblyStore, ExportEntry, ExportTarget, FunctionTemplate, GenericConstraint,
        GenericDeclaration, GenericDefinition, ImportEntry, NamedReference, RefEntry,
        ReferenceKind, StorageMode, TemplateField, TraitTemplate, TypeTemplate,
    },
    types::NativeCall,
    Loader, LoaderConfig,
};

pub use runtime_loader::assembly::{ConstraintKind, ReferenceKind as K};

pub const E: RefEntry = RefEntry::EMPTY;

pub fn r(kind: ReferenceKind, index: usize) -> RefEntry {
    RefEntry::new(kind, index)
}

/// `[ASSEMBLY id, EMPTY]`: a non-generic local reference.
pub fn local(id: usize) -> Vec<RefEntry> {
    vec![r(K::Assembly, id), E]
}

pub fn decl(counts: &[usize], refs: Vec<RefEntry>) -> GenericDeclaration {
    GenericDeclaration {
        parameters: GenericDefinition::new(counts.to_vec()),
        refs,
        ..Default::default()
    }
}

pub fn constraint(
    kind: ConstraintKind,
    index: usize,
    target: usize,
    arguments: &[usize],
    export_name: &str,
) -> GenericConstraint {
    GenericConstraint {
        kind,
        index,
        target,
        arguments: arguments.to_vec(),
        export_name: export_name.to_string(),
    }
}

pub fn type_template(storage: StorageMode, generic: GenericDeclaration) -> TypeTemplate {
    TypeTemplate {
        generic,
        storage,
        fields: vec![],
        base: None,
        interfaces: vec![],
        virtual_functions: vec![],
        public_subtypes: vec![],
        public_functions: vec![],
        initializer: None,
        finalizer: None,
    }
}

pub fn value(generic: GenericDeclaration) -> TypeTemplate {
    type_template(StorageMode::Value, generic)
}

pub fn reference(generic: GenericDeclaration) -> TypeTemplate {
    type_template(StorageMode::Reference, generic)
}

pub fn fields(names: &[(&str, usize)]) -> Vec<TemplateField> {
    names
        .iter()
        .map(|(name, type_ref)| TemplateField {
            name: name.to_string(),
            type_ref: *type_ref,
        })
        .collect()
}

pub fn named(name: &str, reference: usize) -> NamedReference {
    NamedReference {
        name: name.to_string(),
        reference,
    }
}

pub fn function(
    generic: GenericDeclaration,
    return_type: Option<usize>,
    parameters: &[usize],
) -> FunctionTemplate {
    FunctionTemplate {
        generic,
        return_type,
        parameters: parameters.to_vec(),
        ..Default::default()
    }
}

/// Builds an assembly whose templates are all exported as `"<assembly>.<name>"`.
pub struct AssemblyBuilder {
    assembly: Assembly,
}

impl AssemblyBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            assembly: Assembly {
                name: name.to_string(),
                ..Default::default()
            },
        }
    }

    fn export(&self, name: &str, id: usize) -> ExportEntry {
        ExportEntry {
            name: format!("{}.{name}", self.assembly.name),
            target: ExportTarget::Local(id),
        }
    }

    pub fn add_type(&mut self, name: &str, template: TypeTemplate) -> usize {
        let id = self.assembly.types.len();
        self.assembly.types.push(template);
        let export = self.export(name, id);
        self.assembly.export_types.push(export);
        id
    }

    pub fn add_function(&mut self, name: &str, template: FunctionTemplate) -> usize {
        let id = self.assembly.functions.len();
        self.assembly.functions.push(template);
        let export = self.export(name, id);
        self.assembly.export_functions.push(export);
        id
    }

    pub fn add_trait(&mut self, name: &str, template: TraitTemplate) -> usize {
        let id = self.assembly.traits.len();
        self.assembly.traits.push(template);
        let export = self.export(name, id);
        self.assembly.export_traits.push(export);
        id
    }

    pub fn import_type(&mut self, assembly: &str, name: &str, counts: &[usize]) -> usize {
        self.assembly.import_types.push(ImportEntry {
            assembly: assembly.to_string(),
            name: name.to_string(),
            generic: GenericDefinition::new(counts.to_vec()),
        });
        self.assembly.import_types.len() - 1
    }

    pub fn build(self) -> Assembly {
        self.assembly
    }
}

pub mod core_ids {
    pub const POINTER: usize = 0;
    pub const BOX: usize = 1;
    pub const REFERENCE: usize = 2;
    pub const EMBED: usize = 3;
    pub const INT8: usize = 4;
    pub const INT32: usize = 5;
    pub const INT64: usize = 6;
    pub const ADD_INT32: usize = 0;
}

/// The core assembly: the four companion templates, three integer value types
/// meant to be registered as native, and a native `AddInt32`.
pub fn core() -> Assembly {
    let mut core = AssemblyBuilder::new("Core");
    let one = || decl(&[1], vec![]);
    core.add_type("Pointer", value(one()));
    core.add_type("Box", reference(one()));
    core.add_type("Reference", value(one()));
    core.add_type("Embed", value(one()));
    core.add_type("Int8", value(decl(&[], vec![])));
    core.add_type("Int32", value(decl(&[], vec![])));
    core.add_type("Int64", value(decl(&[], vec![])));
    core.add_function(
        "AddInt32",
        function(decl(&[], local(core_ids::INT32)), Some(0), &[0, 0]),
    );
    core.build()
}

pub fn loader_with(assemblies: Vec<Assembly>, config: LoaderConfig) -> Loader {
    let store = AssemblyStore::new(assemblies).expect("valid assembly store");
    Loader::new(store, config).expect("valid special types")
}

pub fn loader(assemblies: Vec<Assembly>) -> Loader {
    loader_with(assemblies, LoaderConfig::default())
}

/// Registers the core integers with their usual sizes.
pub fn register_integers(loader: &Loader) {
    loader.add_native_type("Core", "Core.Int8", 1, 1).expect("Int8");
    loader.add_native_type("Core", "Core.Int32", 4, 4).expect("Int32");
    loader.add_native_type("Core", "Core.Int64", 8, 8).expect("Int64");
}

pub fn add_int32(call: &mut NativeCall<'_>) {
    let read = |b: &[u8]| i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
    let sum = read(call.arguments[0]) + read(call.arguments[1]);
    call.result.copy_from_slice(&sum.to_le_bytes());
}
