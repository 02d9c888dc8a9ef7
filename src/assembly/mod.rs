//! In-memory assembly model and the read-only store the loader resolves against.
use crate::error::{LoaderError, LoaderResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

pub mod generics;

pub use generics::{
    ConstraintKind, GenericConstraint, GenericDeclaration, GenericDefinition, RefEntry,
    ReferenceKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageMode {
    Global,
    Value,
    Reference,
    Interface,
}

impl StorageMode {
    pub fn is_reference_like(self) -> bool {
        matches!(self, StorageMode::Reference | StorageMode::Interface)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateField {
    pub name: String,
    pub type_ref: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualFunction {
    pub name: String,
    pub implementation: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedReference {
    pub name: String,
    pub reference: usize,
}

/// A type template. Every `usize` reference indexes `generic.refs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeTemplate {
    #[serde(default)]
    pub generic: GenericDeclaration,
    pub storage: StorageMode,
    #[serde(default)]
    pub fields: Vec<TemplateField>,
    #[serde(default)]
    pub base: Option<usize>,
    #[serde(default)]
    pub interfaces: Vec<usize>,
    #[serde(default)]
    pub virtual_functions: Vec<VirtualFunction>,
    #[serde(default)]
    pub public_subtypes: Vec<NamedReference>,
    #[serde(default)]
    pub public_functions: Vec<NamedReference>,
    #[serde(default)]
    pub initializer: Option<usize>,
    #[serde(default)]
    pub finalizer: Option<usize>,
}

impl TypeTemplate {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn subtype(&self, name: &str) -> Option<&NamedReference> {
        self.public_subtypes.iter().find(|s| s.name == name)
    }

    pub fn functions_named<'t>(
        &'t self,
        name: &'t str,
    ) -> impl Iterator<Item = &'t NamedReference> + 't {
        self.public_functions.iter().filter(move |f| f.name == name)
    }

    /// Whether an optional reference slot points at something other than `EMPTY`.
    pub fn has_reference(&self, slot: Option<usize>) -> bool {
        match slot {
            Some(index) => self
                .generic
                .refs
                .get(index)
                .map_or(true, |e| e.kind != ReferenceKind::Empty),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstantReference {
    Local(usize),
    Import(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionTemplate {
    #[serde(default)]
    pub generic: GenericDeclaration,
    #[serde(default)]
    pub return_type: Option<usize>,
    #[serde(default)]
    pub parameters: Vec<usize>,
    #[serde(default)]
    pub locals: Vec<usize>,
    #[serde(default)]
    pub instructions: Vec<u8>,
    #[serde(default)]
    pub constant_table: Vec<ConstantReference>,
    #[serde(default)]
    pub referenced_types: Vec<usize>,
    #[serde(default)]
    pub referenced_functions: Vec<usize>,
    #[serde(default)]
    pub referenced_fields: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitType {
    pub export_name: String,
    pub reference: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitField {
    pub export_name: String,
    pub name: String,
    pub type_ref: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitFunction {
    pub export_name: String,
    pub name: String,
    #[serde(default)]
    pub return_type: Option<usize>,
    #[serde(default)]
    pub parameters: Vec<usize>,
}

/// A trait function with `extra_parameters` generic parameters of its own.
///
/// The extra parameters are addressed as `ARGUMENT` indices past the trait's own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitGenericFunction {
    pub export_name: String,
    pub name: String,
    pub extra_parameters: usize,
    #[serde(default)]
    pub return_type: Option<usize>,
    #[serde(default)]
    pub parameters: Vec<usize>,
}

/// Required members of a trait. Sub-traits are the declaration's own constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitTemplate {
    #[serde(default)]
    pub generic: GenericDeclaration,
    #[serde(default)]
    pub types: Vec<TraitType>,
    #[serde(default)]
    pub fields: Vec<TraitField>,
    #[serde(default)]
    pub functions: Vec<TraitFunction>,
    #[serde(default)]
    pub generic_functions: Vec<TraitGenericFunction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportEntry {
    pub assembly: String,
    pub name: String,
    #[serde(default)]
    pub generic: GenericDefinition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportTarget {
    Local(usize),
    /// Re-export of an entry in the same table kind's import list.
    Import(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportEntry {
    pub name: String,
    pub target: ExportTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportKind {
    Type,
    Function,
    Constant,
    Trait,
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExportKind::Type => "type",
            ExportKind::Function => "function",
            ExportKind::Constant => "constant",
            ExportKind::Trait => "trait",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assembly {
    pub name: String,
    #[serde(default)]
    pub types: Vec<TypeTemplate>,
    #[serde(default)]
    pub functions: Vec<FunctionTemplate>,
    #[serde(default)]
    pub traits: Vec<TraitTemplate>,
    #[serde(default)]
    pub constants: Vec<u64>,
    #[serde(default)]
    pub import_types: Vec<ImportEntry>,
    #[serde(default)]
    pub import_functions: Vec<ImportEntry>,
    #[serde(default)]
    pub import_constants: Vec<ImportEntry>,
    #[serde(default)]
    pub import_traits: Vec<ImportEntry>,
    #[serde(default)]
    pub export_types: Vec<ExportEntry>,
    #[serde(default)]
    pub export_functions: Vec<ExportEntry>,
    #[serde(default)]
    pub export_constants: Vec<ExportEntry>,
    #[serde(default)]
    pub export_traits: Vec<ExportEntry>,
}

impl Assembly {
    pub fn from_json(text: &str) -> LoaderResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| LoaderError::program(format!("malformed assembly: {e}")))
    }

    pub fn to_json(&self) -> LoaderResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| LoaderError::Unknown(e.to_string()))
    }

    pub fn imports(&self, kind: ExportKind) -> &[ImportEntry] {
        match kind {
            ExportKind::Type => &self.import_types,
            ExportKind::Function => &self.import_functions,
            ExportKind::Constant => &self.import_constants,
            ExportKind::Trait => &self.import_traits,
        }
    }

    pub fn exports(&self, kind: ExportKind) -> &[ExportEntry] {
        match kind {
            ExportKind::Type => &self.export_types,
            ExportKind::Function => &self.export_functions,
            ExportKind::Constant => &self.export_constants,
            ExportKind::Trait => &self.export_traits,
        }
    }

    fn local_generic(&self, kind: ExportKind, id: usize) -> Option<&GenericDefinition> {
        match kind {
            ExportKind::Type => self.types.get(id).map(|t| &t.generic.parameters),
            ExportKind::Function => self.functions.get(id).map(|f| &f.generic.parameters),
            ExportKind::Trait => self.traits.get(id).map(|t| &t.generic.parameters),
            ExportKind::Constant => None,
        }
    }

    fn local_count(&self, kind: ExportKind) -> usize {
        match kind {
            ExportKind::Type => self.types.len(),
            ExportKind::Function => self.functions.len(),
            ExportKind::Constant => self.constants.len(),
            ExportKind::Trait => self.traits.len(),
        }
    }
}

/// A template located in a specific assembly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TemplateRef {
    pub assembly: String,
    pub id: usize,
}

impl TemplateRef {
    pub fn new(assembly: impl Into<String>, id: usize) -> Self {
        Self {
            assembly: assembly.into(),
            id,
        }
    }
}

impl fmt::Display for TemplateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.assembly, self.id)
    }
}

#[derive(Debug, Default)]
pub struct AssemblyStore {
    assemblies: HashMap<String, Assembly>,
}

impl AssemblyStore {
    pub fn new(assemblies: impl IntoIterator<Item = Assembly>) -> LoaderResult<Self> {
        let mut map = HashMap::new();
        for assembly in assemblies {
            if map.contains_key(&assembly.name) {
                return Err(LoaderError::program(format!(
                    "duplicate assembly {}",
                    assembly.name
                )));
            }
            map.insert(assembly.name.clone(), assembly);
        }
        Ok(Self { assemblies: map })
    }

    pub fn len(&self) -> usize {
        self.assemblies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assemblies.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.assemblies.contains_key(name)
    }

    pub fn assembly(&self, name: &str) -> LoaderResult<&Assembly> {
        self.assemblies
            .get(name)
            .ok_or_else(|| LoaderError::link(format!("assembly {name} not found")))
    }

    pub fn type_template(&self, assembly: &str, id: usize) -> LoaderResult<&TypeTemplate> {
        self.assembly(assembly)?
            .types
            .get(id)
            .ok_or_else(|| LoaderError::program(format!("type {assembly}#{id} out of range")))
    }

    pub fn function_template(&self, assembly: &str, id: usize) -> LoaderResult<&FunctionTemplate> {
        self.assembly(assembly)?.functions.get(id).ok_or_else(|| {
            LoaderError::program(format!("function {assembly}#{id} out of range"))
        })
    }

    pub fn trait_template(&self, assembly: &str, id: usize) -> LoaderResult<&TraitTemplate> {
        self.assembly(assembly)?
            .traits
            .get(id)
            .ok_or_else(|| LoaderError::program(format!("trait {assembly}#{id} out of range")))
    }

    pub fn constant(&self, assembly: &str, id: usize) -> LoaderResult<u64> {
        self.assembly(assembly)?
            .constants
            .get(id)
            .copied()
            .ok_or_else(|| {
                LoaderError::program(format!("constant {assembly}#{id} out of range"))
            })
    }

    /// Resolves an exported name, following re-export chains across assemblies.
    pub fn find_export(
        &self,
        kind: ExportKind,
        assembly: &str,
        name: &str,
    ) -> LoaderResult<TemplateRef> {
        self.follow_export(kind, assembly, name, None)
    }

    pub fn find_export_type(&self, assembly: &str, name: &str) -> LoaderResult<TemplateRef> {
        self.find_export(ExportKind::Type, assembly, name)
    }

    pub fn find_export_function(&self, assembly: &str, name: &str) -> LoaderResult<TemplateRef> {
        self.find_export(ExportKind::Function, assembly, name)
    }

    pub fn find_export_trait(&self, assembly: &str, name: &str) -> LoaderResult<TemplateRef> {
        self.find_export(ExportKind::Trait, assembly, name)
    }

    pub fn find_export_constant(&self, assembly: &str, name: &str) -> LoaderResult<u64> {
        let found = self.find_export(ExportKind::Constant, assembly, name)?;
        self.constant(&found.assembly, found.id)
    }

    /// Resolves entry `index` of `assembly`'s import table of the given kind.
    pub fn resolve_import(
        &self,
        kind: ExportKind,
        assembly: &str,
        index: usize,
    ) -> LoaderResult<TemplateRef> {
        let entry = self.assembly(assembly)?.imports(kind).get(index).ok_or_else(|| {
            LoaderError::program(format!("{kind} import {assembly}@{index} out of range"))
        })?;
        self.follow_export(kind, &entry.assembly, &entry.name, Some(&entry.generic))
    }

    pub fn resolve_import_constant(&self, assembly: &str, index: usize) -> LoaderResult<u64> {
        let found = self.resolve_import(ExportKind::Constant, assembly, index)?;
        self.constant(&found.assembly, found.id)
    }

    fn follow_export(
        &self,
        kind: ExportKind,
        assembly: &str,
        name: &str,
        expected: Option<&GenericDefinition>,
    ) -> LoaderResult<TemplateRef> {
        let mut visited = HashSet::new();
        let mut current = (assembly.to_string(), name.to_string());
        let mut expected = expected.cloned();
        loop {
            if !visited.insert(current.clone()) {
                return Err(LoaderError::link(format!(
                    "{kind} export {}:{} is re-exported in a cycle",
                    current.0, current.1
                )));
            }
            let source = self.assembly(&current.0)?;
            let entry = source
                .exports(kind)
                .iter()
                .find(|e| e.name == current.1)
                .ok_or_else(|| {
                    LoaderError::link(format!(
                        "{kind} {} not exported by {}",
                        current.1, current.0
                    ))
                })?;
            match entry.target {
                ExportTarget::Local(id) => {
                    if id >= source.local_count(kind) {
                        return Err(LoaderError::program(format!(
                            "{kind} export {} of {} points out of range",
                            current.1, current.0
                        )));
                    }
                    if let (Some(expected), Some(actual)) =
                        (expected.as_ref(), source.local_generic(kind, id))
                    {
                        if !expected.same_shape(actual) {
                            return Err(LoaderError::link(format!(
                                "{kind} {}:{} generic arity mismatch",
                                current.0, current.1
                            )));
                        }
                    }
                    return Ok(TemplateRef::new(current.0, id));
                }
                ExportTarget::Import(index) => {
                    let import = source.imports(kind).get(index).ok_or_else(|| {
                        LoaderError::program(format!(
                            "{kind} re-export {} of {} points out of range",
                            current.1, current.0
                        ))
                    })?;
                    if expected.is_none() {
                        expected = Some(import.generic.clone());
                    }
                    current = (import.assembly.clone(), import.name.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exporting(name: &str, exports: Vec<ExportEntry>, imports: Vec<ImportEntry>) -> Assembly {
        Assembly {
            name: name.to_string(),
            types: vec![TypeTemplate {
                generic: GenericDeclaration {
                    parameters: GenericDefinition::single(1),
                    ..Default::default()
                },
                storage: StorageMode::Value,
                fields: vec![],
                base: None,
                interfaces: vec![],
                virtual_functions: vec![],
                public_subtypes: vec![],
                public_functions: vec![],
                initializer: None,
                finalizer: None,
            }],
            export_types: exports,
            import_types: imports,
            ..Default::default()
        }
    }

    fn import(assembly: &str, name: &str, count: usize) -> ImportEntry {
        ImportEntry {
            assembly: assembly.to_string(),
            name: name.to_string(),
            generic: GenericDefinition::single(count),
        }
    }

    fn export(name: &str, target: ExportTarget) -> ExportEntry {
        ExportEntry {
            name: name.to_string(),
            target,
        }
    }

    #[test]
    fn test_reexport_chain() {
        let a = exporting("A", vec![export("A.List", ExportTarget::Local(0))], vec![]);
        let b = exporting(
            "B",
            vec![export("B.List", ExportTarget::Import(0))],
            vec![import("A", "A.List", 1)],
        );
        let store = AssemblyStore::new([a, b]).unwrap();
        assert_eq!(
            store.find_export_type("B", "B.List").unwrap(),
            TemplateRef::new("A", 0)
        );
        assert_eq!(
            store.resolve_import(ExportKind::Type, "B", 0).unwrap(),
            TemplateRef::new("A", 0)
        );
    }

    #[test]
    fn test_import_arity_mismatch() {
        let a = exporting("A", vec![export("A.List", ExportTarget::Local(0))], vec![]);
        let b = exporting("B", vec![], vec![import("A", "A.List", 2)]);
        let store = AssemblyStore::new([a, b]).unwrap();
        let err = store.resolve_import(ExportKind::Type, "B", 0).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::Link);
    }

    #[test]
    fn test_import_arity_ignores_empty_segments() {
        let mut a = exporting("A", vec![export("A.Int", ExportTarget::Local(0))], vec![]);
        a.types[0].generic.parameters = GenericDefinition::default();
        let b = exporting("B", vec![], vec![import("A", "A.Int", 0)]);
        let store = AssemblyStore::new([a, b]).unwrap();
        assert_eq!(
            store.resolve_import(ExportKind::Type, "B", 0).unwrap(),
            TemplateRef::new("A", 0)
        );
    }

    #[test]
    fn test_reexport_cycle() {
        let a = exporting(
            "A",
            vec![export("X", ExportTarget::Import(0))],
            vec![import("B", "Y", 1)],
        );
        let b = exporting(
            "B",
            vec![export("Y", ExportTarget::Import(0))],
            vec![import("A", "X", 1)],
        );
        let store = AssemblyStore::new([a, b]).unwrap();
        let err = store.find_export_type("A", "X").unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::Link);
    }

    #[test]
    fn test_missing_export_and_duplicates() {
        let a = exporting("A", vec![], vec![]);
        let store = AssemblyStore::new([a.clone()]).unwrap();
        assert!(matches!(
            store.find_export_type("A", "Nope"),
            Err(LoaderError::Link(_))
        ));
        assert!(matches!(
            AssemblyStore::new([a.clone(), a]),
            Err(LoaderError::Program(_))
        ));
    }

    #[test]
    fn test_json_round_trip_defaults() {
        let text = r#"{
            "name": "Core",
            "types": [{ "storage": "VALUE" }],
            "export_types": [{ "name": "Core.Int32", "target": { "local": 0 } }]
        }"#;
        let assembly = Assembly::from_json(text).unwrap();
        assert_eq!(assembly.types[0].storage, StorageMode::Value);
        assert!(assembly.types[0].generic.parameters.is_empty());
        assert_eq!(
            assembly.export_types[0].target,
            ExportTarget::Local(0)
        );
        assert!(Assembly::from_json("{").is_err());
    }
}
