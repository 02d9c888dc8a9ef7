use crate::{
    assembly::{StorageMode, TemplateRef},
    types::{
        layout::{FieldLayoutManager, HasLayout, LayoutManager},
        FunctionId, LoadingArguments, TypeId,
    },
};
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoadingStage {
    Constraints,
    Layout,
    PostLoading,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldHandle {
    pub owner: TypeId,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportValue {
    /// `None` for a constraint target that resolved to explicitly empty.
    Type(Option<TypeId>),
    Function(FunctionId),
    Field(FieldHandle),
    GenericFunction(TemplateRef),
}

/// Named values produced by the constraints of one declaration, in check order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstraintExportList {
    entries: Vec<(String, ExportValue)>,
}

impl ConstraintExportList {
    pub fn get(&self, name: &str) -> Option<&ExportValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn push(&mut self, name: impl Into<String>, value: ExportValue) {
        self.entries.push((name.into(), value));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExportValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeField {
    pub name: String,
    pub field_type: TypeId,
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualSlot {
    pub name: String,
    pub function: FunctionId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceEntry {
    pub interface: TypeId,
    pub virtual_table: Vec<VirtualSlot>,
}

pub struct RuntimeType {
    pub id: TypeId,
    pub args: LoadingArguments,
    pub storage: StorageMode,
    pub stage: LoadingStage,
    pub(crate) layout: Option<LayoutManager>,
    /// Pointee layout of reference-like types.
    pub(crate) body: Option<FieldLayoutManager>,
    pub fields: Vec<RuntimeField>,
    pub base_type: Option<TypeId>,
    pub virtual_table: Vec<VirtualSlot>,
    pub interfaces: Vec<InterfaceEntry>,
    pub initializer: Option<FunctionId>,
    pub finalizer: Option<FunctionId>,
    pub exports: Arc<ConstraintExportList>,
    pub(crate) pointer_type: OnceLock<TypeId>,
    pub(crate) box_type: OnceLock<TypeId>,
    pub(crate) reference_type: OnceLock<TypeId>,
    pub(crate) embed_type: OnceLock<TypeId>,
}

impl std::fmt::Debug for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeType")
            .field("id", &self.id)
            .field("args", &self.args)
            .field("storage", &self.storage)
            .field("size", &self.size())
            .field("alignment", &self.alignment())
            .finish_non_exhaustive()
    }
}

impl RuntimeType {
    pub(crate) fn new(id: TypeId, args: LoadingArguments, storage: StorageMode) -> Self {
        Self {
            id,
            args,
            storage,
            stage: LoadingStage::Constraints,
            layout: None,
            body: None,
            fields: vec![],
            base_type: None,
            virtual_table: vec![],
            interfaces: vec![],
            initializer: None,
            finalizer: None,
            exports: Arc::default(),
            pointer_type: OnceLock::new(),
            box_type: OnceLock::new(),
            reference_type: OnceLock::new(),
            embed_type: OnceLock::new(),
        }
    }

    /// Storage layout; pointer-sized for reference-like types.
    pub fn layout(&self) -> Option<&LayoutManager> {
        self.layout.as_ref()
    }

    pub fn body(&self) -> Option<&FieldLayoutManager> {
        self.body.as_ref()
    }

    pub fn size(&self) -> usize {
        self.layout.as_ref().map_or(0, |l| l.size())
    }

    pub fn alignment(&self) -> usize {
        self.layout.as_ref().map_or(0, |l| l.alignment())
    }

    pub fn is_value(&self) -> bool {
        self.storage == StorageMode::Value
    }

    pub fn is_reference(&self) -> bool {
        self.storage == StorageMode::Reference
    }

    pub fn is_interface(&self) -> bool {
        self.storage == StorageMode::Interface
    }

    pub fn field(&self, name: &str) -> Option<&RuntimeField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn virtual_slot(&self, name: &str) -> Option<&VirtualSlot> {
        self.virtual_table.iter().find(|s| s.name == name)
    }

    pub fn interface(&self, interface: TypeId) -> Option<&InterfaceEntry> {
        self.interfaces.iter().find(|i| i.interface == interface)
    }

    pub fn pointer_type(&self) -> Option<TypeId> {
        self.pointer_type.get().copied()
    }

    pub fn box_type(&self) -> Option<TypeId> {
        self.box_type.get().copied()
    }

    pub fn reference_type(&self) -> Option<TypeId> {
        self.reference_type.get().copied()
    }

    pub fn embed_type(&self) -> Option<TypeId> {
        self.embed_type.get().copied()
    }
}

/// Calling contract handed to a native function by the interpreter.
pub struct NativeCall<'a> {
    pub user_data: usize,
    pub arguments: &'a [&'a [u8]],
    pub result: &'a mut [u8],
}

pub type NativeFunction = fn(&mut NativeCall<'_>);

#[derive(Clone, Copy)]
pub struct NativeBinding {
    pub function: NativeFunction,
    pub user_data: usize,
}

impl std::fmt::Debug for NativeBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NativeBinding({:#x})", self.user_data)
    }
}

#[derive(Debug)]
pub struct RuntimeFunction {
    pub id: FunctionId,
    pub args: LoadingArguments,
    pub stage: LoadingStage,
    /// `None` for void.
    pub return_type: Option<TypeId>,
    pub parameters: Vec<TypeId>,
    pub locals: Vec<TypeId>,
    /// Bytecode shared by every instantiation of the template.
    pub code: Option<Arc<[u8]>>,
    pub native: Option<NativeBinding>,
    pub constants: Vec<u64>,
    pub referenced_types: Vec<Option<TypeId>>,
    pub referenced_functions: Vec<Option<FunctionId>>,
    pub referenced_fields: Vec<FieldHandle>,
    pub exports: Arc<ConstraintExportList>,
}

impl RuntimeFunction {
    pub(crate) fn new(id: FunctionId, args: LoadingArguments) -> Self {
        Self {
            id,
            args,
            stage: LoadingStage::Constraints,
            return_type: None,
            parameters: vec![],
            locals: vec![],
            code: None,
            native: None,
            constants: vec![],
            referenced_types: vec![],
            referenced_functions: vec![],
            referenced_fields: vec![],
            exports: Arc::default(),
        }
    }

    pub fn is_native(&self) -> bool {
        self.code.is_none()
    }

    /// Signature used for virtual slot matching: return type and parameters
    /// after the receiver.
    pub fn slot_signature(&self) -> (Option<TypeId>, &[TypeId]) {
        let params = self.parameters.get(1..).unwrap_or(&[]);
        (self.return_type, params)
    }

    /// Invokes the bound native implementation. Returns `false` when unbound.
    pub fn invoke_native(&self, arguments: &[&[u8]], result: &mut [u8]) -> bool {
        match self.native {
            Some(binding) => {
                let mut call = NativeCall {
                    user_data: binding.user_data,
                    arguments,
                    result,
                };
                (binding.function)(&mut call);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_u32(call: &mut NativeCall<'_>) {
        let read = |b: &[u8]| u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        let sum = read(call.arguments[0]) + read(call.arguments[1]) + call.user_data as u32;
        call.result.copy_from_slice(&sum.to_le_bytes());
    }

    #[test]
    fn test_export_list() {
        let mut list = ConstraintExportList::default();
        list.push("Tr", ExportValue::Type(Some(TypeId(1))));
        list.push("Tr/Item", ExportValue::Type(None));
        assert_eq!(list.get("Tr/Item"), Some(&ExportValue::Type(None)));
        assert!(!list.contains("Tr/Other"));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_invoke_native() {
        let mut function = RuntimeFunction::new(FunctionId(0), LoadingArguments::non_generic("A", 0));
        let mut out = [0u8; 4];
        assert!(!function.invoke_native(&[], &mut out));
        function.native = Some(NativeBinding {
            function: add_u32,
            user_data: 1,
        });
        let (a, b) = (2u32.to_le_bytes(), 3u32.to_le_bytes());
        assert!(function.invoke_native(&[&a, &b], &mut out));
        assert_eq!(u32::from_le_bytes(out), 6);
    }

    #[test]
    fn test_slot_signature_skips_receiver() {
        let mut function = RuntimeFunction::new(FunctionId(0), LoadingArguments::non_generic("A", 0));
        function.parameters = vec![TypeId(1), TypeId(2)];
        assert_eq!(function.slot_signature(), (None, &[TypeId(2)][..]));
        function.parameters.clear();
        assert_eq!(function.slot_signature().1.len(), 0);
    }
}
