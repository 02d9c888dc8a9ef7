//! Type instantiation: constraint check, layout, reference bodies and linking.
use crate::{
    assembly::{StorageMode, TypeTemplate},
    error::{LoaderError, LoaderResult},
    loader::{
        reflist::RefBinding,
        session::{LoadingSession, LoadingStack, PostLoading},
        special::SpecialKind,
    },
    types::{
        FieldLayoutManager, FunctionId, HasLayout, InterfaceEntry, LayoutManager, LoadingArguments,
        LoadingStage, PointerLayout, RuntimeField, RuntimeType, TypeId, VirtualSlot,
    },
};
use std::sync::Arc;
use tracing::trace;

/// Checks the template rules that do not depend on generic arguments.
pub(crate) fn validate_type_template(
    template: &TypeTemplate,
    args: &LoadingArguments,
) -> LoaderResult<()> {
    let has_base = template.has_reference(template.base);
    let problem = match template.storage {
        StorageMode::Interface if !template.fields.is_empty() => Some("interface declares fields"),
        StorageMode::Interface if has_base => Some("interface declares a base type"),
        StorageMode::Value | StorageMode::Global if !template.virtual_functions.is_empty() => {
            Some("value type declares virtual functions")
        }
        StorageMode::Value | StorageMode::Global if has_base => {
            Some("value type declares a base type")
        }
        _ => None,
    };
    let problem = problem.or_else(|| {
        if template.storage != StorageMode::Global && template.has_reference(template.initializer) {
            Some("initializer on a non-global type")
        } else if matches!(template.storage, StorageMode::Value | StorageMode::Interface)
            && template.has_reference(template.finalizer)
        {
            Some("finalizer on a value or interface type")
        } else {
            None
        }
    });
    match problem {
        Some(problem) => Err(LoaderError::program(format!("{args}: {problem}"))),
        None => Ok(()),
    }
}

fn runtime_fields(
    layout: &FieldLayoutManager,
    skip: usize,
    typed: Vec<(String, TypeId)>,
) -> Vec<RuntimeField> {
    typed
        .into_iter()
        .zip(layout.fields.iter().skip(skip))
        .map(|((name, field_type), field)| RuntimeField {
            name,
            field_type,
            offset: field.position,
            length: field.size,
        })
        .collect()
}

impl<'a> LoadingSession<'a> {
    pub(crate) fn load_type(&mut self, args: LoadingArguments) -> LoaderResult<TypeId> {
        if let Some(id) = self.find_type(&args) {
            return Ok(id);
        }
        let store = self.store;
        let template = store.type_template(&args.assembly, args.id)?;
        if !template.generic.parameters.accepts(&args.arguments) {
            return Err(LoaderError::generic(format!(
                "{args} has the wrong number of generic arguments"
            )));
        }
        validate_type_template(template, &args)?;
        if let Some(kind) = self.special.kind_of(&args) {
            self.check_special_argument(kind, &args)?;
        }

        let id = self.stage_type(|id| RuntimeType::new(id, args.clone(), template.storage))?;
        let exports = self
            .check_declaration(&args.assembly, &template.generic, &args.arguments, Some(id))?
            .ok_or_else(|| {
                LoaderError::generic(format!("{args} does not satisfy its constraints"))
            })?;
        let pointer_size = self.config.pointer_size;
        let object = self.ty_mut(id)?;
        object.exports = Arc::new(exports);
        object.stage = object.stage.max(LoadingStage::Layout);

        if template.storage.is_reference_like() {
            object.layout = Some(PointerLayout { size: pointer_size }.into());
            self.body_queue.push_back(id);
        } else {
            self.ensure_layout(id)?;
        }
        self.post_queue.push_back(PostLoading::Type(id));
        Ok(id)
    }

    fn check_special_argument(&self, kind: SpecialKind, args: &LoadingArguments) -> LoaderResult<()> {
        let required = match kind {
            SpecialKind::Box => StorageMode::Value,
            SpecialKind::Embed => StorageMode::Reference,
            _ => return Ok(()),
        };
        let argument = args.flat_arguments().next().ok_or_else(|| {
            LoaderError::generic(format!("{args} requires a generic argument"))
        })?;
        let storage = self.ty(argument)?.storage;
        if storage != required {
            return Err(LoaderError::generic(format!(
                "{args} requires a {required:?} argument, got {storage:?}"
            )));
        }
        Ok(())
    }

    /// Storage footprint of a field of type `id`.
    fn field_footprint(&mut self, id: TypeId) -> LoaderResult<(usize, usize)> {
        if self.ty(id)?.storage.is_reference_like() {
            let size = self.config.pointer_size;
            return Ok((size, size));
        }
        self.ensure_layout(id)?;
        let object = self.ty(id)?;
        Ok((object.size(), object.alignment()))
    }

    pub(crate) fn ensure_layout(&mut self, id: TypeId) -> LoaderResult<()> {
        let object = self.ty(id)?;
        if object.layout.is_some() {
            return Ok(());
        }
        if object.storage.is_reference_like() {
            let size = self.config.pointer_size;
            self.ty_mut(id)?.layout = Some(PointerLayout { size }.into());
            return Ok(());
        }
        self.scoped(LoadingStack::Layout, id, |s| s.compute_value_layout(id))
    }

    fn compute_value_layout(&mut self, id: TypeId) -> LoaderResult<()> {
        let args = self.ty(id)?.args.clone();
        let store = self.store;
        let template = store.type_template(&args.assembly, args.id)?;
        let (layout, fields): (LayoutManager, _) = if let Some(native) =
            self.native_layout(&args.template())
        {
            (native.into(), vec![])
        } else {
            match self.special.kind_of(&args) {
                Some(SpecialKind::Pointer) | Some(SpecialKind::Reference) => {
                    let size = self.config.pointer_size;
                    (PointerLayout { size }.into(), vec![])
                }
                Some(SpecialKind::Embed) => {
                    let target = args.flat_arguments().next().ok_or_else(|| {
                        LoaderError::generic(format!("{args} requires a generic argument"))
                    })?;
                    self.ensure_body(target)?;
                    let target = self.ty(target)?;
                    let body = target.body.clone().unwrap_or_default();
                    (body.into(), target.fields.clone())
                }
                _ => {
                    let binding = RefBinding::for_type(self, id)?;
                    let (footprints, typed) = self.field_types(&binding, template, &args)?;
                    let layout = FieldLayoutManager::new(footprints);
                    let fields = runtime_fields(&layout, 0, typed);
                    (layout.into(), fields)
                }
            }
        };
        trace!("{} laid out: size {}, alignment {}", args, layout.size(), layout.alignment());
        let object = self.ty_mut(id)?;
        object.layout = Some(layout);
        object.fields = fields;
        object.stage = object.stage.max(LoadingStage::PostLoading);
        self.record_layout(id);
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    fn field_types(
        &mut self,
        binding: &RefBinding<'a>,
        template: &TypeTemplate,
        args: &LoadingArguments,
    ) -> LoaderResult<(Vec<(usize, usize)>, Vec<(String, TypeId)>)> {
        let mut footprints = Vec::with_capacity(template.fields.len());
        let mut typed = Vec::with_capacity(template.fields.len());
        for field in &template.fields {
            let field_type = self.evaluate_type(binding, field.type_ref)?.ok_or_else(|| {
                LoaderError::program(format!("field {} of {args} has no type", field.name))
            })?;
            footprints.push(self.field_footprint(field_type)?);
            typed.push((field.name.clone(), field_type));
        }
        Ok((footprints, typed))
    }

    /// Computes the pointee layout of a reference-like type, base bodies first.
    pub(crate) fn ensure_body(&mut self, id: TypeId) -> LoaderResult<()> {
        let object = self.ty(id)?;
        if object.body.is_some() || !object.storage.is_reference_like() {
            return Ok(());
        }
        self.scoped(LoadingStack::Body, id, |s| s.compute_body(id))
    }

    fn compute_body(&mut self, id: TypeId) -> LoaderResult<()> {
        let args = self.ty(id)?.args.clone();
        let store = self.store;
        let template = store.type_template(&args.assembly, args.id)?;
        let binding = RefBinding::for_type(self, id)?;

        let base = match template.base {
            Some(base) => self.evaluate_type(&binding, base)?,
            None => None,
        };
        let (start, mut fields) = match base {
            Some(base) => {
                if self.ty(base)?.storage != StorageMode::Reference {
                    return Err(LoaderError::program(format!(
                        "base type of {args} is not a reference type"
                    )));
                }
                self.ensure_body(base)?;
                let base = self.ty(base)?;
                (base.body.clone().unwrap_or_default(), base.fields.clone())
            }
            None => (FieldLayoutManager::default(), vec![]),
        };
        let (footprints, typed) = self.field_types(&binding, template, &args)?;
        let body = start.extend(footprints);
        fields.extend(runtime_fields(&body, start.fields.len(), typed));
        trace!("{} body: size {}", args, body.size());

        let object = self.ty_mut(id)?;
        object.body = Some(body);
        object.fields = fields;
        object.base_type = base;
        object.stage = object.stage.max(LoadingStage::PostLoading);
        self.record_body(id);
        Ok(())
    }

    /// Base type of a loaded type, evaluated from its template when the body is pending.
    pub(crate) fn base_of(&mut self, id: TypeId) -> LoaderResult<Option<TypeId>> {
        let object = self.ty(id)?;
        if object.body.is_some() {
            return Ok(object.base_type);
        }
        let store = self.store;
        let template = store.type_template(&object.args.assembly, object.args.id)?;
        match template.base {
            Some(base) => {
                let binding = RefBinding::for_type(self, id)?;
                self.evaluate_type(&binding, base)
            }
            None => Ok(None),
        }
    }

    /// Interfaces a type implements, transitively, without linking it.
    ///
    /// Value types report the set their boxed form implements; `Box<V>` reports `V`'s.
    pub(crate) fn interface_set(&mut self, id: TypeId) -> LoaderResult<Vec<TypeId>> {
        self.scoped(LoadingStack::Interfaces, id, |s| {
            let object = s.ty(id)?;
            let args = object.args.clone();
            if s.special.kind_of(&args) == Some(SpecialKind::Box) {
                if let Some(inner) = args.flat_arguments().next() {
                    return s.interface_set(inner);
                }
            }
            let store = s.store;
            let template = store.type_template(&args.assembly, args.id)?;
            let mut set = vec![];
            if let Some(base) = s.base_of(id)? {
                set.extend(s.interface_set(base)?);
            }
            let binding = RefBinding::for_type(s, id)?;
            for reference in &template.interfaces {
                let interface = s.evaluate_type(&binding, *reference)?.ok_or_else(|| {
                    LoaderError::program(format!("empty interface in {args}"))
                })?;
                if s.ty(interface)?.storage != StorageMode::Interface {
                    return Err(LoaderError::program(format!(
                        "{args} lists a non-interface type as an interface"
                    )));
                }
                for inherited in std::iter::once(interface).chain(s.interface_set(interface)?) {
                    if !set.contains(&inherited) {
                        set.push(inherited);
                    }
                }
            }
            Ok(set)
        })
    }

    pub(crate) fn link_type(&mut self, id: TypeId) -> LoaderResult<()> {
        if self.stage_of(id)? == LoadingStage::Finished {
            return Ok(());
        }
        self.ensure_layout(id)?;
        self.ensure_body(id)?;
        self.scoped(LoadingStack::Link, id, |s| s.compute_link(id))
    }

    fn compute_link(&mut self, id: TypeId) -> LoaderResult<()> {
        let object = self.ty(id)?;
        let args = object.args.clone();
        let storage = object.storage;
        let base = object.base_type;
        let store = self.store;
        let template = store.type_template(&args.assembly, args.id)?;
        let binding = RefBinding::for_type(self, id)?;

        let mut table = match base {
            Some(base) => {
                self.link_type(base)?;
                self.ty(base)?.virtual_table.clone()
            }
            None => vec![],
        };
        for virtual_function in &template.virtual_functions {
            let function = self
                .evaluate_function(&binding, virtual_function.implementation)?
                .ok_or_else(|| {
                    LoaderError::program(format!(
                        "virtual function {} of {args} has no implementation",
                        virtual_function.name
                    ))
                })?;
            match table.iter_mut().find(|s| s.name == virtual_function.name) {
                Some(slot) => {
                    if !self.same_slot_signature(slot.function, function)? {
                        return Err(LoaderError::program(format!(
                            "{args} overrides {} with a different signature",
                            virtual_function.name
                        )));
                    }
                    slot.function = function;
                }
                None => table.push(VirtualSlot {
                    name: virtual_function.name.clone(),
                    function,
                }),
            }
        }

        let interfaces = self.interface_tables(id, &binding, template, storage, &table)?;
        let initializer = match template.initializer {
            Some(r) if template.has_reference(Some(r)) => self.evaluate_function(&binding, r)?,
            _ => None,
        };
        let finalizer = match template.finalizer {
            Some(r) if template.has_reference(Some(r)) => self.evaluate_function(&binding, r)?,
            _ => None,
        };

        let object = self.ty_mut(id)?;
        object.virtual_table = table;
        object.interfaces = interfaces;
        object.initializer = initializer;
        object.finalizer = finalizer;
        object.stage = LoadingStage::Finished;
        trace!("{} linked", args);
        Ok(())
    }

    fn interface_tables(
        &mut self,
        id: TypeId,
        binding: &RefBinding<'a>,
        template: &TypeTemplate,
        storage: StorageMode,
        table: &[VirtualSlot],
    ) -> LoaderResult<Vec<InterfaceEntry>> {
        let args = self.ty(id)?.args.clone();
        if self.special.kind_of(&args) == Some(SpecialKind::Box) {
            if let Some(inner) = args.flat_arguments().next() {
                self.link_type(inner)?;
                return Ok(self.ty(inner)?.interfaces.clone());
            }
        }
        let interfaces = self.interface_set(id)?;
        let mut entries = Vec::with_capacity(interfaces.len());
        for interface in interfaces {
            self.link_type(interface)?;
            let slots = self.ty(interface)?.virtual_table.clone();
            let mut virtual_table = Vec::with_capacity(slots.len());
            for slot in slots {
                let function = match storage {
                    StorageMode::Interface => Some(slot.function),
                    StorageMode::Reference => table
                        .iter()
                        .find(|s| s.name == slot.name)
                        .map(|s| s.function),
                    StorageMode::Value | StorageMode::Global => {
                        self.find_public_implementation(binding, template, &slot)?
                    }
                };
                let function = function.ok_or_else(|| {
                    LoaderError::program(format!(
                        "{args} does not implement interface slot {}",
                        slot.name
                    ))
                })?;
                if !self.same_slot_signature(slot.function, function)? {
                    return Err(LoaderError::program(format!(
                        "{args} implements interface slot {} with a different signature",
                        slot.name
                    )));
                }
                virtual_table.push(VirtualSlot {
                    name: slot.name,
                    function,
                });
            }
            entries.push(InterfaceEntry {
                interface,
                virtual_table,
            });
        }
        Ok(entries)
    }

    fn find_public_implementation(
        &mut self,
        binding: &RefBinding<'a>,
        template: &TypeTemplate,
        slot: &VirtualSlot,
    ) -> LoaderResult<Option<FunctionId>> {
        for candidate in template.functions_named(&slot.name) {
            if let Some(function) = self.evaluate_function(binding, candidate.reference)? {
                if self.same_slot_signature(slot.function, function)? {
                    return Ok(Some(function));
                }
            }
        }
        Ok(None)
    }

    fn same_slot_signature(&self, a: FunctionId, b: FunctionId) -> LoaderResult<bool> {
        Ok(self.func(a)?.slot_signature() == self.func(b)?.slot_signature())
    }

    /// Drains the body and post-loading queues until every staged object is finished.
    pub(crate) fn finish(&mut self) -> LoaderResult<()> {
        loop {
            if let Some(id) = self.body_queue.pop_front() {
                self.ensure_body(id)?;
                continue;
            }
            match self.post_queue.pop_front() {
                Some(PostLoading::Type(id)) => self.link_type(id)?,
                Some(PostLoading::Function(id)) => self.link_function(id)?,
                None => return Ok(()),
            }
        }
    }
}
