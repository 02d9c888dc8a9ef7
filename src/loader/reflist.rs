//! Direct evaluation of RefList entries into loaded types, functions and fields.
use crate::{
    assembly::{ExportKind, GenericDeclaration, ReferenceKind, RefEntry, TemplateRef},
    error::{LoaderError, LoaderResult},
    loader::session::LoadingSession,
    types::{ConstraintExportList, ExportValue, FieldHandle, FunctionId, LoadingArguments, TypeId},
};
use std::sync::Arc;

/// Where an `ARGUMENT` entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArgumentPosition {
    /// Index into the flattened arguments, continuing into the additional ones.
    Flat(usize),
    Segment(usize, usize),
}

/// Follows `CLONE` entries to the entry they alias.
pub(crate) fn follow_clone(
    declaration: &GenericDeclaration,
    index: usize,
) -> LoaderResult<(usize, RefEntry)> {
    let refs = &declaration.refs;
    let mut current = index;
    for _ in 0..=refs.len() {
        let entry = *refs
            .get(current)
            .ok_or_else(|| LoaderError::program(format!("reference {current} out of range")))?;
        if entry.kind != ReferenceKind::Clone {
            return Ok((current, entry));
        }
        current = entry.index;
    }
    Err(LoaderError::program(format!(
        "reference {index} is part of a CLONE cycle"
    )))
}

/// Index of the entry a `SUBTYPE` or `FIELDID` at `index` applies to.
///
/// An `ARGUMENTSEG`/`ARGUMENT` pair counts as one entry.
pub(crate) fn parent_index(declaration: &GenericDeclaration, index: usize) -> LoaderResult<usize> {
    if index == 0 {
        return Err(LoaderError::program("reference at 0 has no parent"));
    }
    let refs = &declaration.refs;
    let previous = index - 1;
    if previous > 0
        && refs[previous].kind == ReferenceKind::Argument
        && refs[previous - 1].kind == ReferenceKind::ArgumentSeg
    {
        return Ok(previous - 1);
    }
    Ok(previous)
}

/// Start indices of the argument slots following the head at `head`.
pub(crate) fn sublist_slots(declaration: &GenericDeclaration, head: usize) -> LoaderResult<Vec<usize>> {
    let refs = &declaration.refs;
    let mut slots = vec![];
    let mut i = head + 1;
    loop {
        let entry = refs.get(i).ok_or_else(|| {
            LoaderError::program(format!("argument list of reference {head} is not terminated"))
        })?;
        match entry.kind {
            ReferenceKind::Empty => return Ok(slots),
            ReferenceKind::Assembly | ReferenceKind::Import | ReferenceKind::Subtype => {
                return Err(LoaderError::program(format!(
                    "nested {:?} in argument list of reference {head}",
                    entry.kind
                )))
            }
            ReferenceKind::ArgumentSeg => {
                slots.push(i);
                i += 2;
            }
            _ => {
                slots.push(i);
                i += 1;
            }
        }
    }
}

pub(crate) fn argument_position(
    declaration: &GenericDeclaration,
    index: usize,
) -> LoaderResult<ArgumentPosition> {
    let entry = declaration.refs[index];
    match entry.kind {
        ReferenceKind::Argument => Ok(ArgumentPosition::Flat(entry.index)),
        ReferenceKind::ArgumentSeg => match declaration.refs.get(index + 1) {
            Some(next) if next.kind == ReferenceKind::Argument => {
                Ok(ArgumentPosition::Segment(entry.index, next.index))
            }
            _ => Err(LoaderError::program(format!(
                "ARGUMENTSEG at {index} is not followed by ARGUMENT"
            ))),
        },
        kind => Err(LoaderError::program(format!(
            "reference {index} is {kind:?}, not an argument"
        ))),
    }
}

pub(crate) fn pick_argument<T: Copy>(
    arguments: &[Vec<T>],
    additional: &[T],
    position: ArgumentPosition,
) -> LoaderResult<T> {
    let found = match position {
        ArgumentPosition::Flat(i) => {
            let primary: usize = arguments.iter().map(Vec::len).sum();
            if i < primary {
                arguments.iter().flatten().nth(i).copied()
            } else {
                additional.get(i - primary).copied()
            }
        }
        ArgumentPosition::Segment(s, i) => arguments.get(s).and_then(|seg| seg.get(i)).copied(),
    };
    found.ok_or_else(|| LoaderError::program(format!("generic argument {position:?} out of range")))
}

pub(crate) fn reference_name(declaration: &GenericDeclaration, index: usize) -> LoaderResult<&str> {
    declaration
        .name(index)
        .ok_or_else(|| LoaderError::program(format!("name {index} out of range")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefContext {
    Type,
    Function,
}

/// Everything a RefList needs to be evaluated against one instantiation.
#[derive(Debug, Clone)]
pub(crate) struct RefBinding<'a> {
    pub assembly: String,
    pub declaration: &'a GenericDeclaration,
    pub arguments: Vec<Vec<TypeId>>,
    pub additional: Vec<TypeId>,
    pub self_type: Option<TypeId>,
    pub exports: Option<Arc<ConstraintExportList>>,
}

impl<'a> RefBinding<'a> {
    pub fn for_type(session: &LoadingSession<'a>, id: TypeId) -> LoaderResult<Self> {
        let store = session.store;
        let object = session.ty(id)?;
        let template = store.type_template(&object.args.assembly, object.args.id)?;
        Ok(Self {
            assembly: object.args.assembly.clone(),
            declaration: &template.generic,
            arguments: object.args.arguments.clone(),
            additional: vec![],
            self_type: Some(id),
            exports: Some(object.exports.clone()),
        })
    }

    pub fn for_function(session: &LoadingSession<'a>, id: FunctionId) -> LoaderResult<Self> {
        let store = session.store;
        let object = session.func(id)?;
        let template = store.function_template(&object.args.assembly, object.args.id)?;
        Ok(Self {
            assembly: object.args.assembly.clone(),
            declaration: &template.generic,
            arguments: object.args.arguments.clone(),
            additional: vec![],
            self_type: None,
            exports: Some(object.exports.clone()),
        })
    }

    fn argument(&self, index: usize) -> LoaderResult<TypeId> {
        let position = argument_position(self.declaration, index)?;
        pick_argument(&self.arguments, &self.additional, position)
    }

    fn export(&self, name_index: usize) -> LoaderResult<&ExportValue> {
        let name = reference_name(self.declaration, name_index)?;
        self.exports
            .as_ref()
            .and_then(|e| e.get(name))
            .ok_or_else(|| LoaderError::program(format!("no constraint exports {name}")))
    }
}

impl<'a> LoadingSession<'a> {
    pub(crate) fn evaluate_type(
        &mut self,
        binding: &RefBinding<'a>,
        index: usize,
    ) -> LoaderResult<Option<TypeId>> {
        let (index, entry) = follow_clone(binding.declaration, index)?;
        match entry.kind {
            ReferenceKind::Empty => Ok(None),
            ReferenceKind::Assembly => {
                let template = TemplateRef::new(binding.assembly.clone(), entry.index);
                self.instantiate_type(binding, index, template).map(Some)
            }
            ReferenceKind::Import => {
                let template =
                    self.store
                        .resolve_import(ExportKind::Type, &binding.assembly, entry.index)?;
                self.instantiate_type(binding, index, template).map(Some)
            }
            ReferenceKind::Argument | ReferenceKind::ArgumentSeg => {
                binding.argument(index).map(Some)
            }
            ReferenceKind::SelfType => binding
                .self_type
                .map(Some)
                .ok_or_else(|| LoaderError::program("SELF used outside of a type")),
            ReferenceKind::Subtype => {
                let (parent, reference) = self.subtype_target(binding, index, RefContext::Type)?;
                self.evaluate_type(&parent, reference)
            }
            ReferenceKind::Constraint => match binding.export(entry.index)? {
                ExportValue::Type(t) => Ok(*t),
                other => Err(LoaderError::program(format!(
                    "constraint export {other:?} is not a type"
                ))),
            },
            kind => Err(LoaderError::program(format!(
                "{kind:?} at {index} is not a type reference"
            ))),
        }
    }

    pub(crate) fn evaluate_function(
        &mut self,
        binding: &RefBinding<'a>,
        index: usize,
    ) -> LoaderResult<Option<FunctionId>> {
        let (index, entry) = follow_clone(binding.declaration, index)?;
        match entry.kind {
            ReferenceKind::Empty => Ok(None),
            ReferenceKind::Assembly => {
                let template = TemplateRef::new(binding.assembly.clone(), entry.index);
                self.instantiate_function(binding, index, template).map(Some)
            }
            ReferenceKind::Import => {
                let template = self.store.resolve_import(
                    ExportKind::Function,
                    &binding.assembly,
                    entry.index,
                )?;
                self.instantiate_function(binding, index, template).map(Some)
            }
            ReferenceKind::Subtype => {
                let (parent, reference) =
                    self.subtype_target(binding, index, RefContext::Function)?;
                self.evaluate_function(&parent, reference)
            }
            ReferenceKind::Constraint => match binding.export(entry.index)? {
                ExportValue::Function(f) => Ok(Some(*f)),
                other => Err(LoaderError::program(format!(
                    "constraint export {other:?} is not a function"
                ))),
            },
            kind => Err(LoaderError::program(format!(
                "{kind:?} at {index} is not a function reference"
            ))),
        }
    }

    pub(crate) fn evaluate_field(
        &mut self,
        binding: &RefBinding<'a>,
        index: usize,
    ) -> LoaderResult<FieldHandle> {
        let (index, entry) = follow_clone(binding.declaration, index)?;
        match entry.kind {
            ReferenceKind::FieldId => {
                let parent = parent_index(binding.declaration, index)?;
                let owner = self.evaluate_type(binding, parent)?.ok_or_else(|| {
                    LoaderError::program(format!("field reference {index} has no owner"))
                })?;
                let args = &self.ty(owner)?.args;
                let template = self.store.type_template(&args.assembly, args.id)?;
                if entry.index >= template.fields.len() {
                    return Err(LoaderError::program(format!(
                        "field {} of {args} out of range",
                        entry.index
                    )));
                }
                Ok(FieldHandle {
                    owner,
                    index: entry.index,
                })
            }
            ReferenceKind::Constraint => match binding.export(entry.index)? {
                ExportValue::Field(f) => Ok(*f),
                other => Err(LoaderError::program(format!(
                    "constraint export {other:?} is not a field"
                ))),
            },
            kind => Err(LoaderError::program(format!(
                "{kind:?} at {index} is not a field reference"
            ))),
        }
    }

    /// Evaluates the argument sublist following the head at `head`.
    pub(crate) fn evaluate_arguments(
        &mut self,
        binding: &RefBinding<'a>,
        head: usize,
    ) -> LoaderResult<Vec<TypeId>> {
        let slots = sublist_slots(binding.declaration, head)?;
        let mut arguments = Vec::with_capacity(slots.len());
        for slot in slots {
            let argument = self.evaluate_type(binding, slot)?.ok_or_else(|| {
                LoaderError::program(format!("generic argument {slot} is empty"))
            })?;
            arguments.push(argument);
        }
        Ok(arguments)
    }

    fn instantiate_type(
        &mut self,
        binding: &RefBinding<'a>,
        head: usize,
        template: TemplateRef,
    ) -> LoaderResult<TypeId> {
        let flat = self.evaluate_arguments(binding, head)?;
        self.load_type_flat(template, flat)
    }

    fn instantiate_function(
        &mut self,
        binding: &RefBinding<'a>,
        head: usize,
        template: TemplateRef,
    ) -> LoaderResult<FunctionId> {
        let flat = self.evaluate_arguments(binding, head)?;
        self.load_function_flat(template, flat)
    }

    /// Loads `template` with a flat argument list split by its own definition.
    pub(crate) fn load_type_flat(
        &mut self,
        template: TemplateRef,
        flat: Vec<TypeId>,
    ) -> LoaderResult<TypeId> {
        let definition = &self
            .store
            .type_template(&template.assembly, template.id)?
            .generic
            .parameters;
        let arguments = definition.split(flat).ok_or_else(|| {
            LoaderError::generic(format!("wrong number of generic arguments for {template}"))
        })?;
        self.load_type(LoadingArguments::new(template.assembly, template.id, arguments))
    }

    pub(crate) fn load_function_flat(
        &mut self,
        template: TemplateRef,
        flat: Vec<TypeId>,
    ) -> LoaderResult<FunctionId> {
        let definition = &self
            .store
            .function_template(&template.assembly, template.id)?
            .generic
            .parameters;
        let arguments = definition.split(flat).ok_or_else(|| {
            LoaderError::generic(format!("wrong number of generic arguments for {template}"))
        })?;
        self.load_function(LoadingArguments::new(template.assembly, template.id, arguments))
    }

    /// Resolves a `SUBTYPE` entry to the parent's binding and the member's reference.
    fn subtype_target(
        &mut self,
        binding: &RefBinding<'a>,
        index: usize,
        context: RefContext,
    ) -> LoaderResult<(RefBinding<'a>, usize)> {
        let parent = parent_index(binding.declaration, index)?;
        let entry = binding.declaration.refs[index];
        let name = reference_name(binding.declaration, entry.index)?;
        let parent = self.evaluate_type(binding, parent)?.ok_or_else(|| {
            LoaderError::program(format!("SUBTYPE {name} of an empty type"))
        })?;
        let additional = self.evaluate_arguments(binding, index)?;
        let mut parent_binding = RefBinding::for_type(self, parent)?;
        parent_binding.additional = additional;
        let args = &self.ty(parent)?.args;
        let template = self.store.type_template(&args.assembly, args.id)?;
        let member = match context {
            RefContext::Type => template.subtype(name),
            RefContext::Function => template.functions_named(name).next(),
        };
        let reference = member.map(|m| m.reference).ok_or_else(|| {
            LoaderError::generic(format!("{args} has no public member {name}"))
        })?;
        Ok((parent_binding, reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::RefEntry;

    fn declaration(refs: Vec<RefEntry>) -> GenericDeclaration {
        GenericDeclaration {
            refs,
            ..Default::default()
        }
    }

    #[test]
    fn test_follow_clone() {
        let decl = declaration(vec![
            RefEntry::new(ReferenceKind::Clone, 1),
            RefEntry::new(ReferenceKind::Clone, 2),
            RefEntry::new(ReferenceKind::SelfType, 0),
        ]);
        assert_eq!(follow_clone(&decl, 0).unwrap().0, 2);
    }

    #[test]
    fn test_parent_index_skips_segment_pair() {
        let decl = declaration(vec![
            RefEntry::new(ReferenceKind::ArgumentSeg, 1),
            RefEntry::new(ReferenceKind::Argument, 0),
            RefEntry::new(ReferenceKind::Subtype, 0),
            RefEntry::new(ReferenceKind::Empty, 0),
            RefEntry::new(ReferenceKind::Argument, 2),
            RefEntry::new(ReferenceKind::FieldId, 0),
        ]);
        assert_eq!(parent_index(&decl, 2).unwrap(), 0);
        assert_eq!(parent_index(&decl, 5).unwrap(), 4);
        assert_eq!(parent_index(&decl, 1).unwrap(), 0);
        assert!(matches!(parent_index(&decl, 0), Err(LoaderError::Program(_))));
    }

    #[test]
    fn test_clone_cycle_is_program_error() {
        let decl = declaration(vec![
            RefEntry::new(ReferenceKind::Clone, 1),
            RefEntry::new(ReferenceKind::Clone, 0),
        ]);
        assert!(matches!(follow_clone(&decl, 0), Err(LoaderError::Program(_))));
        assert!(matches!(follow_clone(&decl, 5), Err(LoaderError::Program(_))));
    }

    #[test]
    fn test_sublist_slots() {
        let decl = declaration(vec![
            RefEntry::new(ReferenceKind::Assembly, 0),
            RefEntry::new(ReferenceKind::Argument, 0),
            RefEntry::new(ReferenceKind::ArgumentSeg, 1),
            RefEntry::new(ReferenceKind::Argument, 0),
            RefEntry::new(ReferenceKind::Clone, 6),
            RefEntry::EMPTY,
            RefEntry::new(ReferenceKind::SelfType, 0),
        ]);
        assert_eq!(sublist_slots(&decl, 0).unwrap(), vec![1, 2, 4]);
        assert_eq!(
            argument_position(&decl, 2).unwrap(),
            ArgumentPosition::Segment(1, 0)
        );
    }

    #[test]
    fn test_sublist_errors() {
        let unterminated = declaration(vec![
            RefEntry::new(ReferenceKind::Assembly, 0),
            RefEntry::new(ReferenceKind::Argument, 0),
        ]);
        assert!(sublist_slots(&unterminated, 0).is_err());
        let nested = declaration(vec![
            RefEntry::new(ReferenceKind::Assembly, 0),
            RefEntry::new(ReferenceKind::Import, 0),
            RefEntry::EMPTY,
        ]);
        assert!(matches!(sublist_slots(&nested, 0), Err(LoaderError::Program(_))));
    }

    #[test]
    fn test_pick_argument_overflow() {
        let args = vec![vec![1, 2], vec![3]];
        assert_eq!(pick_argument(&args, &[9], ArgumentPosition::Flat(2)).unwrap(), 3);
        assert_eq!(pick_argument(&args, &[9], ArgumentPosition::Flat(3)).unwrap(), 9);
        assert_eq!(pick_argument(&args, &[], ArgumentPosition::Segment(0, 1)).unwrap(), 2);
        assert!(pick_argument(&args, &[], ArgumentPosition::Flat(3)).is_err());
    }
}
