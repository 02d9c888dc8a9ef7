//! RefList evaluation into solver nodes.
//!
//! Unlike direct evaluation, nominal references become [`CheckType::Generic`]
//! expressions that are only instantiated once their arguments are known.
use super::{
    check_type::{CheckType, NodeId},
    ConstraintChecker,
};
use crate::{
    assembly::{ExportKind, GenericDeclaration, ReferenceKind, TemplateRef},
    error::{LoaderError, LoaderResult},
    loader::reflist::{
        argument_position, follow_clone, parent_index, pick_argument, reference_name, sublist_slots,
    },
    types::{ConstraintExportList, ExportValue, TypeId},
};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub(crate) enum ExportSource {
    None,
    /// Exports of an object that already passed its constraint check.
    List(Arc<ConstraintExportList>),
    /// Exports not known yet. Each name gets one shared variable per memo.
    Memo(usize),
}

#[derive(Debug, Clone)]
pub(crate) struct CheckBinding<'a> {
    pub assembly: String,
    pub declaration: &'a GenericDeclaration,
    pub arguments: Vec<Vec<NodeId>>,
    pub additional: Vec<NodeId>,
    pub self_type: Option<NodeId>,
    pub exports: ExportSource,
}

/// A function reference whose generic arguments may still be open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FunctionExpr {
    pub template: TemplateRef,
    pub args: Vec<NodeId>,
}

impl<'s, 'a> ConstraintChecker<'s, 'a> {
    pub(super) fn evaluate(
        &mut self,
        binding: &CheckBinding<'a>,
        index: usize,
        try_: bool,
    ) -> LoaderResult<NodeId> {
        let (index, entry) = follow_clone(binding.declaration, index)?;
        match entry.kind {
            ReferenceKind::Empty => Ok(self.root.determined(None)),
            ReferenceKind::Assembly => {
                let template = TemplateRef::new(binding.assembly.clone(), entry.index);
                self.generic_node(binding, index, template, try_)
            }
            ReferenceKind::Import => {
                let resolved =
                    self.session
                        .store
                        .resolve_import(ExportKind::Type, &binding.assembly, entry.index);
                match resolved {
                    Ok(template) => self.generic_node(binding, index, template, try_),
                    Err(e) if try_ && e.is_soft() => Ok(self.root.fail()),
                    Err(e) => Err(e),
                }
            }
            ReferenceKind::Argument | ReferenceKind::ArgumentSeg => {
                let position = argument_position(binding.declaration, index)?;
                pick_argument(&binding.arguments, &binding.additional, position)
            }
            ReferenceKind::SelfType => binding
                .self_type
                .ok_or_else(|| LoaderError::program("SELF used outside of a type")),
            ReferenceKind::Subtype => {
                let parent = parent_index(binding.declaration, index)?;
                let name = reference_name(binding.declaration, entry.index)?.to_string();
                let parent = self.evaluate(binding, parent, try_)?;
                let args = self.evaluate_sublist(binding, index, try_)?;
                let node = self.root.add(CheckType::Subtype {
                    name,
                    parent,
                    args,
                    try_,
                });
                self.simplify(node)
            }
            ReferenceKind::Constraint => self.constraint_export(binding, entry.index),
            ReferenceKind::Try => self.evaluate(binding, entry.index, true),
            ReferenceKind::Any => Ok(self.root.fresh(false)),
            kind => Err(LoaderError::program(format!(
                "{kind:?} at {index} is not a type reference"
            ))),
        }
    }

    fn evaluate_sublist(
        &mut self,
        binding: &CheckBinding<'a>,
        head: usize,
        try_: bool,
    ) -> LoaderResult<Vec<NodeId>> {
        let slots = sublist_slots(binding.declaration, head)?;
        let mut args = Vec::with_capacity(slots.len());
        for slot in slots {
            args.push(self.evaluate(binding, slot, try_)?);
        }
        Ok(args)
    }

    fn generic_node(
        &mut self,
        binding: &CheckBinding<'a>,
        head: usize,
        template: TemplateRef,
        try_: bool,
    ) -> LoaderResult<NodeId> {
        let args = self.evaluate_sublist(binding, head, try_)?;
        let node = self.root.add(CheckType::Generic {
            template,
            args,
            try_,
        });
        self.simplify(node)
    }

    fn constraint_export(&mut self, binding: &CheckBinding<'a>, name_index: usize) -> LoaderResult<NodeId> {
        let name = reference_name(binding.declaration, name_index)?;
        match &binding.exports {
            ExportSource::List(list) => match list.get(name) {
                Some(ExportValue::Type(t)) => Ok(self.root.determined(*t)),
                Some(other) => Err(LoaderError::program(format!(
                    "constraint export {name} is {other:?}, not a type"
                ))),
                None => Err(LoaderError::program(format!("no constraint exports {name}"))),
            },
            ExportSource::Memo(memo) => {
                if let Some(node) = self.memos[*memo].get(name) {
                    return Ok(*node);
                }
                let node = self.root.fresh(false);
                self.memos[*memo].insert(name.to_string(), node);
                Ok(node)
            }
            ExportSource::None => Err(LoaderError::program(format!(
                "constraint export {name} referenced where none are available"
            ))),
        }
    }

    /// Evaluates a function reference without instantiating it.
    pub(super) fn evaluate_function(
        &mut self,
        binding: &CheckBinding<'a>,
        index: usize,
    ) -> LoaderResult<Option<FunctionExpr>> {
        let (index, entry) = follow_clone(binding.declaration, index)?;
        let template = match entry.kind {
            ReferenceKind::Empty => return Ok(None),
            ReferenceKind::Assembly => TemplateRef::new(binding.assembly.clone(), entry.index),
            ReferenceKind::Import => {
                self.session
                    .store
                    .resolve_import(ExportKind::Function, &binding.assembly, entry.index)?
            }
            ReferenceKind::Subtype => {
                let parent = parent_index(binding.declaration, index)?;
                let name = reference_name(binding.declaration, entry.index)?;
                let parent = self.evaluate(binding, parent, false)?;
                let Some(Some(parent)) = self.root.value(parent) else {
                    return Err(LoaderError::program(format!(
                        "function {name} looked up on an undetermined type"
                    )));
                };
                let additional = self.evaluate_sublist(binding, index, false)?;
                let store = self.session.store;
                let args = &self.session.ty(parent)?.args;
                let member = store
                    .type_template(&args.assembly, args.id)?
                    .functions_named(name)
                    .next()
                    .ok_or_else(|| LoaderError::generic(format!("{args} has no public function {name}")))?;
                let parent_binding = self.type_binding(parent, additional)?;
                return self.evaluate_function(&parent_binding, member.reference);
            }
            ReferenceKind::Constraint => {
                let name = reference_name(binding.declaration, entry.index)?;
                let function = match &binding.exports {
                    ExportSource::List(list) => match list.get(name) {
                        Some(ExportValue::Function(f)) => *f,
                        other => {
                            return Err(LoaderError::program(format!(
                                "constraint export {name} is {other:?}, not a function"
                            )))
                        }
                    },
                    _ => {
                        return Err(LoaderError::program(format!(
                            "function export {name} referenced before it is known"
                        )))
                    }
                };
                let args = self.session.func(function)?.args.clone();
                let flat = args
                    .flat_arguments()
                    .map(|t| self.root.determined(Some(t)))
                    .collect();
                return Ok(Some(FunctionExpr {
                    template: args.template(),
                    args: flat,
                }));
            }
            kind => {
                return Err(LoaderError::program(format!(
                    "{kind:?} at {index} is not a function reference"
                )))
            }
        };
        let args = self.evaluate_sublist(binding, index, false)?;
        Ok(Some(FunctionExpr { template, args }))
    }

    /// Binding of an already loaded type, for evaluating its template's references.
    pub(super) fn type_binding(
        &mut self,
        id: TypeId,
        additional: Vec<NodeId>,
    ) -> LoaderResult<CheckBinding<'a>> {
        let store = self.session.store;
        let object = self.session.ty(id)?;
        let args = object.args.clone();
        let exports = object.exports.clone();
        let template = store.type_template(&args.assembly, args.id)?;
        let arguments = args
            .arguments
            .iter()
            .map(|segment| {
                segment
                    .iter()
                    .map(|t| self.root.determined(Some(*t)))
                    .collect()
            })
            .collect();
        let self_type = Some(self.root.determined(Some(id)));
        Ok(CheckBinding {
            assembly: args.assembly,
            declaration: &template.generic,
            arguments,
            additional,
            self_type,
            exports: ExportSource::List(exports),
        })
    }

    /// Binding of a function expression. `None` if its arguments do not fit the template.
    pub(super) fn function_binding(
        &mut self,
        expr: &FunctionExpr,
        memo: usize,
    ) -> LoaderResult<Option<CheckBinding<'a>>> {
        let store = self.session.store;
        let template = store.function_template(&expr.template.assembly, expr.template.id)?;
        let Some(arguments) = template.generic.parameters.split(expr.args.clone()) else {
            return Ok(None);
        };
        Ok(Some(CheckBinding {
            assembly: expr.template.assembly.clone(),
            declaration: &template.generic,
            arguments,
            additional: vec![],
            self_type: None,
            exports: ExportSource::Memo(memo),
        }))
    }
}
