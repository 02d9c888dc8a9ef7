//! Generic constraint checking.
//!
//! Each constraint of a declaration is checked by its own [`ConstraintChecker`]
//! with a fresh [`Root`]. Exports of earlier constraints are visible to later ones.
use crate::{
    assembly::{ConstraintKind, ExportKind, GenericConstraint, GenericDeclaration, TemplateRef},
    error::{LoaderError, LoaderResult},
    loader::session::LoadingSession,
    types::{ConstraintExportList, ExportValue, TypeId},
};
use std::{collections::HashMap, sync::Arc};
use tracing::trace;

mod cache;
pub(crate) mod check_type;
mod evaluate;
mod solver;
mod traits;

use cache::{CacheId, ConstraintCache};
use check_type::{CheckType, NodeId, Root};
use evaluate::{CheckBinding, ExportSource};

pub(crate) struct ConstraintChecker<'s, 'a> {
    session: &'s mut LoadingSession<'a>,
    root: Root,
    caches: Vec<ConstraintCache<'a>>,
    memos: Vec<HashMap<String, NodeId>>,
}

impl<'a> LoadingSession<'a> {
    /// Checks every constraint of `declaration` for the given arguments.
    ///
    /// Returns `None` when a constraint is not satisfied.
    pub(crate) fn check_declaration(
        &mut self,
        assembly: &str,
        declaration: &'a GenericDeclaration,
        arguments: &[Vec<TypeId>],
        self_type: Option<TypeId>,
    ) -> LoaderResult<Option<ConstraintExportList>> {
        let mut exports = ConstraintExportList::default();
        for constraint in &declaration.constraints {
            let mut checker = ConstraintChecker::new(self);
            let binding = checker.declaration_binding(
                assembly,
                declaration,
                arguments,
                self_type,
                Arc::new(exports.clone()),
            );
            match checker.check_constraint(&binding, constraint)? {
                Some((target, cache)) => {
                    checker.collect_exports(declaration, constraint, target, cache, &mut exports)?
                }
                None => {
                    trace!(
                        "{:?} constraint on {}#{:?} not satisfied",
                        constraint.kind,
                        assembly,
                        self_type
                    );
                    return Ok(None);
                }
            }
        }
        Ok(Some(exports))
    }

    /// Whether `base` is `id` or one of its base types. Walks templates on demand.
    pub(crate) fn derives_from(&mut self, id: TypeId, base: TypeId) -> LoaderResult<bool> {
        let mut visited = vec![];
        let mut current = Some(id);
        while let Some(ty) = current {
            if ty == base {
                return Ok(true);
            }
            if visited.contains(&ty) {
                return Err(LoaderError::circular(format!(
                    "base type chain of {} loops",
                    self.ty(id)?.args
                )));
            }
            visited.push(ty);
            current = self.base_of(ty)?;
        }
        Ok(false)
    }
}

impl<'s, 'a> ConstraintChecker<'s, 'a> {
    fn new(session: &'s mut LoadingSession<'a>) -> Self {
        Self {
            session,
            root: Root::new(),
            caches: vec![],
            memos: vec![],
        }
    }

    fn declaration_binding(
        &mut self,
        assembly: &str,
        declaration: &'a GenericDeclaration,
        arguments: &[Vec<TypeId>],
        self_type: Option<TypeId>,
        exports: Arc<ConstraintExportList>,
    ) -> CheckBinding<'a> {
        let arguments = arguments
            .iter()
            .map(|segment| {
                segment
                    .iter()
                    .map(|t| self.root.determined(Some(*t)))
                    .collect()
            })
            .collect();
        let self_type = self_type.map(|t| self.root.determined(Some(t)));
        CheckBinding {
            assembly: assembly.to_string(),
            declaration,
            arguments,
            additional: vec![],
            self_type,
            exports: ExportSource::List(exports),
        }
    }

    fn new_memo(&mut self) -> usize {
        self.memos.push(HashMap::new());
        self.memos.len() - 1
    }

    fn trait_source(&self, assembly: &str, constraint: &GenericConstraint) -> LoaderResult<TemplateRef> {
        let store = self.session.store;
        let source = match constraint.kind {
            ConstraintKind::TraitAssembly => TemplateRef::new(assembly, constraint.index),
            ConstraintKind::TraitImport => {
                store.resolve_import(ExportKind::Trait, assembly, constraint.index)?
            }
            kind => {
                return Err(LoaderError::program(format!(
                    "{kind:?} constraint has no trait"
                )))
            }
        };
        store.trait_template(&source.assembly, source.id)?;
        Ok(source)
    }

    /// Checks one top-level constraint. On success returns its target and, for
    /// trait constraints, the solved cache tree.
    fn check_constraint(
        &mut self,
        binding: &CheckBinding<'a>,
        constraint: &GenericConstraint,
    ) -> LoaderResult<Option<(NodeId, Option<CacheId>)>> {
        let target = self.evaluate(binding, constraint.target, false)?;
        let mut arguments = Vec::with_capacity(constraint.arguments.len());
        for argument in &constraint.arguments {
            arguments.push(self.evaluate(binding, *argument, false)?);
        }
        match constraint.kind {
            ConstraintKind::TraitAssembly | ConstraintKind::TraitImport => {
                let source = self.trait_source(&binding.assembly, constraint)?;
                let cache = self.new_cache(None, source, target, arguments)?;
                Ok(self.search(cache)?.then_some((target, Some(cache))))
            }
            kind => {
                if !self.check_simple(kind, target, &arguments)? || !self.recheck_pending()? {
                    return Ok(None);
                }
                for node in std::iter::once(target).chain(arguments) {
                    let node = self.simplify(node)?;
                    if !matches!(self.root.get(node), CheckType::Determined(_)) {
                        return Ok(None);
                    }
                }
                Ok(Some((target, None)))
            }
        }
    }

    /// Checks an `EXIST`, `SAME`, `BASE` or `INTERFACE` constraint.
    fn check_simple(
        &mut self,
        kind: ConstraintKind,
        target: NodeId,
        arguments: &[NodeId],
    ) -> LoaderResult<bool> {
        let argument = |kind| {
            arguments.first().copied().ok_or_else(|| {
                LoaderError::program(format!("{kind:?} constraint needs an argument"))
            })
        };
        match kind {
            ConstraintKind::Exist => {
                let target = self.simplify(target)?;
                Ok(matches!(self.root.get(target), CheckType::Determined(_)))
            }
            ConstraintKind::Same => {
                let other = argument(kind)?;
                self.unify(target, other)
            }
            ConstraintKind::Base | ConstraintKind::Interface => {
                let other = argument(kind)?;
                let (Some(ty), Some(other)) = (self.determined_type(target)?, self.determined_type(other)?)
                else {
                    return Ok(false);
                };
                if kind == ConstraintKind::Base {
                    self.session.derives_from(ty, other)
                } else {
                    Ok(self.session.interface_set(ty)?.contains(&other))
                }
            }
            ConstraintKind::TraitAssembly | ConstraintKind::TraitImport => Err(
                LoaderError::program("trait constraint checked as a simple constraint"),
            ),
        }
    }

    fn determined_type(&mut self, node: NodeId) -> LoaderResult<Option<TypeId>> {
        let node = self.simplify(node)?;
        Ok(match self.root.get(node) {
            CheckType::Determined(value) => *value,
            _ => None,
        })
    }

    fn determined_value(&mut self, node: NodeId) -> LoaderResult<Option<TypeId>> {
        let node = self.simplify(node)?;
        match self.root.get(node) {
            CheckType::Determined(value) => Ok(*value),
            other => Err(LoaderError::program(format!(
                "exported value {other:?} is not determined"
            ))),
        }
    }

    /// Adds the `CONSTRAINT` names of `declaration` that this constraint provides.
    fn collect_exports(
        &mut self,
        declaration: &GenericDeclaration,
        constraint: &GenericConstraint,
        target: NodeId,
        cache: Option<CacheId>,
        exports: &mut ConstraintExportList,
    ) -> LoaderResult<()> {
        let export_name = constraint.export_name.as_str();
        if export_name.is_empty() {
            return Ok(());
        }
        let prefix = format!("{export_name}/");
        for name in declaration.constraint_names() {
            if exports.contains(name) {
                continue;
            }
            if name == export_name {
                exports.push(name, ExportValue::Type(self.determined_value(target)?));
            } else if let Some(rest) = name.strip_prefix(&prefix) {
                let cache = cache.ok_or_else(|| {
                    LoaderError::program(format!("{export_name} exports no member {rest}"))
                })?;
                let path: Vec<&str> = rest.split('/').collect();
                let value = self.export_value(cache, &path)?;
                exports.push(name, value);
            }
        }
        Ok(())
    }
}
