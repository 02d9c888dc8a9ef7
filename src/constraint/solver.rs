//! Simplification and unification of solver nodes.
use super::{
    check_type::{CheckType, NodeId, VarId},
    ConstraintChecker,
};
use crate::{
    assembly::TemplateRef,
    error::{LoaderError, LoaderResult},
    types::TypeId,
};
use tracing::trace;

/// One side of a non-binding comparison.
#[derive(Debug, Clone, Copy)]
pub(super) enum Side {
    Node(NodeId),
    Type(TypeId),
}

enum View {
    Fail,
    Empty,
    Type(TypeId),
    Var(VarId, bool),
    /// A subtype lookup that cannot be resolved yet.
    Open,
    Generic(TemplateRef, Vec<NodeId>),
}

impl<'s, 'a> ConstraintChecker<'s, 'a> {
    /// Instantiates what can be instantiated and resolves subtype lookups whose
    /// parent is known. Returns the node that now stands for `node`.
    pub(super) fn simplify(&mut self, node: NodeId) -> LoaderResult<NodeId> {
        let node = self.root.resolve(node);
        match self.root.get(node).clone() {
            CheckType::Generic {
                template,
                args,
                try_,
            } => {
                let mut flat = Vec::with_capacity(args.len());
                let mut complete = true;
                for arg in args {
                    let arg = self.simplify(arg)?;
                    match self.root.get(arg) {
                        CheckType::Fail => {
                            self.root.replace(node, CheckType::Fail);
                            return Ok(node);
                        }
                        CheckType::Determined(Some(t)) => flat.push(*t),
                        CheckType::Determined(None) if try_ => {
                            self.root.replace(node, CheckType::Fail);
                            return Ok(node);
                        }
                        CheckType::Determined(None) => {
                            return Err(LoaderError::program(format!(
                                "empty generic argument for {template}"
                            )))
                        }
                        _ => complete = false,
                    }
                }
                if !complete {
                    return Ok(node);
                }
                let result = self
                    .session
                    .attempt(|s| s.load_type_flat(template.clone(), flat));
                let value = match result {
                    Ok(t) => CheckType::Determined(Some(t)),
                    Err(e) if try_ && e.is_soft() => {
                        trace!("best-effort instantiation of {} failed: {}", template, e);
                        CheckType::Fail
                    }
                    Err(e) => return Err(e),
                };
                self.root.replace(node, value);
                Ok(node)
            }
            CheckType::Subtype {
                name,
                parent,
                args,
                try_,
            } => {
                let parent = self.simplify(parent)?;
                let parent = match self.root.get(parent) {
                    CheckType::Determined(Some(t)) => *t,
                    CheckType::Fail => {
                        self.root.replace(node, CheckType::Fail);
                        return Ok(node);
                    }
                    CheckType::Determined(None) if try_ => {
                        self.root.replace(node, CheckType::Fail);
                        return Ok(node);
                    }
                    CheckType::Determined(None) => {
                        return Err(LoaderError::program(format!(
                            "subtype {name} of an empty type"
                        )))
                    }
                    _ => return Ok(node),
                };
                let store = self.session.store;
                let parent_args = &self.session.ty(parent)?.args;
                let template = store.type_template(&parent_args.assembly, parent_args.id)?;
                let Some(member) = template.subtype(&name) else {
                    if try_ {
                        self.root.replace(node, CheckType::Fail);
                        return Ok(node);
                    }
                    return Err(LoaderError::generic(format!(
                        "{parent_args} has no public subtype {name}"
                    )));
                };
                let binding = self.type_binding(parent, args)?;
                let target = self.evaluate(&binding, member.reference, try_)?;
                self.root.alias(node, target);
                self.simplify(target)
            }
            _ => Ok(node),
        }
    }

    /// Makes `a` and `b` equal if possible. Equalities involving unresolved
    /// subtype lookups are assumed and queued for a later exact check.
    pub(super) fn unify(&mut self, a: NodeId, b: NodeId) -> LoaderResult<bool> {
        let a = self.simplify(a)?;
        let b = self.simplify(b)?;
        if a == b {
            return Ok(true);
        }
        match (self.root.get(a).clone(), self.root.get(b).clone()) {
            (CheckType::Fail, _) | (_, CheckType::Fail) => Ok(false),
            (CheckType::Undetermined(x), CheckType::Undetermined(y)) => {
                Ok(match (self.root.is_rigid(x), self.root.is_rigid(y)) {
                    (true, true) => x == y,
                    (true, false) => self.root.deduce(y, a),
                    (false, _) => self.root.deduce(x, b),
                })
            }
            (CheckType::Undetermined(x), _) => Ok(!self.root.is_rigid(x) && self.root.deduce(x, b)),
            (_, CheckType::Undetermined(y)) => Ok(!self.root.is_rigid(y) && self.root.deduce(y, a)),
            (CheckType::Subtype { .. }, _) | (_, CheckType::Subtype { .. }) => {
                self.root.add_pending(a, b);
                Ok(true)
            }
            (CheckType::Determined(x), CheckType::Determined(y)) => Ok(x == y),
            (
                CheckType::Generic {
                    template: ta,
                    args: aa,
                    ..
                },
                CheckType::Generic {
                    template: tb,
                    args: ab,
                    ..
                },
            ) => {
                if ta != tb || aa.len() != ab.len() {
                    return Ok(false);
                }
                for (x, y) in aa.into_iter().zip(ab) {
                    if !self.unify(x, y)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (CheckType::Generic { template, args, .. }, CheckType::Determined(t))
            | (CheckType::Determined(t), CheckType::Generic { template, args, .. }) => {
                self.unify_with_type(&template, args, t)
            }
        }
    }

    fn unify_with_type(
        &mut self,
        template: &TemplateRef,
        args: Vec<NodeId>,
        ty: Option<TypeId>,
    ) -> LoaderResult<bool> {
        let Some(ty) = ty else {
            return Ok(false);
        };
        let loaded = self.session.ty(ty)?.args.clone();
        if !loaded.is_template(template) {
            return Ok(false);
        }
        let flat: Vec<TypeId> = loaded.flat_arguments().collect();
        if flat.len() != args.len() {
            return Ok(false);
        }
        for (arg, t) in args.into_iter().zip(flat) {
            let known = self.root.determined(Some(t));
            if !self.unify(arg, known)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn view(&self, side: Side) -> View {
        let node = match side {
            Side::Type(t) => return View::Type(t),
            Side::Node(node) => self.root.resolve(node),
        };
        match self.root.get(node) {
            CheckType::Fail => View::Fail,
            CheckType::Determined(None) => View::Empty,
            CheckType::Determined(Some(t)) => View::Type(*t),
            CheckType::Undetermined(var) => View::Var(*var, self.root.is_rigid(*var)),
            CheckType::Subtype { .. } => View::Open,
            CheckType::Generic { template, args, .. } => View::Generic(template.clone(), args.clone()),
        }
    }

    /// Cheap check whether `a` and `b` could become equal. Binds nothing and
    /// answers `true` whenever the shapes leave room for it.
    pub(super) fn possibly_equal(&self, a: Side, b: Side) -> LoaderResult<bool> {
        Ok(match (self.view(a), self.view(b)) {
            (View::Fail, _) | (_, View::Fail) => false,
            (View::Var(x, _), View::Var(y, _)) if x == y => true,
            (View::Var(_, false), _) | (_, View::Var(_, false)) => true,
            (View::Var(_, true), View::Open) | (View::Open, View::Var(_, true)) => true,
            (View::Var(_, true), _) | (_, View::Var(_, true)) => false,
            (View::Open, _) | (_, View::Open) => true,
            (View::Empty, View::Empty) => true,
            (View::Empty, _) | (_, View::Empty) => false,
            (View::Type(x), View::Type(y)) => x == y,
            (View::Generic(ta, aa), View::Generic(tb, ab)) => {
                if ta != tb || aa.len() != ab.len() {
                    return Ok(false);
                }
                for (x, y) in aa.into_iter().zip(ab) {
                    if !self.possibly_equal(Side::Node(x), Side::Node(y))? {
                        return Ok(false);
                    }
                }
                true
            }
            (View::Generic(template, args), View::Type(t))
            | (View::Type(t), View::Generic(template, args)) => {
                let loaded = &self.session.ty(t)?.args;
                if !loaded.is_template(&template) {
                    return Ok(false);
                }
                let flat: Vec<TypeId> = loaded.flat_arguments().collect();
                if flat.len() != args.len() {
                    return Ok(false);
                }
                for (arg, t) in args.into_iter().zip(flat) {
                    if !self.possibly_equal(Side::Node(arg), Side::Type(t))? {
                        return Ok(false);
                    }
                }
                true
            }
        })
    }

    /// Exactly re-checks every equality assumed while subtype lookups were open.
    pub(super) fn recheck_pending(&mut self) -> LoaderResult<bool> {
        let mut start = 0;
        loop {
            let pending = self.root.pending_from(start);
            if pending.is_empty() {
                return Ok(true);
            }
            start += pending.len();
            for (a, b) in pending {
                let a = self.simplify(a)?;
                let b = self.simplify(b)?;
                let open = |node| matches!(self.root.get(node), CheckType::Subtype { .. });
                if open(a) || open(b) || !self.unify(a, b)? {
                    return Ok(false);
                }
            }
        }
    }
}
