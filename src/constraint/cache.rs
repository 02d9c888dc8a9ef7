//! Per-trait check state and the overload odometer.
use super::{check_type::NodeId, evaluate::FunctionExpr, ConstraintChecker};
use crate::{
    assembly::{ConstraintKind, TemplateRef, TraitTemplate},
    types::{FunctionId, TypeId},
};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CacheId(pub usize);

/// Identity of a trait check. An ancestor with the same key means the check
/// depends on itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CacheKey {
    pub source: TemplateRef,
    pub target: TypeId,
    pub arguments: Vec<Option<TypeId>>,
}

#[derive(Debug, Clone)]
pub(crate) struct SubConstraint {
    pub export_name: String,
    pub kind: ConstraintKind,
    pub target: NodeId,
    pub arguments: Vec<NodeId>,
    pub child: Option<CacheId>,
}

#[derive(Debug, Clone)]
pub(crate) struct FieldMember {
    pub export_name: String,
    pub trait_type: NodeId,
    /// Field index and type on the target, if it has a field of that name.
    pub target: Option<(usize, NodeId)>,
}

#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub expr: FunctionExpr,
    pub return_type: NodeId,
    pub parameters: Vec<NodeId>,
    pub memo: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct FunctionMember {
    pub export_name: String,
    pub generic: bool,
    pub return_type: NodeId,
    pub parameters: Vec<NodeId>,
    pub candidates: Vec<Candidate>,
    pub choice: usize,
    pub instantiated: Option<FunctionId>,
}

impl FunctionMember {
    pub fn chosen(&self) -> Option<&Candidate> {
        self.candidates.get(self.choice)
    }
}

/// Trait members resolved against one target type.
#[derive(Debug, Clone, Default)]
pub(crate) struct TraitMembers {
    pub subs: Vec<SubConstraint>,
    pub types: Vec<(String, NodeId)>,
    pub fields: Vec<FieldMember>,
    pub functions: Vec<FunctionMember>,
}

pub(crate) struct ConstraintCache<'a> {
    pub parent: Option<CacheId>,
    pub depth: usize,
    pub source: TemplateRef,
    pub template: &'a TraitTemplate,
    pub target: NodeId,
    pub arguments: Vec<NodeId>,
    pub memo: usize,
    pub key: Option<CacheKey>,
    pub current: Option<TypeId>,
    pub members: HashMap<TypeId, TraitMembers>,
}

impl ConstraintCache<'_> {
    pub fn current_members(&self) -> Option<&TraitMembers> {
        self.current.and_then(|t| self.members.get(&t))
    }
}

impl<'s, 'a> ConstraintChecker<'s, 'a> {
    /// Moves to the next combination of overload choices below `cache`.
    ///
    /// Children are advanced first; a level that wraps around resets to its
    /// first choice and carries into the next. Returns `false` once every
    /// combination has been tried.
    pub(super) fn advance(&mut self, cache: CacheId) -> bool {
        let Some(current) = self.caches[cache.0].current else {
            return false;
        };
        let children: Vec<CacheId> = self.caches[cache.0]
            .members
            .get(&current)
            .map(|m| m.subs.iter().filter_map(|s| s.child).collect())
            .unwrap_or_default();
        for child in children {
            if self.advance(child) {
                return true;
            }
        }
        let Some(members) = self.caches[cache.0].members.get_mut(&current) else {
            return false;
        };
        for function in &mut members.functions {
            if function.candidates.len() < 2 {
                continue;
            }
            function.choice += 1;
            function.instantiated = None;
            if function.choice < function.candidates.len() {
                return true;
            }
            function.choice = 0;
        }
        false
    }
}
