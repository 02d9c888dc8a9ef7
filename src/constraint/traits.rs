//! Trait constraint search.
use super::{
    cache::{CacheId, CacheKey, Candidate, ConstraintCache, FieldMember, FunctionMember, SubConstraint, TraitMembers},
    check_type::NodeId,
    evaluate::{CheckBinding, ExportSource},
    solver::Side,
    ConstraintChecker,
};
use crate::{
    assembly::{ConstraintKind, TemplateRef, TypeTemplate},
    error::{LoaderError, LoaderResult},
    loader::reflist::RefBinding,
    types::{ExportValue, FieldHandle, LoadingStage, TypeId},
};
use std::collections::HashMap;
use tracing::trace;

/// Upper bound on overload combinations tried for one constraint.
const MAX_COMBINATIONS: usize = 1 << 16;

/// Signature of a trait function as seen from one target.
struct TraitSignature<'r> {
    export_name: &'r str,
    name: &'r str,
    return_type: Option<usize>,
    parameters: &'r [usize],
    extra_parameters: usize,
}

impl<'s, 'a> ConstraintChecker<'s, 'a> {
    pub(super) fn new_cache(
        &mut self,
        parent: Option<CacheId>,
        source: TemplateRef,
        target: NodeId,
        arguments: Vec<NodeId>,
    ) -> LoaderResult<CacheId> {
        let depth = parent.map_or(0, |p| self.caches[p.0].depth + 1);
        let limit = self.session.config.loading_limit;
        if depth >= limit {
            return Err(LoaderError::LoadingLimit { limit });
        }
        let template = self.session.store.trait_template(&source.assembly, source.id)?;
        let memo = self.new_memo();
        self.caches.push(ConstraintCache {
            parent,
            depth,
            source,
            template,
            target,
            arguments,
            memo,
            key: None,
            current: None,
            members: HashMap::new(),
        });
        Ok(CacheId(self.caches.len() - 1))
    }

    /// Resolves the members of `cache`'s trait against target `ty`, once per target.
    fn ensure_members(&mut self, cache: CacheId, ty: TypeId) -> LoaderResult<()> {
        if self.caches[cache.0].members.contains_key(&ty) {
            return Ok(());
        }
        let object = self.session.ty(ty)?;
        if object.stage == LoadingStage::Constraints {
            return Err(LoaderError::circular(format!(
                "constraints of {} depend on themselves",
                object.args
            )));
        }
        let store = self.session.store;
        let target_template = store.type_template(&object.args.assembly, object.args.id)?;
        let ConstraintCache {
            source,
            template,
            arguments,
            memo,
            ..
        } = &self.caches[cache.0];
        let (source, template, memo) = (source.clone(), *template, *memo);
        let arguments = template
            .generic
            .parameters
            .split(arguments.clone())
            .ok_or_else(|| {
                LoaderError::generic(format!("wrong number of arguments for trait {source}"))
            })?;
        trace!("resolving trait {} against {}", source, ty);

        let self_type = Some(self.root.determined(Some(ty)));
        let binding = CheckBinding {
            assembly: source.assembly.clone(),
            declaration: &template.generic,
            arguments,
            additional: vec![],
            self_type,
            exports: ExportSource::Memo(memo),
        };
        let mut members = TraitMembers::default();

        for constraint in &template.generic.constraints {
            let target = self.evaluate(&binding, constraint.target, false)?;
            let mut arguments = Vec::with_capacity(constraint.arguments.len());
            for argument in &constraint.arguments {
                arguments.push(self.evaluate(&binding, *argument, false)?);
            }
            let child = match constraint.kind {
                ConstraintKind::TraitAssembly | ConstraintKind::TraitImport => {
                    let child_source = self.trait_source(&source.assembly, constraint)?;
                    Some(self.new_cache(Some(cache), child_source, target, arguments.clone())?)
                }
                _ => None,
            };
            members.subs.push(SubConstraint {
                export_name: constraint.export_name.clone(),
                kind: constraint.kind,
                target,
                arguments,
                child,
            });
        }

        for member in &template.types {
            let node = self.evaluate(&binding, member.reference, false)?;
            members.types.push((member.export_name.clone(), node));
        }

        for field in &template.fields {
            let trait_type = self.evaluate(&binding, field.type_ref, false)?;
            let target = match target_template.field_index(&field.name) {
                Some(index) => {
                    let type_ref = target_template.fields[index].type_ref;
                    let direct = self.session.attempt(|s| {
                        let binding = RefBinding::for_type(s, ty)?;
                        s.evaluate_type(&binding, type_ref)
                    });
                    let node = match direct {
                        Ok(t) => self.root.determined(t),
                        Err(e) if e.is_soft() => self.root.fail(),
                        Err(e) => return Err(e),
                    };
                    Some((index, node))
                }
                None => None,
            };
            members.fields.push(FieldMember {
                export_name: field.export_name.clone(),
                trait_type,
                target,
            });
        }

        let signatures = template
            .functions
            .iter()
            .map(|f| TraitSignature {
                export_name: &f.export_name,
                name: &f.name,
                return_type: f.return_type,
                parameters: &f.parameters,
                extra_parameters: 0,
            })
            .chain(template.generic_functions.iter().map(|f| TraitSignature {
                export_name: &f.export_name,
                name: &f.name,
                return_type: f.return_type,
                parameters: &f.parameters,
                extra_parameters: f.extra_parameters,
            }));
        for signature in signatures {
            let member = self.function_member(&binding, ty, target_template, &signature)?;
            members.functions.push(member);
        }

        self.caches[cache.0].members.insert(ty, members);
        Ok(())
    }

    fn function_member(
        &mut self,
        trait_binding: &CheckBinding<'a>,
        ty: TypeId,
        target_template: &'a TypeTemplate,
        signature: &TraitSignature<'_>,
    ) -> LoaderResult<FunctionMember> {
        let extra: Vec<NodeId> = (0..signature.extra_parameters)
            .map(|_| self.root.fresh(true))
            .collect();
        let mut binding = trait_binding.clone();
        binding.additional = extra.clone();
        let return_type = match signature.return_type {
            Some(r) => self.evaluate(&binding, r, false)?,
            None => self.root.determined(None),
        };
        let mut parameters = Vec::with_capacity(signature.parameters.len());
        for parameter in signature.parameters {
            parameters.push(self.evaluate(&binding, *parameter, false)?);
        }

        let target_binding = self.type_binding(ty, extra)?;
        let mut candidates = vec![];
        for reference in target_template.functions_named(signature.name) {
            let candidate = match self.candidate(&target_binding, reference.reference) {
                Ok(Some(candidate)) => candidate,
                Ok(None) => continue,
                Err(e) if e.is_soft() => {
                    trace!("skipping overload of {}: {}", signature.name, e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if candidate.parameters.len() != parameters.len()
                || !self.possibly_equal(Side::Node(return_type), Side::Node(candidate.return_type))?
            {
                continue;
            }
            let mut matches = true;
            for (a, b) in parameters.iter().zip(&candidate.parameters) {
                if !self.possibly_equal(Side::Node(*a), Side::Node(*b))? {
                    matches = false;
                    break;
                }
            }
            if matches {
                candidates.push(candidate);
            }
        }
        trace!(
            "{} overload candidates for {} on {}",
            candidates.len(),
            signature.name,
            ty
        );
        Ok(FunctionMember {
            export_name: signature.export_name.to_string(),
            generic: signature.extra_parameters > 0,
            return_type,
            parameters,
            candidates,
            choice: 0,
            instantiated: None,
        })
    }

    fn candidate(&mut self, binding: &CheckBinding<'a>, reference: usize) -> LoaderResult<Option<Candidate>> {
        let Some(expr) = self.evaluate_function(binding, reference)? else {
            return Ok(None);
        };
        let memo = self.new_memo();
        let Some(function_binding) = self.function_binding(&expr, memo)? else {
            return Ok(None);
        };
        let store = self.session.store;
        let template = store.function_template(&expr.template.assembly, expr.template.id)?;
        let return_type = match template.return_type {
            Some(r) => self.evaluate(&function_binding, r, false)?,
            None => self.root.determined(None),
        };
        let mut parameters = Vec::with_capacity(template.parameters.len());
        for parameter in &template.parameters {
            parameters.push(self.evaluate(&function_binding, *parameter, false)?);
        }
        Ok(Some(Candidate {
            expr,
            return_type,
            parameters,
            memo,
        }))
    }

    fn cache_key(&mut self, cache: CacheId, target: TypeId) -> LoaderResult<CacheKey> {
        let arguments = self.caches[cache.0].arguments.clone();
        let mut values = Vec::with_capacity(arguments.len());
        for argument in arguments {
            let argument = self.simplify(argument)?;
            values.push(self.root.value(argument).flatten());
        }
        Ok(CacheKey {
            source: self.caches[cache.0].source.clone(),
            target,
            arguments: values,
        })
    }

    /// Applies the current overload choices of `cache` and its children.
    fn try_cache(&mut self, cache: CacheId) -> LoaderResult<bool> {
        let target = self.simplify(self.caches[cache.0].target)?;
        let Some(Some(ty)) = self.root.value(target) else {
            return Ok(false);
        };
        let key = self.cache_key(cache, ty)?;
        let mut ancestor = self.caches[cache.0].parent;
        while let Some(id) = ancestor {
            if self.caches[id.0].key.as_ref() == Some(&key) {
                return Err(LoaderError::circular(format!(
                    "trait {} on {} requires itself",
                    key.source, ty
                )));
            }
            ancestor = self.caches[id.0].parent;
        }
        self.caches[cache.0].key = Some(key);
        self.caches[cache.0].current = Some(ty);
        self.ensure_members(cache, ty)?;

        let Some(members) = self.caches[cache.0].current_members().cloned() else {
            return Ok(false);
        };
        for field in &members.fields {
            let Some((_, node)) = field.target else {
                return Ok(false);
            };
            if !self.unify(field.trait_type, node)? {
                return Ok(false);
            }
        }
        for function in &members.functions {
            let Some(candidate) = function.chosen() else {
                return Ok(false);
            };
            if !self.unify(function.return_type, candidate.return_type)? {
                return Ok(false);
            }
            for (a, b) in function.parameters.iter().zip(&candidate.parameters) {
                if !self.unify(*a, *b)? {
                    return Ok(false);
                }
            }
        }
        for sub in &members.subs {
            let satisfied = match sub.child {
                Some(child) => self.try_cache(child)?,
                None => self.check_simple(sub.kind, sub.target, &sub.arguments)?,
            };
            if !satisfied || !self.link_exports(cache, sub)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Binds the memo variables standing for `sub`'s exports.
    fn link_exports(&mut self, cache: CacheId, sub: &SubConstraint) -> LoaderResult<bool> {
        if sub.export_name.is_empty() {
            return Ok(true);
        }
        let prefix = format!("{}/", sub.export_name);
        let memo = self.caches[cache.0].memo;
        let linked: Vec<(String, NodeId)> = self.memos[memo]
            .iter()
            .filter(|(name, _)| **name == sub.export_name || name.starts_with(&prefix))
            .map(|(name, node)| (name.clone(), *node))
            .collect();
        for (name, var) in linked {
            let node = match (name.strip_prefix(&prefix), sub.child) {
                (None, _) => sub.target,
                (Some(path), Some(child)) => {
                    let path: Vec<&str> = path.split('/').collect();
                    self.export_node(child, &path)?
                }
                (Some(_), None) => {
                    return Err(LoaderError::program(format!(
                        "{name} refers into a constraint that is not a trait"
                    )))
                }
            };
            if !self.unify(var, node)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Node for a type exported by `cache` under `path`.
    fn export_node(&self, cache: CacheId, path: &[&str]) -> LoaderResult<NodeId> {
        let source = &self.caches[cache.0].source;
        let (head, rest) = path
            .split_first()
            .ok_or_else(|| LoaderError::program(format!("empty export path into {source}")))?;
        let members = self.caches[cache.0].current_members().ok_or_else(|| {
            LoaderError::program(format!("trait {source} is not resolved yet"))
        })?;
        if rest.is_empty() {
            if let Some((_, node)) = members.types.iter().find(|(name, _)| name == head) {
                return Ok(*node);
            }
        }
        if let Some(sub) = members.subs.iter().find(|s| s.export_name == *head) {
            return match (rest.is_empty(), sub.child) {
                (true, _) => Ok(sub.target),
                (false, Some(child)) => self.export_node(child, rest),
                (false, None) => Err(LoaderError::program(format!(
                    "{head} of trait {source} has no members"
                ))),
            };
        }
        Err(LoaderError::program(format!(
            "trait {source} exports no type {head}"
        )))
    }

    /// Exact pass once every choice is made: instantiates the chosen overloads
    /// and re-checks assumed equalities.
    fn finalize(&mut self, cache: CacheId) -> LoaderResult<bool> {
        if !self.recheck_pending()? {
            return Ok(false);
        }
        let Some(ty) = self.caches[cache.0].current else {
            return Ok(false);
        };
        let Some(members) = self.caches[cache.0].current_members().cloned() else {
            return Ok(false);
        };
        let mut nodes: Vec<NodeId> = self.caches[cache.0].arguments.clone();
        nodes.extend(members.types.iter().map(|(_, node)| *node));
        nodes.extend(members.fields.iter().map(|f| f.trait_type));
        for node in nodes {
            let node = self.simplify(node)?;
            if self.root.value(node).is_none() {
                return Ok(false);
            }
        }

        for (i, function) in members.functions.iter().enumerate() {
            if function.generic {
                continue;
            }
            let Some(candidate) = function.chosen() else {
                return Ok(false);
            };
            let mut flat = Vec::with_capacity(candidate.expr.args.len());
            for arg in &candidate.expr.args {
                let arg = self.simplify(*arg)?;
                match self.root.value(arg) {
                    Some(Some(t)) => flat.push(t),
                    _ => return Ok(false),
                }
            }
            let template = candidate.expr.template.clone();
            let loaded = self
                .session
                .attempt(|s| s.load_function_flat(template, flat));
            let id = match loaded {
                Ok(id) => id,
                Err(e) if e.is_soft() => {
                    trace!("overload {} rejected: {}", candidate.expr.template, e);
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };
            let function_object = self.session.func(id)?;
            let exports = function_object.exports.clone();
            let signature = (function_object.return_type, function_object.parameters.clone());
            let memo: Vec<(String, NodeId)> = self.memos[candidate.memo]
                .iter()
                .map(|(name, node)| (name.clone(), *node))
                .collect();
            for (name, var) in memo {
                let value = match exports.get(&name) {
                    Some(ExportValue::Type(t)) => *t,
                    other => {
                        return Err(LoaderError::program(format!(
                            "constraint export {name} of {id} is {other:?}, not a type"
                        )))
                    }
                };
                let known = self.root.determined(value);
                if !self.unify(var, known)? {
                    return Ok(false);
                }
            }
            let return_type = self.simplify(candidate.return_type)?;
            if self.root.value(return_type) != Some(signature.0) {
                return Ok(false);
            }
            for (parameter, actual) in candidate.parameters.iter().zip(&signature.1) {
                let parameter = self.simplify(*parameter)?;
                if self.root.value(parameter) != Some(Some(*actual)) {
                    return Ok(false);
                }
            }
            if let Some(stored) = self.caches[cache.0].members.get_mut(&ty) {
                stored.functions[i].instantiated = Some(id);
            }
        }

        for sub in &members.subs {
            if let Some(child) = sub.child {
                if !self.finalize(child)? {
                    return Ok(false);
                }
            }
        }
        self.recheck_pending()
    }

    /// Tries overload combinations until one satisfies the whole cache tree.
    pub(super) fn search(&mut self, cache: CacheId) -> LoaderResult<bool> {
        let point = self.root.start_backtrack_point();
        for attempt in 0..MAX_COMBINATIONS {
            let result = self
                .try_cache(cache)
                .and_then(|ok| if ok { self.finalize(cache) } else { Ok(false) });
            match result {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) if e.is_soft() => trace!("overload combination failed: {}", e),
                Err(e) => return Err(e),
            }
            self.root.do_backtrack(point);
            if !self.advance(cache) {
                return Ok(false);
            }
            trace!(
                "retrying trait {} with combination {}",
                self.caches[cache.0].source,
                attempt + 1
            );
        }
        Ok(false)
    }

    /// Value exported by a solved cache under `path`.
    pub(super) fn export_value(&mut self, cache: CacheId, path: &[&str]) -> LoaderResult<ExportValue> {
        let source = self.caches[cache.0].source.clone();
        let (head, rest) = path
            .split_first()
            .ok_or_else(|| LoaderError::program(format!("empty export path into {source}")))?;
        let (Some(ty), Some(members)) = (
            self.caches[cache.0].current,
            self.caches[cache.0].current_members().cloned(),
        ) else {
            return Err(LoaderError::program(format!("trait {source} is not resolved")));
        };
        if rest.is_empty() {
            if let Some((_, node)) = members.types.iter().find(|(name, _)| name == head) {
                return Ok(ExportValue::Type(self.determined_value(*node)?));
            }
            if let Some(field) = members.fields.iter().find(|f| f.export_name == *head) {
                if let Some((index, _)) = field.target {
                    return Ok(ExportValue::Field(FieldHandle { owner: ty, index }));
                }
            }
            if let Some(function) = members.functions.iter().find(|f| f.export_name == *head) {
                if function.generic {
                    if let Some(candidate) = function.chosen() {
                        return Ok(ExportValue::GenericFunction(candidate.expr.template.clone()));
                    }
                } else if let Some(id) = function.instantiated {
                    return Ok(ExportValue::Function(id));
                }
            }
        }
        if let Some(sub) = members.subs.iter().find(|s| s.export_name == *head) {
            return match (rest.is_empty(), sub.child) {
                (true, _) => Ok(ExportValue::Type(self.determined_value(sub.target)?)),
                (false, Some(child)) => self.export_value(child, rest),
                (false, None) => Err(LoaderError::program(format!(
                    "{head} of trait {source} has no members"
                ))),
            };
        }
        Err(LoaderError::program(format!(
            "trait {source} exports no member {head}"
        )))
    }
}
