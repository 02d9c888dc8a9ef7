//! Type expressions under constraint evaluation and their undo log.
use crate::{assembly::TemplateRef, types::TypeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct VarId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CheckType {
    Fail,
    Undetermined(VarId),
    /// A nominal type whose arguments are not all known yet.
    Generic {
        template: TemplateRef,
        args: Vec<NodeId>,
        try_: bool,
    },
    Subtype {
        name: String,
        parent: NodeId,
        args: Vec<NodeId>,
        try_: bool,
    },
    Determined(Option<TypeId>),
}

#[derive(Debug, Clone)]
struct VarSlot {
    value: Option<NodeId>,
    rigid: bool,
}

#[derive(Debug)]
enum UndoRecord {
    Var { var: VarId, previous: Option<NodeId> },
    Node { node: NodeId, previous: CheckType },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BacktrackPoint {
    log: usize,
    pending: usize,
}

/// Owns every node and variable of one constraint check.
///
/// Nodes are never removed; mutations go through [`Root::deduce`] and
/// [`Root::replace`] so that [`Root::do_backtrack`] can undo them.
#[derive(Debug, Default)]
pub(crate) struct Root {
    nodes: Vec<CheckType>,
    vars: Vec<VarSlot>,
    log: Vec<UndoRecord>,
    pending: Vec<(NodeId, NodeId)>,
}

impl Root {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: CheckType) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn determined(&mut self, value: Option<TypeId>) -> NodeId {
        self.add(CheckType::Determined(value))
    }

    pub fn fail(&mut self) -> NodeId {
        self.add(CheckType::Fail)
    }

    /// A fresh variable. Rigid variables only unify with themselves.
    pub fn fresh(&mut self, rigid: bool) -> NodeId {
        self.vars.push(VarSlot { value: None, rigid });
        let var = VarId(self.vars.len() - 1);
        self.add(CheckType::Undetermined(var))
    }

    pub fn get(&self, node: NodeId) -> &CheckType {
        &self.nodes[node.0]
    }

    pub fn is_rigid(&self, var: VarId) -> bool {
        self.vars[var.0].rigid
    }

    /// Follows bound variables to the node that currently stands for `node`.
    pub fn resolve(&self, node: NodeId) -> NodeId {
        let mut current = node;
        while let CheckType::Undetermined(var) = self.nodes[current.0] {
            match self.vars[var.0].value {
                Some(next) => current = next,
                None => break,
            }
        }
        current
    }

    pub fn value(&self, node: NodeId) -> Option<Option<TypeId>> {
        match self.get(self.resolve(node)) {
            CheckType::Determined(value) => Some(*value),
            _ => None,
        }
    }

    pub fn occurs(&self, var: VarId, node: NodeId) -> bool {
        let node = self.resolve(node);
        match self.get(node) {
            CheckType::Undetermined(v) => *v == var,
            CheckType::Generic { args, .. } => args.iter().any(|a| self.occurs(var, *a)),
            CheckType::Subtype { parent, args, .. } => {
                self.occurs(var, *parent) || args.iter().any(|a| self.occurs(var, *a))
            }
            CheckType::Fail | CheckType::Determined(_) => false,
        }
    }

    /// Binds an unbound variable to `node`. Fails on a cyclic binding.
    pub fn deduce(&mut self, var: VarId, node: NodeId) -> bool {
        if self.vars[var.0].value.is_some() || self.occurs(var, node) {
            return false;
        }
        self.log.push(UndoRecord::Var {
            var,
            previous: None,
        });
        self.vars[var.0].value = Some(node);
        true
    }

    pub fn replace(&mut self, node: NodeId, value: CheckType) {
        let previous = std::mem::replace(&mut self.nodes[node.0], value);
        self.log.push(UndoRecord::Node { node, previous });
    }

    /// Makes `node` stand for `target` from now on.
    pub fn alias(&mut self, node: NodeId, target: NodeId) {
        self.vars.push(VarSlot {
            value: Some(target),
            rigid: false,
        });
        let var = VarId(self.vars.len() - 1);
        self.replace(node, CheckType::Undetermined(var));
    }

    pub fn add_pending(&mut self, a: NodeId, b: NodeId) {
        self.pending.push((a, b));
    }

    pub fn pending_from(&self, start: usize) -> Vec<(NodeId, NodeId)> {
        self.pending.get(start..).map(<[_]>::to_vec).unwrap_or_default()
    }

    pub fn start_backtrack_point(&self) -> BacktrackPoint {
        BacktrackPoint {
            log: self.log.len(),
            pending: self.pending.len(),
        }
    }

    pub fn do_backtrack(&mut self, point: BacktrackPoint) {
        while self.log.len() > point.log {
            match self.log.pop() {
                Some(UndoRecord::Var { var, previous }) => self.vars[var.0].value = previous,
                Some(UndoRecord::Node { node, previous }) => self.nodes[node.0] = previous,
                None => break,
            }
        }
        self.pending.truncate(point.pending);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deduce_and_backtrack() {
        let mut root = Root::new();
        let var_node = root.fresh(false);
        let CheckType::Undetermined(var) = *root.get(var_node) else {
            panic!("fresh node is not a variable");
        };
        let int = root.determined(Some(TypeId(3)));

        let point = root.start_backtrack_point();
        assert!(root.deduce(var, int));
        assert_eq!(root.resolve(var_node), int);
        assert_eq!(root.value(var_node), Some(Some(TypeId(3))));
        assert!(!root.deduce(var, int));

        root.do_backtrack(point);
        assert_eq!(root.resolve(var_node), var_node);
        assert_eq!(root.value(var_node), None);
    }

    #[test]
    fn test_occurs_check() {
        let mut root = Root::new();
        let var_node = root.fresh(false);
        let CheckType::Undetermined(var) = *root.get(var_node) else {
            panic!("fresh node is not a variable");
        };
        let generic = root.add(CheckType::Generic {
            template: TemplateRef::new("A", 0),
            args: vec![var_node],
            try_: false,
        });
        assert!(!root.deduce(var, generic));
    }

    #[test]
    fn test_replace_and_alias_undo() {
        let mut root = Root::new();
        let node = root.add(CheckType::Subtype {
            name: "Item".to_string(),
            parent: NodeId(0),
            args: vec![],
            try_: false,
        });
        let target = root.determined(None);
        let point = root.start_backtrack_point();
        root.alias(node, target);
        root.add_pending(node, target);
        assert_eq!(root.resolve(node), target);
        assert_eq!(root.pending_from(0).len(), 1);

        root.do_backtrack(point);
        assert!(matches!(root.get(node), CheckType::Subtype { .. }));
        assert!(root.pending_from(0).is_empty());
    }

    #[test]
    fn test_nested_backtrack_points() {
        let mut root = Root::new();
        let a = root.fresh(false);
        let b = root.fresh(false);
        let (CheckType::Undetermined(va), CheckType::Undetermined(vb)) =
            (root.get(a).clone(), root.get(b).clone())
        else {
            panic!("fresh nodes are not variables");
        };
        let one = root.determined(Some(TypeId(1)));
        let outer = root.start_backtrack_point();
        assert!(root.deduce(va, one));
        let inner = root.start_backtrack_point();
        assert!(root.deduce(vb, a));
        assert_eq!(root.value(b), Some(Some(TypeId(1))));
        root.do_backtrack(inner);
        assert_eq!(root.value(b), None);
        assert_eq!(root.value(a), Some(Some(TypeId(1))));
        root.do_backtrack(outer);
        assert_eq!(root.value(a), None);
    }
}
