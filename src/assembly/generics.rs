use serde::{Deserialize, Serialize};

/// Expected generic parameter counts, one per segment.
///
/// When `variadic` is set the last segment accepts at least its declared count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericDefinition {
    #[serde(default)]
    pub counts: Vec<usize>,
    #[serde(default)]
    pub variadic: bool,
}

impl GenericDefinition {
    pub fn new(counts: Vec<usize>) -> Self {
        Self {
            counts,
            variadic: false,
        }
    }

    pub fn single(count: usize) -> Self {
        Self::new(vec![count])
    }

    pub fn is_empty(&self) -> bool {
        !self.variadic && self.counts.iter().all(|c| *c == 0)
    }

    pub fn parameter_count(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Segment counts, with a variadic definition of no segments read as one
    /// open segment.
    fn segments(&self) -> &[usize] {
        if self.counts.is_empty() && self.variadic {
            &[0]
        } else {
            &self.counts
        }
    }

    /// Whether both definitions accept the same argument shapes.
    pub fn same_shape(&self, other: &GenericDefinition) -> bool {
        if self.is_empty() || other.is_empty() {
            return self.is_empty() == other.is_empty();
        }
        self.variadic == other.variadic && self.segments() == other.segments()
    }

    pub fn accepts<T>(&self, segments: &[Vec<T>]) -> bool {
        if self.is_empty() {
            return segments.iter().all(|s| s.is_empty());
        }
        let counts = self.segments();
        if segments.len() != counts.len() {
            return false;
        }
        let last = counts.len() - 1;
        segments
            .iter()
            .zip(counts)
            .enumerate()
            .all(|(i, (seg, count))| {
                if self.variadic && i == last {
                    seg.len() >= *count
                } else {
                    seg.len() == *count
                }
            })
    }

    /// Splits a flat argument list into this definition's segments.
    pub fn split<T>(&self, flat: Vec<T>) -> Option<Vec<Vec<T>>> {
        if self.is_empty() {
            return if flat.is_empty() { Some(vec![]) } else { None };
        }
        let counts = self.segments();
        let fixed: usize = counts.iter().sum();
        if flat.len() < fixed || (!self.variadic && flat.len() != fixed) {
            return None;
        }
        let mut rest = flat.into_iter();
        let last = counts.len() - 1;
        let mut segments = Vec::with_capacity(counts.len());
        for (i, count) in counts.iter().enumerate() {
            if i == last {
                segments.push(rest.by_ref().collect());
            } else {
                segments.push(rest.by_ref().take(*count).collect());
            }
        }
        Some(segments)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceKind {
    Empty,
    Clone,
    Assembly,
    Import,
    Argument,
    ArgumentSeg,
    #[serde(rename = "SELF")]
    SelfType,
    Subtype,
    Constraint,
    FieldId,
    Try,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefEntry {
    pub kind: ReferenceKind,
    #[serde(default)]
    pub index: usize,
}

impl RefEntry {
    pub const EMPTY: Self = Self::new(ReferenceKind::Empty, 0);

    pub const fn new(kind: ReferenceKind, index: usize) -> Self {
        Self { kind, index }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintKind {
    Exist,
    Same,
    Base,
    Interface,
    TraitAssembly,
    TraitImport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericConstraint {
    pub kind: ConstraintKind,
    /// Trait id (local or import index) for trait constraints.
    #[serde(default)]
    pub index: usize,
    pub target: usize,
    #[serde(default)]
    pub arguments: Vec<usize>,
    #[serde(default)]
    pub export_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericDeclaration {
    #[serde(default)]
    pub parameters: GenericDefinition,
    #[serde(default)]
    pub constraints: Vec<GenericConstraint>,
    #[serde(default)]
    pub refs: Vec<RefEntry>,
    #[serde(default)]
    pub names: Vec<String>,
}

impl GenericDeclaration {
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Names referenced through `CONSTRAINT` entries, in RefList order.
    pub fn constraint_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.refs
            .iter()
            .filter(|e| e.kind == ReferenceKind::Constraint)
            .filter_map(|e| self.name(e.index))
    }
}
