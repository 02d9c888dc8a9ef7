use enum_dispatch::enum_dispatch;

#[enum_dispatch]
pub trait HasLayout {
    fn size(&self) -> usize;
    fn alignment(&self) -> usize;
}

#[enum_dispatch(HasLayout)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayoutManager {
    FieldLayoutManager,
    PointerLayout,
    NativeLayout,
}

impl LayoutManager {
    pub fn type_tag(&self) -> &'static str {
        match self {
            LayoutManager::FieldLayoutManager(_) => "struct",
            LayoutManager::PointerLayout(_) => "ptr",
            LayoutManager::NativeLayout(_) => "native",
        }
    }

    pub fn as_fields(&self) -> Option<&FieldLayoutManager> {
        match self {
            LayoutManager::FieldLayoutManager(f) => Some(f),
            _ => None,
        }
    }
}

pub(crate) fn align_up(value: usize, align: usize) -> usize {
    let misalignment = value % align;
    if misalignment == 0 {
        value
    } else {
        value + align - misalignment
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldLayout {
    pub position: usize,
    pub size: usize,
    pub alignment: usize,
}

impl FieldLayout {
    pub fn as_range(&self) -> std::ops::Range<usize> {
        self.position..self.position + self.size
    }
}

/// Sequential field layout. Offsets follow declared order; the size is the end of
/// the last field without trailing padding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldLayoutManager {
    pub fields: Vec<FieldLayout>,
    pub total_size: usize,
    pub alignment: usize,
}

impl Default for FieldLayoutManager {
    fn default() -> Self {
        Self {
            fields: vec![],
            total_size: 0,
            alignment: 1,
        }
    }
}

impl HasLayout for FieldLayoutManager {
    fn size(&self) -> usize {
        self.total_size
    }

    fn alignment(&self) -> usize {
        self.alignment
    }
}

impl FieldLayoutManager {
    /// Lays out `(size, alignment)` pairs in order.
    pub fn new(fields: impl IntoIterator<Item = (usize, usize)>) -> Self {
        Self::default().extend(fields)
    }

    /// Appends fields after the existing ones, keeping their positions.
    pub fn extend(&self, fields: impl IntoIterator<Item = (usize, usize)>) -> Self {
        let mut result = self.clone();
        let mut offset = self.total_size;
        for (size, alignment) in fields {
            let alignment = alignment.max(1);
            offset = align_up(offset, alignment);
            result.fields.push(FieldLayout {
                position: offset,
                size,
                alignment,
            });
            offset += size;
            result.alignment = result.alignment.max(alignment);
        }
        result.total_size = offset;
        result
    }

    pub fn field(&self, index: usize) -> Option<&FieldLayout> {
        self.fields.get(index)
    }
}

/// Pointer-sized storage used by reference-like types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PointerLayout {
    pub size: usize,
}

impl HasLayout for PointerLayout {
    fn size(&self) -> usize {
        self.size
    }

    fn alignment(&self) -> usize {
        self.size
    }
}

/// Externally managed storage registered for a native type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NativeLayout {
    pub size: usize,
    pub alignment: usize,
}

impl HasLayout for NativeLayout {
    fn size(&self) -> usize {
        self.size
    }

    fn alignment(&self) -> usize {
        self.alignment
    }
}
