//! Types carried by IR values.
//!
//! Stencil types (`field`, `temp`) describe logical grid storage; the
//! loop-nest dialect adds the concrete `buffer` type produced by layout
//! resolution plus the scalar types used inside lowered bodies.

use std::fmt;

use crate::lower::layout::BufferLayout;

/// Scalar element kinds storable in a grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementKind {
    F32,
    F64,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::F32 => write!(f, "f32"),
            ElementKind::F64 => write!(f, "f64"),
        }
    }
}

/// Allocation tag: which of the three grid dimensions (i, j, k) a field
/// or temporary allocates. A 2D plane stored for every k-level is `ij`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation(pub [bool; 3]);

impl Allocation {
    pub const IJK: Allocation = Allocation([true, true, true]);
    pub const IJ: Allocation = Allocation([true, true, false]);
    pub const IK: Allocation = Allocation([true, false, true]);
    pub const JK: Allocation = Allocation([false, true, true]);

    pub fn rank(&self) -> usize {
        self.0.iter().filter(|d| **d).count()
    }
}

impl fmt::Display for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [char; 3] = ['i', 'j', 'k'];
        for (dim, allocated) in self.0.iter().enumerate() {
            if *allocated {
                write!(f, "{}", NAMES[dim])?;
            }
        }
        Ok(())
    }
}

/// Persistent whole-grid storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldType {
    pub element: ElementKind,
    pub allocation: Allocation,
}

/// Transient per-invocation buffer produced by an apply. Shape entries are
/// `None` until a bound-inference pass fixes them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TempType {
    pub element: ElementKind,
    pub allocation: Allocation,
    pub shape: [Option<i64>; 3],
}

impl TempType {
    pub fn dynamic(element: ElementKind, allocation: Allocation) -> Self {
        Self {
            element,
            allocation,
            shape: [None; 3],
        }
    }

    /// Compatibility for combine operands: equal element type and equal
    /// shape on every dimension except the merge dimension.
    pub fn compatible_except(&self, other: &TempType, dim: usize) -> bool {
        if self.element != other.element {
            return false;
        }
        self.shape
            .iter()
            .zip(other.shape.iter())
            .enumerate()
            .all(|(d, (a, b))| d == dim || a == b)
    }
}

/// Concrete strided memory, the result of layout resolution. Maps a
/// logical index tuple `idx` to `offset + sum(strides[d] * idx[d])`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferType {
    pub element: ElementKind,
    pub layout: BufferLayout,
}

/// The closed set of value types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Type {
    Field(FieldType),
    Temp(TempType),
    Buffer(BufferType),
    Element(ElementKind),
    Index,
    Bool,
}

impl Type {
    pub fn field(element: ElementKind, allocation: Allocation) -> Type {
        Type::Field(FieldType {
            element,
            allocation,
        })
    }

    pub fn temp(element: ElementKind, allocation: Allocation) -> Type {
        Type::Temp(TempType::dynamic(element, allocation))
    }

    /// The grid element kind, for types that store one.
    pub fn element_kind(&self) -> Option<ElementKind> {
        match self {
            Type::Field(t) => Some(t.element),
            Type::Temp(t) => Some(t.element),
            Type::Buffer(t) => Some(t.element),
            Type::Element(e) => Some(*e),
            Type::Index | Type::Bool => None,
        }
    }

    pub fn is_field(&self) -> bool {
        matches!(self, Type::Field(_))
    }

    pub fn is_temp(&self) -> bool {
        matches!(self, Type::Temp(_))
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self, Type::Buffer(_))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Field(t) => write!(f, "field<{}, {}>", t.allocation, t.element),
            Type::Temp(t) => {
                write!(f, "temp<{}, {}", t.allocation, t.element)?;
                if t.shape.iter().any(|s| s.is_some()) {
                    write!(f, ", [")?;
                    for (d, extent) in t.shape.iter().enumerate() {
                        if d > 0 {
                            write!(f, ", ")?;
                        }
                        match extent {
                            Some(n) => write!(f, "{}", n)?,
                            None => write!(f, "?")?,
                        }
                    }
                    write!(f, "]")?;
                }
                write!(f, ">")
            }
            Type::Buffer(t) => write!(
                f,
                "buffer<{}, shape [{}, {}, {}], strides [{}, {}, {}], offset {}>",
                t.element,
                t.layout.shape[0],
                t.layout.shape[1],
                t.layout.shape[2],
                t.layout.strides[0],
                t.layout.strides[1],
                t.layout.strides[2],
                t.layout.offset,
            ),
            Type::Element(e) => write!(f, "{}", e),
            Type::Index => write!(f, "index"),
            Type::Bool => write!(f, "bool"),
        }
    }
}
