//! Typed, homogeneous data columns.
//!
//! [`Column`] is the unit of data exchanged with both collaborators:
//! stream engines store and return block data as columns, and the
//! communicator ships columns between workers. [`Scalar`] maps a Rust
//! element type onto its column variant so callers can stay generic.

use std::fmt;

/// Element type tag of a [`Column`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32-bit IEEE float.
    F32,
    /// 64-bit IEEE float.
    F64,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// 64-bit unsigned integer.
    U64,
}

impl DType {
    /// Stable wire tag used by the on-disk step format.
    pub fn tag(self) -> u8 {
        match self {
            Self::F32 => 0,
            Self::F64 => 1,
            Self::I32 => 2,
            Self::I64 => 3,
            Self::U64 => 4,
        }
    }

    /// Inverse of [`tag`](DType::tag).
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::F32),
            1 => Some(Self::F64),
            2 => Some(Self::I32),
            3 => Some(Self::I64),
            4 => Some(Self::U64),
            _ => None,
        }
    }

    /// Size of one element in bytes.
    pub fn size_of(self) -> usize {
        match self {
            Self::F32 | Self::I32 => 4,
            Self::F64 | Self::I64 | Self::U64 => 8,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U64 => "u64",
        };
        f.write_str(name)
    }
}

/// A homogeneous vector of one of the supported element types.
#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    /// `f32` elements.
    F32(Vec<f32>),
    /// `f64` elements.
    F64(Vec<f64>),
    /// `i32` elements.
    I32(Vec<i32>),
    /// `i64` elements.
    I64(Vec<i64>),
    /// `u64` elements.
    U64(Vec<u64>),
}

impl Column {
    /// Element type of this column.
    pub fn dtype(&self) -> DType {
        match self {
            Self::F32(_) => DType::F32,
            Self::F64(_) => DType::F64,
            Self::I32(_) => DType::I32,
            Self::I64(_) => DType::I64,
            Self::U64(_) => DType::U64,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::U64(v) => v.len(),
        }
    }

    /// Whether the column has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// An empty column of the given type.
    pub fn empty(dtype: DType) -> Self {
        match dtype {
            DType::F32 => Self::F32(Vec::new()),
            DType::F64 => Self::F64(Vec::new()),
            DType::I32 => Self::I32(Vec::new()),
            DType::I64 => Self::I64(Vec::new()),
            DType::U64 => Self::U64(Vec::new()),
        }
    }

    /// Convert into a typed vector, returning the column unchanged on a
    /// type mismatch.
    pub fn into_vec<T: Scalar>(self) -> Result<Vec<T>, Column> {
        T::unwrap_column(self)
    }
}

/// An element type that can be carried in a [`Column`].
pub trait Scalar: Copy + Send + 'static {
    /// The column variant for this type.
    const DTYPE: DType;

    /// Wrap a typed vector in its column variant.
    fn wrap_column(values: Vec<Self>) -> Column;

    /// Unwrap a column of this type; mismatches hand the column back.
    fn unwrap_column(column: Column) -> Result<Vec<Self>, Column>;
}

macro_rules! impl_scalar {
    ($ty:ty, $variant:ident) => {
        impl Scalar for $ty {
            const DTYPE: DType = DType::$variant;

            fn wrap_column(values: Vec<Self>) -> Column {
                Column::$variant(values)
            }

            fn unwrap_column(column: Column) -> Result<Vec<Self>, Column> {
                match column {
                    Column::$variant(v) => Ok(v),
                    other => Err(other),
                }
            }
        }
    };
}

impl_scalar!(f32, F32);
impl_scalar!(f64, F64);
impl_scalar!(i32, I32);
impl_scalar!(i64, I64);
impl_scalar!(u64, U64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dtype_tags_roundtrip() {
        for dtype in [DType::F32, DType::F64, DType::I32, DType::I64, DType::U64] {
            assert_eq!(DType::from_tag(dtype.tag()), Some(dtype));
        }
        assert_eq!(DType::from_tag(200), None);
    }

    #[test]
    fn into_vec_matches_type() {
        let col = f64::wrap_column(vec![1.0, 2.0]);
        assert_eq!(col.dtype(), DType::F64);
        assert_eq!(col.len(), 2);
        assert_eq!(col.into_vec::<f64>().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn into_vec_mismatch_returns_column() {
        let col = Column::I32(vec![7]);
        let back = col.clone().into_vec::<i64>().unwrap_err();
        assert_eq!(back, col);
    }

    #[test]
    fn empty_column_has_requested_type() {
        let col = Column::empty(DType::U64);
        assert!(col.is_empty());
        assert_eq!(col.dtype(), DType::U64);
    }
}
