use bytemuck::Pod;
use derive_more::Display;
use dry::{macro_for, macro_wrap};
use num_traits::{AsPrimitive, FromPrimitive, NumAssign, NumCast};
use paste::paste;
use std::fmt::{Debug, Display};

mod sealed {
    #[doc(hidden)]
    pub trait Sealed {}

    macro_rules! impl_sealed {
        ($($t:ty),+) => {
            $(
                impl Sealed for $t {}
            )+
        };
    }

    impl_sealed!(u8, i8, u16, i16, u32, i32, f32, u64, i64, f64);
}
use sealed::Sealed;

/// Element types supported by buffers and tensors.
#[allow(missing_docs)]
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Display)]
pub enum ScalarType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    U64,
    I64,
    F64,
}

impl ScalarType {
    /// Size of the type in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        use ScalarType::*;
        match self {
            U8 | I8 => 1,
            U16 | I16 => 2,
            U32 | I32 | F32 => 4,
            U64 | I64 | F64 => 8,
        }
    }
    /// Name of the type.
    ///
    /// Lowercase, ie "u8", "i32", etc.
    #[inline]
    pub fn name(&self) -> &'static str {
        use ScalarType::*;
        match self {
            U8 => "u8",
            I8 => "i8",
            U16 => "u16",
            I16 => "i16",
            U32 => "u32",
            I32 => "i32",
            F32 => "f32",
            U64 => "u64",
            I64 => "i64",
            F64 => "f64",
        }
    }
}

#[cfg(feature = "cuda")]
/// Base trait for numerical types.
pub trait Scalar:
    Default
    + Copy
    + 'static
    + Send
    + Sync
    + NumCast
    + FromPrimitive
    + NumAssign
    + PartialEq
    + PartialOrd
    + Pod
    + Debug
    + Display
    + cust::memory::DeviceCopy
    + Sealed
{
    /// The [`ScalarType`] of the scalar.
    const SCALAR_TYPE: ScalarType;
    /// Converts `index` with `as` semantics, wrapping past the type's range.
    fn from_index(index: usize) -> Self;
    /// Casts `self as T`.
    fn cast<T: Scalar>(self) -> T;
}

#[cfg(not(feature = "cuda"))]
/// Base trait for numerical types.
pub trait Scalar:
    Default
    + Copy
    + 'static
    + Send
    + Sync
    + NumCast
    + FromPrimitive
    + NumAssign
    + PartialEq
    + PartialOrd
    + Pod
    + Debug
    + Display
    + Sealed
{
    /// The [`ScalarType`] of the scalar.
    const SCALAR_TYPE: ScalarType;
    /// Converts `index` with `as` semantics, wrapping past the type's range.
    fn from_index(index: usize) -> Self;
    /// Casts `self as T`.
    fn cast<T: Scalar>(self) -> T;
}

macro_for!($X in [u8, i8, u16, i16, u32, i32, f32, u64, i64, f64] {
    paste! {
        impl Scalar for $X {
            const SCALAR_TYPE: ScalarType = ScalarType::[<$X:upper>];
            #[inline(always)]
            fn from_index(index: usize) -> Self {
                index as $X
            }
            #[inline]
            fn cast<T: Scalar>(self) -> T {
                macro_wrap!(match T::SCALAR_TYPE {
                    macro_for!($Y in [u8, i8, u16, i16, u32, i32, f32, u64, i64, f64] {
                        $Y::SCALAR_TYPE => bytemuck::cast(AsPrimitive::<$Y>::as_(self)),
                    })
                })
            }
        }
    }
});
