//! Numeric element types of a time-window matrix

use std::fmt::Debug;
use std::ops::AddAssign;

/// Element stored in every cell of a [`TimeWindowMatrix`](super::TimeWindowMatrix)
///
/// `FORMAT` follows the numpy-style type code: a kind letter (`f`loat,
/// `i`nteger, `u`nsigned) and the size in bytes, e.g. `"f8"` for `f64`.
pub trait Cell: Copy + Default + PartialEq + AddAssign + Debug + Send + Sync + 'static {
    const FORMAT: &'static str;

    /// The unit increment used by counting evaluators
    fn one() -> Self;

    fn to_f64(self) -> f64;

    fn is_zero(self) -> bool {
        self == Self::default()
    }
}

macro_rules! impl_cell {
    ($($ty:ty => $format:literal, $one:expr;)*) => {
        $(
            impl Cell for $ty {
                const FORMAT: &'static str = $format;

                fn one() -> Self {
                    $one
                }

                fn to_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

impl_cell! {
    f64 => "f8", 1.0;
    f32 => "f4", 1.0;
    i64 => "i8", 1;
    i32 => "i4", 1;
    u64 => "u8", 1;
    u32 => "u4", 1;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_codes() {
        assert_eq!(<f64 as Cell>::FORMAT, "f8");
        assert_eq!(<i32 as Cell>::FORMAT, "i4");
        assert_eq!(<u64 as Cell>::FORMAT, "u8");
    }

    #[test]
    fn test_zero_and_one() {
        assert!(0u32.is_zero());
        assert!(!u32::one().is_zero());
        assert_eq!(i64::one().to_f64(), 1.0);
    }
}
