//! Alignment helpers for integers.

/// Integers that can be rounded to a power-of-two boundary.
pub trait AlignableTo: Sized + Copy {
    /// Round up to the next multiple of `align`. `align` must be a power of two.
    fn align_up(self, align: Self) -> Self;
    /// Round down to a multiple of `align`. `align` must be a power of two.
    fn align_down(self, align: Self) -> Self;
    /// Whether the value is already a multiple of `align`.
    fn is_aligned(self, align: Self) -> bool;
}

macro_rules! impl_alignable {
    ($($ty: ty),+) => {
        $(
            impl AlignableTo for $ty {
                #[inline(always)]
                fn align_up(self, align: $ty) -> $ty {
                    (self + align - 1) & !(align - 1)
                }
                #[inline(always)]
                fn align_down(self, align: $ty) -> $ty {
                    self & !(align - 1)
                }
                #[inline(always)]
                fn is_aligned(self, align: $ty) -> bool {
                    self & (align - 1) == 0
                }
            }
        )+
    };
}

impl_alignable!(u32, u64, usize);

#[cfg(test)]
mod tests {
    use super::AlignableTo;

    #[test]
    fn align_up_rounds_to_boundary() {
        assert_eq!(5usize.align_up(4), 8);
        assert_eq!(8usize.align_up(4), 8);
        assert_eq!(0u32.align_up(8), 0);
        assert_eq!(17u64.align_down(8), 16);
        assert!(12usize.is_aligned(4));
        assert!(!13usize.is_aligned(4));
    }
}
