//! Unaligned little-endian integer types.
//!
//! Both ELF classes this crate handles are `ELFDATA2LSB`, so these types fix
//! the byte order and vary only the width. They are backed by byte arrays,
//! which keeps their alignment at 1 and allows file format records to be
//! cast at arbitrary offsets within the input.

use crate::pod::Pod;

macro_rules! unaligned_int {
    ($($(#[$doc:meta])* $name:ident($prim:ty, $size:literal),)+) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
            #[repr(transparent)]
            pub struct $name(pub [u8; $size]);

            impl $name {
                /// Construct a new value.
                #[inline]
                pub fn new(n: $prim) -> Self {
                    $name(n.to_le_bytes())
                }

                /// Get the value.
                #[inline]
                pub fn get(self) -> $prim {
                    <$prim>::from_le_bytes(self.0)
                }

                /// Set the value.
                #[inline]
                pub fn set(&mut self, n: $prim) {
                    self.0 = n.to_le_bytes();
                }
            }

            impl From<$prim> for $name {
                #[inline]
                fn from(n: $prim) -> Self {
                    $name::new(n)
                }
            }

            // Safety: repr(transparent) over a byte array; no padding, no
            // invalid values.
            unsafe impl Pod for $name {}
        )+
    };
}

unaligned_int! {
    /// An unaligned little-endian `u16`.
    U16(u16, 2),
    /// An unaligned little-endian `u32`.
    U32(u32, 4),
    /// An unaligned little-endian `u64`.
    U64(u64, 8),
    /// An unaligned little-endian `i32`.
    I32(i32, 4),
    /// An unaligned little-endian `i64`.
    I64(i64, 8),
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{align_of, size_of};

    #[test]
    fn layout() {
        assert_eq!(size_of::<U16>(), 2);
        assert_eq!(size_of::<U32>(), 4);
        assert_eq!(size_of::<U64>(), 8);
        assert_eq!(size_of::<I64>(), 8);
        assert_eq!(align_of::<U64>(), 1);
    }

    #[test]
    fn round_trip() {
        assert_eq!(U32::new(0x0123_4567).0, [0x67, 0x45, 0x23, 0x01]);
        assert_eq!(U32([0x67, 0x45, 0x23, 0x01]).get(), 0x0123_4567);
        assert_eq!(I64::new(-4).get(), -4);
        let mut x = U16::new(1);
        x.set(0xff00);
        assert_eq!(x.get(), 0xff00);
    }
}
