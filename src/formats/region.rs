//! Bounds-checked access to a finite byte region.
//!
//! Every decode goes through [`decode`], which checks `offset + size_of::<T>()`
//! against the region length before touching any byte. Nothing here panics on
//! hostile offsets; out-of-range requests come back as [`BoundsError`].

use byteorder::{ByteOrder, LittleEndian};
use memchr::memchr;
use thiserror::Error;

/// A read that would leave the region.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("read of {len} bytes at offset {offset:#x} exceeds region of {size} bytes")]
pub struct BoundsError {
    pub offset: usize,
    pub len: usize,
    pub size: usize,
}

pub type Result<T> = std::result::Result<T, BoundsError>;

/// Fixed-width values that can be decoded from raw bytes.
pub trait Decode: Sized + Copy {
    const SIZE: usize;

    /// Decode from exactly `Self::SIZE` bytes.
    fn decode_from<E: ByteOrder>(bytes: &[u8]) -> Self;
}

impl Decode for u8 {
    const SIZE: usize = 1;

    #[inline(always)]
    fn decode_from<E: ByteOrder>(bytes: &[u8]) -> Self {
        bytes[0]
    }
}

macro_rules! impl_decode {
    ($ty:ty, $size:expr, $read:ident) => {
        impl Decode for $ty {
            const SIZE: usize = $size;

            #[inline(always)]
            fn decode_from<E: ByteOrder>(bytes: &[u8]) -> Self {
                E::$read(bytes)
            }
        }
    };
}

impl_decode!(u16, 2, read_u16);
impl_decode!(u32, 4, read_u32);
impl_decode!(u64, 8, read_u64);
impl_decode!(i16, 2, read_i16);
impl_decode!(i32, 4, read_i32);
impl_decode!(i64, 8, read_i64);

/// Decode a `T` at `offset` in the given byte order.
///
/// The bound is inclusive: a value ending exactly at `bytes.len()` decodes.
#[inline]
pub fn decode<T: Decode, E: ByteOrder>(bytes: &[u8], offset: usize) -> Result<T> {
    let end = offset.checked_add(T::SIZE).ok_or(BoundsError {
        offset,
        len: T::SIZE,
        size: bytes.len(),
    })?;
    let raw = bytes.get(offset..end).ok_or(BoundsError {
        offset,
        len: T::SIZE,
        size: bytes.len(),
    })?;
    Ok(T::decode_from::<E>(raw))
}

/// Little-endian shorthand for [`decode`]. Both container formats are LE.
#[inline]
pub fn decode_le<T: Decode>(bytes: &[u8], offset: usize) -> Result<T> {
    decode::<T, LittleEndian>(bytes, offset)
}

/// A read-only view over a finite byte region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRegion<'a> {
    data: &'a [u8],
}

impl<'a> ByteRegion<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    /// Decode a little-endian value at `offset`.
    #[inline]
    pub fn read_at<T: Decode>(&self, offset: usize) -> Result<T> {
        decode_le(self.data, offset)
    }

    /// Decode a value at `offset` in an explicit byte order.
    #[inline]
    pub fn read_at_order<T: Decode, E: ByteOrder>(&self, offset: usize) -> Result<T> {
        decode::<T, E>(self.data, offset)
    }

    /// Borrow `len` bytes starting at `offset`.
    pub fn substring(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or(BoundsError {
                offset,
                len,
                size: self.data.len(),
            })
    }

    /// A narrower region sharing the same lifetime.
    pub fn sub_region(&self, offset: usize, len: usize) -> Result<ByteRegion<'a>> {
        self.substring(offset, len).map(ByteRegion::new)
    }

    /// Bytes from `offset` up to the first NUL, or `None` when the region
    /// ends first. An offset past the end is a [`BoundsError`].
    pub fn terminated_at(&self, offset: usize) -> Result<Option<&'a [u8]>> {
        let tail = self.data.get(offset..).ok_or(BoundsError {
            offset,
            len: 0,
            size: self.data.len(),
        })?;
        Ok(memchr(0, tail).map(|end| &tail[..end]))
    }

    /// NUL-terminated string at `offset`, without the terminator.
    ///
    /// Empty when no terminator exists before the end of the region.
    pub fn c_string(&self, offset: usize) -> Result<&'a [u8]> {
        Ok(self.terminated_at(offset)?.unwrap_or_default())
    }
}

impl<'a> From<&'a [u8]> for ByteRegion<'a> {
    fn from(data: &'a [u8]) -> Self {
        Self::new(data)
    }
}

/// Decode a fixed-size, NUL-padded name field (section names, symbol names).
pub fn padded_name(raw: &[u8]) -> String {
    let name = ByteRegion::new(raw)
        .terminated_at(0)
        .ok()
        .flatten()
        .unwrap_or(raw);
    String::from_utf8_lossy(name).into_owned()
}
