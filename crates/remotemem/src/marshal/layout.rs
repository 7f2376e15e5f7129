//! Native layout of fixed-size values.
//!
//! [`NativeValue`] replaces blind reinterpretation of remote bytes: every
//! supported type states its byte size and decodes itself from a slice of
//! exactly that size, rejecting bit patterns that are not valid for it.
//! Byte order is the host's, and struct layouts come from the compiler via
//! `size_of`/`offset_of!`, so a decoded value matches a local instance.

use crate::error::{Error, Result};
use std::mem::size_of;

/// A value with a fixed native byte layout.
pub trait NativeValue: Sized {
    /// Size of the value in bytes, padding included.
    const SIZE: usize;

    /// Build a value from exactly [`Self::SIZE`] bytes.
    fn decode(bytes: &[u8]) -> Result<Self>;

    /// Write the value into exactly [`Self::SIZE`] bytes.
    fn encode(&self, out: &mut [u8]) -> Result<()>;

    /// Encode into a freshly allocated buffer.
    fn to_native_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; Self::SIZE];
        self.encode(&mut buffer)?;
        Ok(buffer)
    }
}

/// Fail unless a buffer has the exact size of the value type.
#[doc(hidden)]
pub fn check_size(type_name: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::size_mismatch(type_name, expected, actual))
    }
}

fn field_window(len: usize, offset: usize, size: usize, type_name: &'static str) -> Result<std::ops::Range<usize>> {
    let end = offset
        .checked_add(size)
        .filter(|end| *end <= len)
        .ok_or_else(|| Error::size_mismatch(type_name, offset.saturating_add(size), len))?;
    Ok(offset..end)
}

/// Decode a struct field located at `offset` inside `bytes`.
#[doc(hidden)]
pub fn decode_field<F: NativeValue>(bytes: &[u8], offset: usize) -> Result<F> {
    let window = field_window(bytes.len(), offset, F::SIZE, std::any::type_name::<F>())?;
    F::decode(&bytes[window])
}

/// Encode a struct field at `offset` inside `out`.
#[doc(hidden)]
pub fn encode_field<F: NativeValue>(value: &F, out: &mut [u8], offset: usize) -> Result<()> {
    let window = field_window(out.len(), offset, F::SIZE, std::any::type_name::<F>())?;
    value.encode(&mut out[window])
}

/// Decode `count` values laid out every `stride` bytes.
///
/// A stride larger than `T::SIZE` skips the tail of each window. A smaller
/// stride describes a packed form: the window is copied into a zeroed
/// buffer of `T::SIZE` bytes before decoding, so the missing bytes are
/// treated as trailing padding.
pub fn decode_array<T: NativeValue>(bytes: &[u8], count: usize, stride: usize) -> Result<Vec<T>> {
    if stride == 0 {
        return Err(Error::invalid_argument("array stride must be non-zero"));
    }
    let total = array_byte_len(count, stride)?;
    check_size(std::any::type_name::<[T]>(), total, bytes.len())?;

    let mut values = Vec::with_capacity(count);
    let mut scratch = vec![0u8; T::SIZE];
    for window in bytes.chunks_exact(stride) {
        if stride >= T::SIZE {
            values.push(T::decode(&window[..T::SIZE])?);
        } else {
            scratch.fill(0);
            scratch[..stride].copy_from_slice(window);
            values.push(T::decode(&scratch)?);
        }
    }
    Ok(values)
}

/// Encode values back to back at their native size.
pub fn encode_array<T: NativeValue>(values: &[T]) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; array_byte_len(values.len(), T::SIZE)?];
    if T::SIZE > 0 {
        for (value, window) in values.iter().zip(buffer.chunks_exact_mut(T::SIZE)) {
            value.encode(window)?;
        }
    }
    Ok(buffer)
}

/// `count * stride`, rejecting overflow.
pub fn array_byte_len(count: usize, stride: usize) -> Result<usize> {
    count.checked_mul(stride).ok_or_else(|| {
        Error::invalid_argument(format!(
            "array of {} elements with stride {} overflows the address space",
            count, stride
        ))
    })
}

macro_rules! impl_native_number {
    ($($value_type:ty),* $(,)?) => {
        $(
            impl NativeValue for $value_type {
                const SIZE: usize = size_of::<$value_type>();

                fn decode(bytes: &[u8]) -> Result<Self> {
                    let raw: [u8; size_of::<$value_type>()] = bytes.try_into().map_err(|_| {
                        Error::size_mismatch(stringify!($value_type), Self::SIZE, bytes.len())
                    })?;
                    Ok(<$value_type>::from_ne_bytes(raw))
                }

                fn encode(&self, out: &mut [u8]) -> Result<()> {
                    check_size(stringify!($value_type), Self::SIZE, out.len())?;
                    out.copy_from_slice(&self.to_ne_bytes());
                    Ok(())
                }
            }
        )*
    };
}

impl_native_number!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64);

impl NativeValue for bool {
    const SIZE: usize = size_of::<bool>();

    fn decode(bytes: &[u8]) -> Result<Self> {
        match u8::decode(bytes).map_err(|_| Error::size_mismatch("bool", Self::SIZE, bytes.len()))? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::invalid_value("bool", format!("byte {:#04x} is neither 0 nor 1", other))),
        }
    }

    fn encode(&self, out: &mut [u8]) -> Result<()> {
        (*self as u8).encode(out)
    }
}

impl NativeValue for char {
    const SIZE: usize = size_of::<char>();

    fn decode(bytes: &[u8]) -> Result<Self> {
        let raw = u32::decode(bytes).map_err(|_| Error::size_mismatch("char", Self::SIZE, bytes.len()))?;
        char::from_u32(raw)
            .ok_or_else(|| Error::invalid_value("char", format!("{:#x} is not a Unicode scalar value", raw)))
    }

    fn encode(&self, out: &mut [u8]) -> Result<()> {
        (*self as u32).encode(out)
    }
}

impl<T: NativeValue, const N: usize> NativeValue for [T; N] {
    const SIZE: usize = T::SIZE * N;

    fn decode(bytes: &[u8]) -> Result<Self> {
        check_size(std::any::type_name::<Self>(), Self::SIZE, bytes.len())?;
        let values = if T::SIZE == 0 {
            (0..N).map(|_| T::decode(&[])).collect::<Result<Vec<T>>>()?
        } else {
            decode_array::<T>(bytes, N, T::SIZE)?
        };
        values
            .try_into()
            .map_err(|_| Error::size_mismatch(std::any::type_name::<Self>(), Self::SIZE, bytes.len()))
    }

    fn encode(&self, out: &mut [u8]) -> Result<()> {
        check_size(std::any::type_name::<Self>(), Self::SIZE, out.len())?;
        if T::SIZE > 0 {
            for (value, window) in self.iter().zip(out.chunks_exact_mut(T::SIZE)) {
                value.encode(window)?;
            }
        }
        Ok(())
    }
}

/// Implement [`NativeValue`] for a `#[repr(C)]` struct.
///
/// Every field must be listed with its type. Offsets and total size are
/// taken from the compiler, so padding is exactly what a local instance
/// has; padding bytes are zeroed on encode and ignored on decode.
///
/// ```rust
/// use remotemem::{native_struct, NativeValue};
///
/// #[repr(C)]
/// #[derive(Debug, PartialEq)]
/// struct Entity {
///     alive: bool,
///     health: u32,
///     position: [f32; 3],
/// }
///
/// native_struct!(Entity { alive: bool, health: u32, position: [f32; 3] });
///
/// assert_eq!(Entity::SIZE, 20);
/// ```
#[macro_export]
macro_rules! native_struct {
    ($struct_type:ty { $($field:ident : $field_type:ty),+ $(,)? }) => {
        impl $crate::NativeValue for $struct_type {
            const SIZE: usize = ::core::mem::size_of::<$struct_type>();

            fn decode(bytes: &[u8]) -> $crate::Result<Self> {
                $crate::marshal::check_size(
                    ::core::any::type_name::<$struct_type>(),
                    <Self as $crate::NativeValue>::SIZE,
                    bytes.len(),
                )?;
                Ok(Self {
                    $(
                        $field: $crate::marshal::decode_field::<$field_type>(
                            bytes,
                            ::core::mem::offset_of!($struct_type, $field),
                        )?,
                    )+
                })
            }

            fn encode(&self, out: &mut [u8]) -> $crate::Result<()> {
                $crate::marshal::check_size(
                    ::core::any::type_name::<$struct_type>(),
                    <Self as $crate::NativeValue>::SIZE,
                    out.len(),
                )?;
                out.fill(0);
                $(
                    $crate::marshal::encode_field::<$field_type>(
                        &self.$field,
                        out,
                        ::core::mem::offset_of!($struct_type, $field),
                    )?;
                )+
                Ok(())
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    #[derive(Debug, Clone, PartialEq)]
    struct Padded {
        flag: u8,
        value: u32,
        small: u16,
    }

    crate::native_struct!(Padded { flag: u8, value: u32, small: u16 });

    #[repr(C)]
    #[derive(Debug, Clone, PartialEq)]
    struct Nested {
        header: Padded,
        coords: [i16; 3],
    }

    crate::native_struct!(Nested { header: Padded, coords: [i16; 3] });

    #[test]
    fn test_number_roundtrip() {
        let bytes = 0x1D8153A4u32.to_native_bytes().unwrap();
        assert_eq!(bytes, 0x1D8153A4u32.to_ne_bytes());
        assert_eq!(u32::decode(&bytes).unwrap(), 0x1D8153A4);
        assert_eq!(f64::decode(&1.5f64.to_ne_bytes()).unwrap(), 1.5);
    }

    #[test]
    fn test_number_size_mismatch() {
        let err = u32::decode(&[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            Error::SizeMismatch {
                type_name: "u32",
                expected: 4,
                actual: 3
            }
        ));
        let mut out = [0u8; 2];
        assert!(42u32.encode(&mut out).is_err());
    }

    #[test]
    fn test_bool_and_char_validation() {
        assert!(bool::decode(&[1]).unwrap());
        assert!(!bool::decode(&[0]).unwrap());
        assert!(matches!(
            bool::decode(&[2]).unwrap_err(),
            Error::InvalidValue { type_name: "bool", .. }
        ));

        assert_eq!(char::decode(&('é' as u32).to_ne_bytes()).unwrap(), 'é');
        assert!(matches!(
            char::decode(&0xD800u32.to_ne_bytes()).unwrap_err(),
            Error::InvalidValue { type_name: "char", .. }
        ));
    }

    #[test]
    fn test_fixed_array() {
        assert_eq!(<[u16; 3]>::SIZE, 6);
        let bytes = [7u16, 8, 9].to_native_bytes().unwrap();
        assert_eq!(<[u16; 3]>::decode(&bytes).unwrap(), [7, 8, 9]);
        assert!(<[u16; 3]>::decode(&bytes[..5]).is_err());
    }

    #[test]
    fn test_struct_layout_matches_compiler() {
        assert_eq!(Padded::SIZE, std::mem::size_of::<Padded>());
        assert_eq!(Padded::SIZE, 12);

        let value = Padded {
            flag: 0xAA,
            value: 0x11223344,
            small: 0x5566,
        };
        let bytes = value.to_native_bytes().unwrap();
        assert_eq!(bytes[0], 0xAA);
        assert_eq!(&bytes[1..4], &[0, 0, 0]);
        assert_eq!(&bytes[4..8], &0x11223344u32.to_ne_bytes());
        assert_eq!(&bytes[8..10], &0x5566u16.to_ne_bytes());
        assert_eq!(Padded::decode(&bytes).unwrap(), value);
    }

    #[test]
    fn test_struct_ignores_padding_on_decode() {
        let mut bytes = Padded {
            flag: 1,
            value: 2,
            small: 3,
        }
        .to_native_bytes()
        .unwrap();
        bytes[1] = 0xFF;
        bytes[11] = 0xFF;
        assert_eq!(
            Padded::decode(&bytes).unwrap(),
            Padded {
                flag: 1,
                value: 2,
                small: 3
            }
        );
    }

    #[test]
    fn test_nested_struct() {
        let value = Nested {
            header: Padded {
                flag: 1,
                value: 99,
                small: 7,
            },
            coords: [-1, 0, 1],
        };
        assert_eq!(Nested::SIZE, std::mem::size_of::<Nested>());
        let bytes = value.to_native_bytes().unwrap();
        assert_eq!(Nested::decode(&bytes).unwrap(), value);
    }

    #[test]
    fn test_decode_array_with_wide_stride() {
        // Each element is a u16 followed by two bytes of junk.
        let mut bytes = Vec::new();
        for v in [10u16, 20, 30] {
            bytes.extend_from_slice(&v.to_ne_bytes());
            bytes.extend_from_slice(&[0xEE, 0xEE]);
        }
        let values: Vec<u16> = decode_array(&bytes, 3, 4).unwrap();
        assert_eq!(values, vec![10, 20, 30]);
    }

    #[test]
    fn test_decode_array_with_packed_stride() {
        // Padded is 12 bytes in memory; a packed wire form drops the tail.
        let mut bytes = Vec::new();
        for flag in [1u8, 2] {
            let mut element = Padded {
                flag,
                value: flag as u32 * 100,
                small: 0,
            }
            .to_native_bytes()
            .unwrap();
            element.truncate(8);
            bytes.extend_from_slice(&element);
        }
        let values: Vec<Padded> = decode_array(&bytes, 2, 8).unwrap();
        assert_eq!(values[0].value, 100);
        assert_eq!(values[1].flag, 2);
        assert_eq!(values[1].small, 0);
    }

    #[test]
    fn test_decode_array_rejects_bad_arguments() {
        assert!(matches!(
            decode_array::<u8>(&[], 1, 0).unwrap_err(),
            Error::InvalidArgument(_)
        ));
        assert!(matches!(
            decode_array::<u32>(&[0; 7], 2, 4).unwrap_err(),
            Error::SizeMismatch { .. }
        ));
        assert!(matches!(
            array_byte_len(usize::MAX, 2).unwrap_err(),
            Error::InvalidArgument(_)
        ));
        assert!(decode_array::<u32>(&[], 0, 4).unwrap().is_empty());
    }

    #[test]
    fn test_encode_array() {
        let bytes = encode_array(&[1u32, 2]).unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[4..], &2u32.to_ne_bytes());
    }
}
