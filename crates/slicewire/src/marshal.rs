// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed encode/decode contract and tagged-member helpers.
//!
//! [`Marshal`] and [`Unmarshal`] are implemented for the built-in scalar
//! types, strings, sequences and dictionaries. Generated code implements
//! them for structs and calls [`write_tagged`]/[`read_tagged`] for tagged
//! members, which pick the tag format from [`WireType`].
//!
//! | Type                          | Tag format | Extra size |
//! |-------------------------------|------------|------------|
//! | `bool`, `u8`                  | F1         | no         |
//! | `i16`                         | F2         | no         |
//! | `i32`, `f32`                  | F4         | no         |
//! | `i64`, `f64`                  | F8         | no         |
//! | strings, byte-wide sequences  | VSize      | no         |
//! | fixed-element seqs / dicts    | VSize      | yes        |
//! | anything else                 | FSize      | i32 length |

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use crate::encoding::OptionalFormat;
use crate::error::Result;
use crate::input::InputStream;
use crate::output::OutputStream;
use crate::primitive::size_width;

/// Wire shape of a type.
pub trait WireType {
    /// Format used when the type is a tagged member.
    const OPTIONAL_FORMAT: OptionalFormat;

    /// Encoded width when every value has the same one.
    const FIXED_SIZE: Option<usize> = None;

    /// Fewest bytes one element can take, for sequence-size checks.
    const MIN_WIRE_SIZE: usize = 1;

    /// A VSize payload carries its byte length ahead of the value.
    const TAGGED_SIZE_PREFIX: bool = false;
}

/// Types that can be written to an [`OutputStream`].
pub trait Marshal: WireType {
    fn marshal(&self, out: &mut OutputStream<'_>) -> Result<()>;

    /// Byte length announced ahead of a VSize tagged payload.
    fn tagged_len(&self) -> usize {
        Self::FIXED_SIZE.unwrap_or(0)
    }
}

/// Types that can be read from an [`InputStream`].
pub trait Unmarshal: WireType + Sized {
    fn unmarshal(input: &mut InputStream<'_>) -> Result<Self>;
}

macro_rules! impl_scalar {
    ($($ty:ty => $format:ident, $width:expr, $write:ident, $read:ident;)*) => {
        $(
            impl WireType for $ty {
                const OPTIONAL_FORMAT: OptionalFormat = OptionalFormat::$format;
                const FIXED_SIZE: Option<usize> = Some($width);
                const MIN_WIRE_SIZE: usize = $width;
            }

            impl Marshal for $ty {
                fn marshal(&self, out: &mut OutputStream<'_>) -> Result<()> {
                    out.$write(*self);
                    Ok(())
                }
            }

            impl Unmarshal for $ty {
                fn unmarshal(input: &mut InputStream<'_>) -> Result<Self> {
                    input.$read()
                }
            }
        )*
    };
}

impl_scalar! {
    bool => F1, 1, write_bool, read_bool;
    u8 => F1, 1, write_byte, read_byte;
    i16 => F2, 2, write_short, read_short;
    i32 => F4, 4, write_int, read_int;
    i64 => F8, 8, write_long, read_long;
    f32 => F4, 4, write_float, read_float;
    f64 => F8, 8, write_double, read_double;
}

impl WireType for str {
    const OPTIONAL_FORMAT: OptionalFormat = OptionalFormat::VSize;
}

impl Marshal for str {
    fn marshal(&self, out: &mut OutputStream<'_>) -> Result<()> {
        out.write_string(self)
    }
}

impl WireType for String {
    const OPTIONAL_FORMAT: OptionalFormat = OptionalFormat::VSize;
}

impl Marshal for String {
    fn marshal(&self, out: &mut OutputStream<'_>) -> Result<()> {
        out.write_string(self)
    }
}

impl Unmarshal for String {
    fn unmarshal(input: &mut InputStream<'_>) -> Result<Self> {
        input.read_string()
    }
}

/// Sequence layout: VSize for fixed-width elements, FSize otherwise.
const fn seq_format(element: Option<usize>) -> OptionalFormat {
    match element {
        Some(_) => OptionalFormat::VSize,
        None => OptionalFormat::FSize,
    }
}

/// Byte length of `count` fixed-width entries plus their count.
fn fixed_seq_len(count: usize, width: usize) -> usize {
    count * width + size_width(count)
}

impl<T: WireType> WireType for [T] {
    const OPTIONAL_FORMAT: OptionalFormat = seq_format(T::FIXED_SIZE);
    const TAGGED_SIZE_PREFIX: bool = matches!(T::FIXED_SIZE, Some(width) if width > 1);
}

impl<T: Marshal> Marshal for [T] {
    fn marshal(&self, out: &mut OutputStream<'_>) -> Result<()> {
        out.write_size(self.len())?;
        for element in self {
            element.marshal(out)?;
        }
        Ok(())
    }

    fn tagged_len(&self) -> usize {
        fixed_seq_len(self.len(), T::FIXED_SIZE.unwrap_or(0))
    }
}

impl<T: WireType> WireType for Vec<T> {
    const OPTIONAL_FORMAT: OptionalFormat = <[T]>::OPTIONAL_FORMAT;
    const TAGGED_SIZE_PREFIX: bool = <[T]>::TAGGED_SIZE_PREFIX;
}

impl<T: Marshal> Marshal for Vec<T> {
    fn marshal(&self, out: &mut OutputStream<'_>) -> Result<()> {
        self.as_slice().marshal(out)
    }

    fn tagged_len(&self) -> usize {
        self.as_slice().tagged_len()
    }
}

impl<T: Unmarshal> Unmarshal for Vec<T> {
    fn unmarshal(input: &mut InputStream<'_>) -> Result<Self> {
        let count = input.read_and_check_seq_size(T::MIN_WIRE_SIZE)?;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(T::unmarshal(input)?);
        }
        Ok(values)
    }
}

/// Dictionary layout: VSize when both key and value are fixed-width.
const fn dict_format(key: Option<usize>, value: Option<usize>) -> OptionalFormat {
    match (key, value) {
        (Some(_), Some(_)) => OptionalFormat::VSize,
        _ => OptionalFormat::FSize,
    }
}

const fn dict_entry_width(key: Option<usize>, value: Option<usize>) -> usize {
    match (key, value) {
        (Some(k), Some(v)) => k + v,
        _ => 0,
    }
}

macro_rules! impl_dict {
    ($map:ident, $($bound:ident),*) => {
        impl<K: WireType, V: WireType> WireType for $map<K, V> {
            const OPTIONAL_FORMAT: OptionalFormat = dict_format(K::FIXED_SIZE, V::FIXED_SIZE);
            const TAGGED_SIZE_PREFIX: bool =
                matches!(Self::OPTIONAL_FORMAT, OptionalFormat::VSize);
        }

        impl<K: Marshal, V: Marshal> Marshal for $map<K, V> {
            fn marshal(&self, out: &mut OutputStream<'_>) -> Result<()> {
                out.write_size(self.len())?;
                for (key, value) in self {
                    key.marshal(out)?;
                    value.marshal(out)?;
                }
                Ok(())
            }

            fn tagged_len(&self) -> usize {
                fixed_seq_len(self.len(), dict_entry_width(K::FIXED_SIZE, V::FIXED_SIZE))
            }
        }

        impl<K: Unmarshal $(+ $bound)*, V: Unmarshal> Unmarshal for $map<K, V> {
            fn unmarshal(input: &mut InputStream<'_>) -> Result<Self> {
                let count = input.read_and_check_seq_size(K::MIN_WIRE_SIZE + V::MIN_WIRE_SIZE)?;
                let mut map = $map::new();
                for _ in 0..count {
                    let key = K::unmarshal(input)?;
                    let value = V::unmarshal(input)?;
                    map.insert(key, value);
                }
                Ok(map)
            }
        }
    };
}

impl_dict!(BTreeMap, Ord);
impl_dict!(HashMap, Hash, Eq);

/// Write `value` as tagged member `tag`; absent values and 1.0 streams write nothing.
pub fn write_tagged<T: Marshal + ?Sized>(
    out: &mut OutputStream<'_>,
    tag: i32,
    value: Option<&T>,
) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !out.write_opt(tag, T::OPTIONAL_FORMAT)? {
        return Ok(());
    }
    match T::OPTIONAL_FORMAT {
        OptionalFormat::FSize => {
            let pos = out.start_size();
            value.marshal(out)?;
            out.end_size(pos)
        }
        OptionalFormat::VSize if T::TAGGED_SIZE_PREFIX => {
            out.write_size(value.tagged_len())?;
            value.marshal(out)
        }
        _ => value.marshal(out),
    }
}

/// Read tagged member `tag`, or `None` when the stream does not carry it.
pub fn read_tagged<T: Unmarshal>(input: &mut InputStream<'_>, tag: i32) -> Result<Option<T>> {
    if !input.read_opt(tag, T::OPTIONAL_FORMAT)? {
        return Ok(None);
    }
    match T::OPTIONAL_FORMAT {
        OptionalFormat::FSize => input.skip(4)?,
        OptionalFormat::VSize if T::TAGGED_SIZE_PREFIX => input.skip_size()?,
        _ => {}
    }
    T::unmarshal(input).map(Some)
}
