// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Growable byte buffer with a read cursor.
//!
//! Writers append at the end and patch placeholders with [`Buffer::write_at`];
//! readers consume from [`Buffer::position`]. Every multi-byte primitive goes
//! through [`WireScalar`], the single place where host values are converted
//! to and from the little-endian wire order.

use crate::error::{Error, Result};

/// Fixed-width primitive with a little-endian wire representation.
pub trait WireScalar: Copy {
    /// Encoded width in bytes.
    const SIZE: usize;

    /// Encode into `dst` (exactly `SIZE` bytes).
    fn put(self, dst: &mut [u8]);

    /// Decode from `src` (exactly `SIZE` bytes).
    fn get(src: &[u8]) -> Self;
}

/// Generate [`WireScalar`] for numeric types (`to_le_bytes`/`from_le_bytes`).
///
/// Big-endian hosts byte-swap here and nowhere else.
macro_rules! impl_wire_scalar {
    ($($type:ty),* $(,)?) => {
        $(
            impl WireScalar for $type {
                const SIZE: usize = std::mem::size_of::<$type>();

                #[inline]
                fn put(self, dst: &mut [u8]) {
                    dst.copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn get(src: &[u8]) -> Self {
                    let mut bytes = [0u8; std::mem::size_of::<$type>()];
                    bytes.copy_from_slice(src);
                    <$type>::from_le_bytes(bytes)
                }
            }
        )*
    };
}

impl_wire_scalar!(u8, i16, i32, i64, f32, f64);

impl WireScalar for bool {
    const SIZE: usize = 1;

    #[inline]
    fn put(self, dst: &mut [u8]) {
        dst[0] = u8::from(self);
    }

    #[inline]
    fn get(src: &[u8]) -> Self {
        src[0] != 0
    }
}

/// Owned byte storage plus a read cursor (`0 <= position <= len`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buffer {
    data: Vec<u8>,
    pos: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            pos: 0,
        }
    }

    /// Wrap received bytes; the cursor starts at 0.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Move the cursor; fails past the end.
    pub fn set_position(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::out_of_bounds(pos, 0, self.data.len()));
        }
        self.pos = pos;
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Grow or shrink the storage; the cursor is clamped.
    pub fn resize(&mut self, len: usize) {
        self.data.resize(len, 0);
        self.pos = self.pos.min(len);
    }

    /// Drop every byte and rewind.
    pub fn reset(&mut self) {
        self.data.clear();
        self.pos = 0;
    }

    /// Append at the end.
    #[inline]
    pub fn write(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Overwrite `bytes.len()` bytes at `pos` without growing.
    pub fn write_at(&mut self, pos: usize, bytes: &[u8]) -> Result<()> {
        let end = pos
            .checked_add(bytes.len())
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| Error::out_of_bounds(pos, bytes.len(), self.data.len()))?;
        self.data[pos..end].copy_from_slice(bytes);
        Ok(())
    }

    #[inline]
    pub fn write_scalar<T: WireScalar>(&mut self, value: T) {
        let start = self.data.len();
        self.data.resize(start + T::SIZE, 0);
        value.put(&mut self.data[start..]);
    }

    /// Patch a previously reserved scalar.
    pub fn write_scalar_at<T: WireScalar>(&mut self, pos: usize, value: T) -> Result<()> {
        let end = pos
            .checked_add(T::SIZE)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| Error::out_of_bounds(pos, T::SIZE, self.data.len()))?;
        value.put(&mut self.data[pos..end]);
        Ok(())
    }

    /// Borrow `n` bytes at the cursor and advance.
    #[inline]
    pub fn read(&mut self, n: usize) -> Result<&[u8]> {
        if n > self.remaining() {
            return Err(Error::out_of_bounds(self.pos, n, self.remaining()));
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.data[start..self.pos])
    }

    #[inline]
    pub fn read_scalar<T: WireScalar>(&mut self) -> Result<T> {
        let bytes = self.read(T::SIZE)?;
        Ok(T::get(bytes))
    }

    /// Byte at the cursor, without advancing.
    pub fn peek(&self) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| Error::out_of_bounds(self.pos, 1, 0))
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        if n > self.remaining() {
            return Err(Error::out_of_bounds(self.pos, n, self.remaining()));
        }
        self.pos += n;
        Ok(())
    }

    /// Step the cursor back over bytes already consumed.
    pub fn rewind(&mut self, n: usize) -> Result<()> {
        self.pos = self
            .pos
            .checked_sub(n)
            .ok_or_else(|| Error::out_of_bounds(self.pos, n, 0))?;
        Ok(())
    }

    /// Bytes in `start..end`, independent of the cursor.
    pub fn slice(&self, start: usize, end: usize) -> Result<&[u8]> {
        if start > end || end > self.data.len() {
            return Err(Error::out_of_bounds(start, end.saturating_sub(start), self.data.len()));
        }
        Ok(&self.data[start..end])
    }

    pub(crate) fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }
}
