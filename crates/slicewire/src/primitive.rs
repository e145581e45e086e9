// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Size encoding and string codec on top of [`Buffer`].
//!
//! `Size`: one byte for `0..=254`, otherwise the marker byte 255 followed by
//! a 4-byte little-endian integer.
//!
//! Strings: `Size` byte length, then raw UTF-8. When the UTF-8 length is only
//! known after transcoding, [`Buffer::write_converted`] writes a guessed size,
//! transcodes in place and patches the size afterwards, moving the payload by
//! 4 bytes when the size changed encoded width.

use crate::buffer::Buffer;
use crate::config::{SIZE_MARKER, SIZE_ONE_BYTE_MAX};
use crate::error::{Error, Result};

/// Encoded width of a `Size` value.
#[inline]
pub fn size_width(value: usize) -> usize {
    if value > SIZE_ONE_BYTE_MAX as usize {
        5
    } else {
        1
    }
}

/// Decode a `Size` from the front of `bytes`: `(value, consumed)`.
pub(crate) fn peek_size(bytes: &[u8]) -> Option<(usize, usize)> {
    match *bytes.first()? {
        SIZE_MARKER => {
            let raw: [u8; 4] = bytes.get(1..5)?.try_into().ok()?;
            let value = usize::try_from(i32::from_le_bytes(raw)).ok()?;
            Some((value, 5))
        }
        b => Some((b as usize, 1)),
    }
}

fn wire_size(value: usize) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::marshal(format!("size {} exceeds the wire limit", value)))
}

impl Buffer {
    pub fn write_size(&mut self, value: usize) -> Result<()> {
        let value = wire_size(value)?;
        if value > SIZE_ONE_BYTE_MAX as i32 {
            self.write_scalar(SIZE_MARKER);
            self.write_scalar(value);
        } else {
            self.write_scalar(value as u8);
        }
        Ok(())
    }

    pub fn read_size(&mut self) -> Result<usize> {
        let first: u8 = self.read_scalar()?;
        if first != SIZE_MARKER {
            return Ok(first as usize);
        }
        let value: i32 = self.read_scalar()?;
        usize::try_from(value).map_err(|_| Error::marshal(format!("negative size {}", value)))
    }

    pub fn skip_size(&mut self) -> Result<()> {
        if self.read_scalar::<u8>()? == SIZE_MARKER {
            self.skip(4)?;
        }
        Ok(())
    }

    /// Overwrite a `Size` at `pos`; the caller guarantees the width matches.
    pub(crate) fn rewrite_size(&mut self, value: usize, pos: usize) -> Result<()> {
        let value = wire_size(value)?;
        if value > SIZE_ONE_BYTE_MAX as i32 {
            self.write_scalar_at(pos, SIZE_MARKER)?;
            self.write_scalar_at(pos + 1, value)
        } else {
            self.write_scalar_at(pos, value as u8)
        }
    }

    /// `Size` length prefix followed by the bytes.
    pub fn write_sized_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_size(bytes.len())?;
        self.write(bytes);
        Ok(())
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_size()?;
        if len == 0 {
            return Ok(String::new());
        }
        let bytes = self.read(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| Error::StringConversion(e.to_string()))
    }

    /// Guess the UTF-8 length, let `transcode` append the payload, then
    /// patch the size (moving the payload when the size width changed).
    pub(crate) fn write_converted<F>(&mut self, guess: usize, transcode: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<u8>) -> Result<()>,
    {
        self.write_size(guess)?;
        let first = self.len();
        transcode(self.data_mut())?;
        let last = self.len();
        let actual = last - first;
        if actual == guess {
            return Ok(());
        }

        let guessed_width = size_width(guess);
        let actual_width = size_width(actual);
        let size_pos = first - guessed_width;
        if guessed_width < actual_width {
            let data = self.data_mut();
            data.resize(last + 4, 0);
            data.copy_within(first..last, first + 4);
        } else if guessed_width > actual_width {
            let data = self.data_mut();
            data.copy_within(first..last, first - 4);
            data.truncate(last - 4);
        }
        self.rewrite_size(actual, size_pos)
    }
}
