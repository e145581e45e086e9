// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Text transcoding between native representations and wire UTF-8.
//!
//! Strings are UTF-8 on the wire. Rust `&str` already is, so only two paths
//! transcode: wide strings (UTF-16 code units) and "native" narrow strings
//! whose encoding is described by an installed [`StringConverter`].

use crate::error::{Error, Result};

/// Narrow-string codec between a native byte encoding and UTF-8.
pub trait StringConverter: Send + Sync {
    /// Append the UTF-8 form of `native` to `out`.
    fn to_utf8(&self, native: &[u8], out: &mut Vec<u8>) -> Result<()>;

    /// Native form of `utf8`.
    fn from_utf8(&self, utf8: &[u8]) -> Result<Vec<u8>>;
}

/// ISO-8859-1 native strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct Latin1Converter;

impl StringConverter for Latin1Converter {
    fn to_utf8(&self, native: &[u8], out: &mut Vec<u8>) -> Result<()> {
        out.reserve(native.len());
        for &b in native {
            if b < 0x80 {
                out.push(b);
            } else {
                out.push(0xC0 | (b >> 6));
                out.push(0x80 | (b & 0x3F));
            }
        }
        Ok(())
    }

    fn from_utf8(&self, utf8: &[u8]) -> Result<Vec<u8>> {
        let text = std::str::from_utf8(utf8).map_err(|e| Error::StringConversion(e.to_string()))?;
        text.chars()
            .map(|c| {
                u8::try_from(u32::from(c)).map_err(|_| {
                    Error::StringConversion(format!(
                        "character U+{:04X} has no Latin-1 representation",
                        u32::from(c)
                    ))
                })
            })
            .collect()
    }
}

/// Append the UTF-8 form of UTF-16 `units` to `out`.
pub(crate) fn utf16_to_utf8(units: &[u16], out: &mut Vec<u8>) -> Result<()> {
    let mut scratch = [0u8; 4];
    for decoded in char::decode_utf16(units.iter().copied()) {
        let c = decoded.map_err(|e| {
            Error::StringConversion(format!(
                "unpaired surrogate 0x{:04X}",
                e.unpaired_surrogate()
            ))
        })?;
        out.extend_from_slice(c.encode_utf8(&mut scratch).as_bytes());
    }
    Ok(())
}

pub(crate) fn utf8_to_utf16(bytes: &[u8]) -> Result<Vec<u16>> {
    let text = std::str::from_utf8(bytes).map_err(|e| Error::StringConversion(e.to_string()))?;
    Ok(text.encode_utf16().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latin1_roundtrip_expands_high_bytes() {
        let native = b"caf\xE9";
        let mut utf8 = Vec::new();
        Latin1Converter
            .to_utf8(native, &mut utf8)
            .expect("to_utf8 should succeed");
        assert_eq!(utf8, "café".as_bytes());
        assert_eq!(
            Latin1Converter.from_utf8(&utf8).expect("from_utf8 should succeed"),
            native.to_vec()
        );
    }

    #[test]
    fn test_latin1_rejects_wide_characters() {
        let err = Latin1Converter.from_utf8("€".as_bytes()).unwrap_err();
        match err {
            Error::StringConversion(reason) => assert!(reason.contains("U+20AC")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_utf16_surrogate_pairs() {
        let units: Vec<u16> = "a😀".encode_utf16().collect();
        let mut out = Vec::new();
        utf16_to_utf8(&units, &mut out).expect("transcode");
        assert_eq!(out, "a😀".as_bytes());
        assert_eq!(utf8_to_utf16(&out).expect("transcode back"), units);
    }

    #[test]
    fn test_utf16_unpaired_surrogate_fails() {
        let mut out = Vec::new();
        let err = utf16_to_utf8(&[0x0041, 0xD800], &mut out).unwrap_err();
        assert_eq!(
            err,
            Error::StringConversion("unpaired surrogate 0xD800".to_string())
        );
        assert!(utf8_to_utf16(&[0xFF]).is_err());
    }
}
