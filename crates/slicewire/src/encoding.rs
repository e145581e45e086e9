// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Encoding versions, class formats and tagged-member wire formats.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Encoding version carried in every encapsulation header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EncodingVersion {
    pub major: u8,
    pub minor: u8,
}

/// Flat encoding: negative object ids, pending-object batches, no tagged members.
pub const ENCODING_1_0: EncodingVersion = EncodingVersion::new(1, 0);

/// Inline encoding: slice flags, indirection tables, tagged members.
pub const ENCODING_1_1: EncodingVersion = EncodingVersion::new(1, 1);

/// Most recent encoding this engine speaks.
pub const CURRENT_ENCODING: EncodingVersion = ENCODING_1_1;

impl EncodingVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    pub fn is_1_0(self) -> bool {
        self == ENCODING_1_0
    }

    /// Fails with [`Error::UnsupportedEncoding`] for anything above 1.1.
    pub fn check_supported(self) -> Result<()> {
        if self.major != CURRENT_ENCODING.major || self.minor > CURRENT_ENCODING.minor {
            return Err(Error::UnsupportedEncoding(self));
        }
        Ok(())
    }
}

impl Default for EncodingVersion {
    fn default() -> Self {
        CURRENT_ENCODING
    }
}

impl fmt::Display for EncodingVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for EncodingVersion {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        let (major, minor) = s
            .trim()
            .split_once('.')
            .ok_or_else(|| format!("malformed encoding version `{}`", s))?;
        let major = major
            .parse::<u8>()
            .map_err(|e| format!("invalid major version `{}`: {}", major, e))?;
        let minor = minor
            .parse::<u8>()
            .map_err(|e| format!("invalid minor version `{}`: {}", minor, e))?;
        Ok(Self::new(major, minor))
    }
}

/// How class instances and exceptions are laid out in 1.1 encapsulations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatType {
    /// Inherit from the enclosing encapsulation or the stream configuration.
    #[default]
    Default,
    /// No slice sizes; unknown slices cannot be skipped.
    Compact,
    /// Slice sizes and indirection tables; unknown slices are skippable.
    Sliced,
}

impl FromStr for FormatType {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(FormatType::Default),
            "compact" => Ok(FormatType::Compact),
            "sliced" => Ok(FormatType::Sliced),
            other => Err(format!("unknown format `{}`", other)),
        }
    }
}

/// Wire format kind of a tagged member (low 3 bits of the tag byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OptionalFormat {
    F1 = 0,
    F2 = 1,
    F4 = 2,
    F8 = 3,
    Size = 4,
    VSize = 5,
    FSize = 6,
    Class = 7,
}

impl OptionalFormat {
    /// Decode the low 3 bits of a tag byte.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => OptionalFormat::F1,
            1 => OptionalFormat::F2,
            2 => OptionalFormat::F4,
            3 => OptionalFormat::F8,
            4 => OptionalFormat::Size,
            5 => OptionalFormat::VSize,
            6 => OptionalFormat::FSize,
            _ => OptionalFormat::Class,
        }
    }

    /// Payload width for the fixed formats.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            OptionalFormat::F1 => Some(1),
            OptionalFormat::F2 => Some(2),
            OptionalFormat::F4 => Some(4),
            OptionalFormat::F8 => Some(8),
            _ => None,
        }
    }
}

/// Kind of slice chain being walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum SliceType {
    #[default]
    None,
    Value,
    Exception,
}
