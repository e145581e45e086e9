// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire constants and stream configuration.
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: bit-exact wire layout constants. Interoperability
//!   depends on every value below; they are never computed elsewhere.
//! - **Level 2 (Dynamic)**: [`StreamConfig`], the per-stream knobs (default
//!   encoding and class format, slicing, depth limit), overridable from the
//!   environment through [`StreamConfig::from_env`].
//!
//! # Example
//!
//! ```ignore
//! use slicewire::config::StreamConfig;
//! use slicewire::encoding::{FormatType, ENCODING_1_0};
//!
//! let config = StreamConfig::from_env()
//!     .with_encoding(ENCODING_1_0)
//!     .with_format(FormatType::Sliced);
//! ```

use crate::encoding::{EncodingVersion, FormatType, CURRENT_ENCODING};

// =======================================================================
// Size encoding
// =======================================================================

/// Largest value encoded as a single `Size` byte.
pub const SIZE_ONE_BYTE_MAX: u8 = 254;

/// Marker byte announcing a 4-byte `Size` payload.
pub const SIZE_MARKER: u8 = 255;

// =======================================================================
// Tagged members
// =======================================================================

/// Tag numbers at or above this value are written out of line as a `Size`.
pub const TAG_INLINE_LIMIT: i32 = 30;

/// Upper tag-byte bits announcing an out-of-line tag number (`30 << 3`).
pub const TAG_OUT_OF_LINE: u8 = 0xF0;

/// Ends the tagged members of a slice or encapsulation.
pub const OPTIONAL_END_MARKER: u8 = 0xFF;

// =======================================================================
// 1.1 slice flags
// =======================================================================

pub const FLAG_HAS_TYPE_ID_STRING: u8 = 1 << 0;
pub const FLAG_HAS_TYPE_ID_INDEX: u8 = 1 << 1;
/// Both type-id bits set: compact numeric id. Must be tested before the others.
pub const FLAG_HAS_TYPE_ID_COMPACT: u8 = FLAG_HAS_TYPE_ID_STRING | FLAG_HAS_TYPE_ID_INDEX;
pub const FLAG_HAS_OPTIONAL_MEMBERS: u8 = 1 << 2;
pub const FLAG_HAS_INDIRECTION_TABLE: u8 = 1 << 3;
pub const FLAG_HAS_SLICE_SIZE: u8 = 1 << 4;
pub const FLAG_IS_LAST_SLICE: u8 = 1 << 5;

// =======================================================================
// Encapsulations and slices
// =======================================================================

/// Encapsulation header: 4-byte size plus major and minor version bytes.
pub const ENCAPS_HEADER_SIZE: usize = 6;

/// A slice size always counts its own 4 bytes.
pub const MIN_SLICE_SIZE: i32 = 4;

/// Root type id of every class hierarchy.
pub const ROOT_TYPE_ID: &str = "::Ice::Object";

/// Default limit on nested inline class instances.
pub const DEFAULT_CLASS_GRAPH_DEPTH_MAX: usize = 100;

// =======================================================================
// Runtime configuration
// =======================================================================

/// Per-stream configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Encoding used outside of explicit encapsulations.
    pub encoding: EncodingVersion,
    /// Class format used when an encapsulation asks for [`FormatType::Default`].
    pub format: FormatType,
    /// Slice off unknown types instead of failing with `NoValueFactory`.
    pub slice_values: bool,
    /// Emit a debug line for every type id sliced off.
    pub trace_slicing: bool,
    /// Maximum nesting of inline class instances.
    pub class_graph_depth_max: usize,
    /// Reject unread bytes at `end_read_encaps` instead of skipping them.
    pub strict_encaps_end: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            encoding: CURRENT_ENCODING,
            format: FormatType::Compact,
            slice_values: true,
            trace_slicing: false,
            class_graph_depth_max: DEFAULT_CLASS_GRAPH_DEPTH_MAX,
            strict_encaps_end: false,
        }
    }
}

impl StreamConfig {
    /// Defaults overridden by `SLICEWIRE_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            encoding: env_parse("SLICEWIRE_ENCODING").unwrap_or(defaults.encoding),
            format: env_parse("SLICEWIRE_FORMAT").unwrap_or(defaults.format),
            slice_values: env_parse("SLICEWIRE_SLICE_VALUES").unwrap_or(defaults.slice_values),
            trace_slicing: env_parse("SLICEWIRE_TRACE_SLICING")
                .unwrap_or(defaults.trace_slicing),
            class_graph_depth_max: env_parse("SLICEWIRE_CLASS_GRAPH_DEPTH_MAX")
                .unwrap_or(defaults.class_graph_depth_max),
            strict_encaps_end: env_parse("SLICEWIRE_STRICT_ENCAPS_END")
                .unwrap_or(defaults.strict_encaps_end),
        }
    }

    /// Set the default encoding.
    pub fn with_encoding(mut self, encoding: EncodingVersion) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set the default class format.
    pub fn with_format(mut self, format: FormatType) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable slicing of unknown value types.
    pub fn with_slice_values(mut self, slice_values: bool) -> Self {
        self.slice_values = slice_values;
        self
    }

    /// Enable or disable slicing traces.
    pub fn with_trace_slicing(mut self, trace: bool) -> Self {
        self.trace_slicing = trace;
        self
    }

    /// Set the class graph depth limit.
    pub fn with_class_graph_depth_max(mut self, depth: usize) -> Self {
        self.class_graph_depth_max = depth;
        self
    }

    /// Reject trailing bytes at the end of read encapsulations.
    pub fn with_strict_encaps_end(mut self, strict: bool) -> Self {
        self.strict_encaps_end = strict;
        self
    }

    /// Resolve [`FormatType::Default`] against this configuration.
    pub(crate) fn resolve_format(&self, format: FormatType) -> FormatType {
        match format {
            FormatType::Default if self.format == FormatType::Default => FormatType::Compact,
            FormatType::Default => self.format,
            other => other,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::ENCODING_1_0;

    #[test]
    fn test_slice_flag_layout() {
        assert_eq!(FLAG_HAS_TYPE_ID_COMPACT, 0x03);
        assert_eq!(FLAG_HAS_OPTIONAL_MEMBERS, 0x04);
        assert_eq!(FLAG_HAS_INDIRECTION_TABLE, 0x08);
        assert_eq!(FLAG_HAS_SLICE_SIZE, 0x10);
        assert_eq!(FLAG_IS_LAST_SLICE, 0x20);
        assert_eq!(TAG_OUT_OF_LINE, (TAG_INLINE_LIMIT as u8) << 3);
    }

    #[test]
    fn test_builder_overrides() {
        let config = StreamConfig::default()
            .with_encoding(ENCODING_1_0)
            .with_format(FormatType::Sliced)
            .with_slice_values(false)
            .with_class_graph_depth_max(8)
            .with_strict_encaps_end(true);
        assert_eq!(config.encoding, ENCODING_1_0);
        assert_eq!(config.format, FormatType::Sliced);
        assert!(!config.slice_values);
        assert_eq!(config.class_graph_depth_max, 8);
        assert!(config.strict_encaps_end);
    }

    #[test]
    fn test_resolve_format() {
        let config = StreamConfig::default();
        assert_eq!(config.resolve_format(FormatType::Default), FormatType::Compact);
        assert_eq!(config.resolve_format(FormatType::Sliced), FormatType::Sliced);

        let sliced = StreamConfig::default().with_format(FormatType::Sliced);
        assert_eq!(sliced.resolve_format(FormatType::Default), FormatType::Sliced);
    }

    #[test]
    fn test_env_parse_ignores_garbage() {
        assert_eq!(env_parse::<usize>("SLICEWIRE_TEST_UNSET_VARIABLE"), None);
    }
}
