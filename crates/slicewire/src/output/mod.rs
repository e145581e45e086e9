// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Output stream: primitives, encapsulations, tagged members, instances.
//!
//! An [`OutputStream`] owns a growable [`Buffer`] and a stack of write
//! encapsulations. Class instances are taken from a borrowed [`ValueGraph`];
//! the per-encapsulation encoder (1.0 or 1.1) is created on first use.
//!
//! # Example
//!
//! ```ignore
//! let mut graph = ValueGraph::new();
//! let node = graph.insert(Node::default());
//!
//! let mut out = OutputStream::new().with_graph(&graph);
//! out.start_write_encaps(ENCODING_1_1, FormatType::Sliced)?;
//! out.write_value(Some(node))?;
//! out.write_pending_values()?;
//! out.end_write_encaps()?;
//! let bytes = out.into_bytes();
//! ```

mod encoder;

use std::sync::Arc;

use crate::buffer::{Buffer, WireScalar};
use crate::config::{StreamConfig, ENCAPS_HEADER_SIZE, TAG_INLINE_LIMIT, TAG_OUT_OF_LINE};
use crate::convert::{utf16_to_utf8, StringConverter};
use crate::encoding::{EncodingVersion, FormatType, OptionalFormat};
use crate::error::{Error, Result};
use crate::logger::{default_logger, Logger};
use crate::value::ValueGraph;

use encoder::Encoder;

/// One open write encapsulation.
#[derive(Debug)]
struct WriteEncaps {
    /// Offset of the i32 size field.
    start: usize,
    encoding: EncodingVersion,
    /// Never [`FormatType::Default`].
    format: FormatType,
    encoder: Option<Encoder>,
}

/// Explicit frames on top of the implicit stream-level one.
#[derive(Debug)]
struct WriteEncapsStack {
    frames: Vec<WriteEncaps>,
    implicit: WriteEncaps,
}

impl WriteEncapsStack {
    fn new(config: &StreamConfig) -> Self {
        Self {
            frames: Vec::new(),
            implicit: WriteEncaps {
                start: 0,
                encoding: config.encoding,
                format: config.resolve_format(FormatType::Default),
                encoder: None,
            },
        }
    }

    fn current(&self) -> &WriteEncaps {
        self.frames.last().unwrap_or(&self.implicit)
    }

    fn current_mut(&mut self) -> &mut WriteEncaps {
        self.frames.last_mut().unwrap_or(&mut self.implicit)
    }
}

/// Marshals primitives, encapsulations, class graphs and exceptions.
pub struct OutputStream<'g> {
    buf: Buffer,
    config: StreamConfig,
    graph: Option<&'g ValueGraph>,
    logger: Arc<dyn Logger>,
    converter: Option<Arc<dyn StringConverter>>,
    encaps: WriteEncapsStack,
}

impl Default for OutputStream<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'g> OutputStream<'g> {
    /// Stream using [`StreamConfig::default`].
    pub fn new() -> Self {
        Self::with_config(StreamConfig::default())
    }

    pub fn with_config(config: StreamConfig) -> Self {
        Self {
            buf: Buffer::new(),
            encaps: WriteEncapsStack::new(&config),
            config,
            graph: None,
            logger: default_logger(),
            converter: None,
        }
    }

    /// Attach the graph that [`write_value`](Self::write_value) handles refer to.
    pub fn with_graph(mut self, graph: &'g ValueGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Install the codec used by [`write_native_string`](Self::write_native_string).
    pub fn with_string_converter(mut self, converter: Arc<dyn StringConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Encoding of the innermost open encapsulation.
    pub fn encoding(&self) -> EncodingVersion {
        self.encaps.current().encoding
    }

    /// Class format of the innermost open encapsulation.
    pub fn format(&self) -> FormatType {
        self.encaps.current().format
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_slice()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf.into_vec()
    }

    /// Drop written bytes and every encoder state.
    pub fn reset(&mut self) {
        self.buf.reset();
        self.encaps = WriteEncapsStack::new(&self.config);
    }

    // ========================================================================
    // Primitives
    // ========================================================================

    pub fn write_bool(&mut self, v: bool) {
        self.buf.write_scalar(v);
    }

    pub fn write_byte(&mut self, v: u8) {
        self.buf.write_scalar(v);
    }

    pub fn write_short(&mut self, v: i16) {
        self.buf.write_scalar(v);
    }

    pub fn write_int(&mut self, v: i32) {
        self.buf.write_scalar(v);
    }

    pub fn write_long(&mut self, v: i64) {
        self.buf.write_scalar(v);
    }

    pub fn write_float(&mut self, v: f32) {
        self.buf.write_scalar(v);
    }

    pub fn write_double(&mut self, v: f64) {
        self.buf.write_scalar(v);
    }

    pub fn write_size(&mut self, v: usize) -> Result<()> {
        self.buf.write_size(v)
    }

    /// Raw bytes, no length prefix.
    pub fn write_blob(&mut self, bytes: &[u8]) {
        self.buf.write(bytes);
    }

    /// Enumerator: 1.0 picks byte/short/int from `max_value`, 1.1 uses a `Size`.
    pub fn write_enum(&mut self, value: i32, max_value: i32) -> Result<()> {
        if value < 0 || value > max_value {
            return Err(Error::marshal(format!(
                "enumerator value {} is out of range 0..={}",
                value, max_value
            )));
        }
        if self.encoding().is_1_0() {
            if max_value < 127 {
                self.buf.write_scalar(value as u8);
            } else if max_value < 32767 {
                self.buf.write_scalar(value as i16);
            } else {
                self.buf.write_scalar(value);
            }
            Ok(())
        } else {
            self.buf.write_size(value as usize)
        }
    }

    /// `Size` count followed by each element.
    pub fn write_seq<T: WireScalar>(&mut self, values: &[T]) -> Result<()> {
        self.buf.write_size(values.len())?;
        for v in values {
            self.buf.write_scalar(*v);
        }
        Ok(())
    }

    pub fn write_byte_seq(&mut self, bytes: &[u8]) -> Result<()> {
        self.buf.write_sized_bytes(bytes)
    }

    pub fn write_string(&mut self, s: &str) -> Result<()> {
        self.buf.write_sized_bytes(s.as_bytes())
    }

    pub fn write_string_seq<S: AsRef<str>>(&mut self, values: &[S]) -> Result<()> {
        self.buf.write_size(values.len())?;
        for s in values {
            self.write_string(s.as_ref())?;
        }
        Ok(())
    }

    /// Wide string given as UTF-16 code units; written as UTF-8.
    pub fn write_wstring(&mut self, units: &[u16]) -> Result<()> {
        self.buf
            .write_converted(units.len(), |out| utf16_to_utf8(units, out))
    }

    /// Narrow string in the installed converter's native encoding.
    ///
    /// Without a converter the bytes must already be UTF-8.
    pub fn write_native_string(&mut self, native: &[u8]) -> Result<()> {
        match self.converter.clone() {
            Some(converter) => self
                .buf
                .write_converted(native.len(), |out| converter.to_utf8(native, out)),
            None => {
                std::str::from_utf8(native).map_err(|e| Error::StringConversion(e.to_string()))?;
                self.buf.write_sized_bytes(native)
            }
        }
    }

    /// Reserve an i32 length; returns its offset for [`end_size`](Self::end_size).
    pub fn start_size(&mut self) -> usize {
        let pos = self.buf.len();
        self.buf.write_scalar(0i32);
        pos
    }

    /// Patch the length reserved at `pos` with the bytes written since.
    pub fn end_size(&mut self, pos: usize) -> Result<()> {
        let size = self.buf.len() - pos - 4;
        let size = i32::try_from(size)
            .map_err(|_| Error::marshal(format!("size {} exceeds the wire limit", size)))?;
        self.buf.write_scalar_at(pos, size)
    }

    // ========================================================================
    // Encapsulations
    // ========================================================================

    /// Open an encapsulation; [`FormatType::Default`] resolves against the config.
    pub fn start_write_encaps(&mut self, encoding: EncodingVersion, format: FormatType) -> Result<()> {
        encoding.check_supported()?;
        let start = self.buf.len();
        self.buf.write_scalar(0i32);
        self.buf.write_scalar(encoding.major);
        self.buf.write_scalar(encoding.minor);
        self.encaps.frames.push(WriteEncaps {
            start,
            encoding,
            format: self.config.resolve_format(format),
            encoder: None,
        });
        Ok(())
    }

    /// Open an encapsulation inheriting the current encoding and format.
    pub fn start_write_encaps_default(&mut self) -> Result<()> {
        let current = self.encaps.current();
        let (encoding, format) = (current.encoding, current.format);
        self.start_write_encaps(encoding, format)
    }

    /// Close the innermost encapsulation and patch its size.
    pub fn end_write_encaps(&mut self) -> Result<()> {
        let frame = self
            .encaps
            .frames
            .pop()
            .ok_or_else(|| Error::encapsulation("no open encapsulation to end"))?;
        let size = self.buf.len() - frame.start;
        let size = i32::try_from(size)
            .map_err(|_| Error::encapsulation(format!("encapsulation of {} bytes is too large", size)))?;
        self.buf.write_scalar_at(frame.start, size)
    }

    /// Header-only encapsulation.
    pub fn write_empty_encaps(&mut self, encoding: EncodingVersion) -> Result<()> {
        encoding.check_supported()?;
        self.buf.write_scalar(ENCAPS_HEADER_SIZE as i32);
        self.buf.write_scalar(encoding.major);
        self.buf.write_scalar(encoding.minor);
        Ok(())
    }

    /// Copy a complete encapsulation (header included) verbatim.
    pub fn write_encaps(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() < ENCAPS_HEADER_SIZE {
            return Err(Error::encapsulation(format!(
                "encapsulation of {} bytes is shorter than its header",
                bytes.len()
            )));
        }
        self.buf.write(bytes);
        Ok(())
    }

    /// Number of explicitly opened encapsulations.
    pub fn encaps_depth(&self) -> usize {
        self.encaps.frames.len()
    }

    // ========================================================================
    // Tagged members
    // ========================================================================

    /// Write a tag header; `false` when the encoding cannot carry tagged members
    /// and the value must be omitted.
    pub fn write_opt(&mut self, tag: i32, format: OptionalFormat) -> Result<bool> {
        if tag < 0 {
            return Err(Error::marshal(format!("invalid tag {}", tag)));
        }
        let frame = self.encaps.current_mut();
        if frame.encoding.is_1_0() {
            return Ok(false);
        }
        if let Some(encoder) = frame.encoder.as_mut() {
            encoder.mark_optional_member();
        }
        let bits = format as u8;
        if tag < TAG_INLINE_LIMIT {
            self.buf.write_scalar(bits | ((tag as u8) << 3));
        } else {
            self.buf.write_scalar(bits | TAG_OUT_OF_LINE);
            self.buf.write_size(tag as usize)?;
        }
        Ok(true)
    }
}

impl std::fmt::Debug for OutputStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStream")
            .field("len", &self.buf.len())
            .field("encaps", &self.encaps)
            .field("graph", &self.graph.map(ValueGraph::len))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{ENCODING_1_0, ENCODING_1_1};

    #[test]
    fn test_encaps_size_covers_header() {
        let mut out = OutputStream::new();
        out.write_byte(0xEE);
        out.start_write_encaps(ENCODING_1_1, FormatType::Default)
            .expect("start");
        out.write_int(7);
        out.end_write_encaps().expect("end");
        assert_eq!(out.as_bytes(), &[0xEE, 10, 0, 0, 0, 1, 1, 7, 0, 0, 0]);
    }

    #[test]
    fn test_nested_encaps_and_unbalanced_end() {
        let mut out = OutputStream::new();
        out.start_write_encaps(ENCODING_1_1, FormatType::Sliced).expect("outer");
        out.start_write_encaps_default().expect("inner");
        assert_eq!(out.format(), FormatType::Sliced);
        assert_eq!(out.encaps_depth(), 2);
        out.end_write_encaps().expect("end inner");
        out.end_write_encaps().expect("end outer");
        assert_eq!(&out.as_bytes()[..4], &12i32.to_le_bytes());
        assert_eq!(&out.as_bytes()[6..10], &6i32.to_le_bytes());

        match out.end_write_encaps() {
            Err(Error::Encapsulation(_)) => {}
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_encoding_rejected() {
        let mut out = OutputStream::new();
        let v = EncodingVersion::new(1, 2);
        assert_eq!(out.start_write_encaps(v, FormatType::Default), Err(Error::UnsupportedEncoding(v)));
        assert_eq!(out.write_empty_encaps(v), Err(Error::UnsupportedEncoding(v)));
        assert!(out.write_encaps(&[6, 0, 0, 0, 1]).is_err());
    }

    #[test]
    fn test_tag_header_forms() {
        let mut out = OutputStream::new();
        assert!(out.write_opt(5, OptionalFormat::F4).expect("inline tag"));
        assert!(out.write_opt(40, OptionalFormat::VSize).expect("long tag"));
        assert_eq!(out.as_bytes(), &[(5 << 3) | 2, 0xF5, 40]);
    }

    #[test]
    fn test_tags_dropped_under_1_0() {
        let mut out = OutputStream::new();
        out.start_write_encaps(ENCODING_1_0, FormatType::Default).expect("start");
        assert!(!out.write_opt(1, OptionalFormat::F1).expect("write opt"));
        out.end_write_encaps().expect("end");
        assert_eq!(out.len(), ENCAPS_HEADER_SIZE);
    }

    #[test]
    fn test_enum_width_by_encoding() {
        let mut out = OutputStream::new();
        out.start_write_encaps(ENCODING_1_0, FormatType::Default).expect("start");
        out.write_enum(3, 10).expect("byte enum");
        out.write_enum(3, 200).expect("short enum");
        out.write_enum(3, 40_000).expect("int enum");
        out.end_write_encaps().expect("end");
        assert_eq!(out.len(), ENCAPS_HEADER_SIZE + 1 + 2 + 4);

        let mut out = OutputStream::new();
        out.write_enum(300, 40_000).expect("size enum");
        assert_eq!(out.as_bytes(), &[255, 0x2C, 0x01, 0, 0]);
        assert!(out.write_enum(11, 10).is_err());
    }

    #[test]
    fn test_start_end_size() {
        let mut out = OutputStream::new();
        let pos = out.start_size();
        out.write_string("abc").expect("string");
        out.end_size(pos).expect("end size");
        assert_eq!(&out.as_bytes()[..4], &4i32.to_le_bytes());
    }

    #[test]
    fn test_wstring_and_native_strings() {
        let mut out = OutputStream::new();
        let units: Vec<u16> = "héllo".encode_utf16().collect();
        out.write_wstring(&units).expect("wstring");
        assert_eq!(out.as_bytes(), &[6, b'h', 0xC3, 0xA9, b'l', b'l', b'o']);

        let mut out =
            OutputStream::new().with_string_converter(Arc::new(crate::convert::Latin1Converter));
        out.write_native_string(b"\xE9").expect("latin-1");
        assert_eq!(out.as_bytes(), &[2, 0xC3, 0xA9]);

        let mut out = OutputStream::new();
        assert!(out.write_native_string(b"\xE9").is_err());
    }
}
