// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Input stream: primitives, encapsulations, tagged members, instances.
//!
//! An [`InputStream`] owns the received bytes, a stack of read encapsulations
//! and the [`ValueGraph`] that decoded instances are checked into. Factories
//! are looked up in a borrowed [`FactoryRegistry`].
//!
//! # Example
//!
//! ```ignore
//! let mut input = InputStream::new(bytes, &registry);
//! input.start_read_encaps()?;
//! let root = input.read_value()?;
//! input.read_pending_values()?;
//! input.end_read_encaps()?;
//!
//! let handle = input.resolve(root)?;
//! let graph = input.into_graph();
//! ```

mod decoder;

use std::collections::HashMap;
use std::sync::Arc;

use crate::buffer::{Buffer, WireScalar};
use crate::config::{StreamConfig, ENCAPS_HEADER_SIZE, OPTIONAL_END_MARKER, TAG_INLINE_LIMIT};
use crate::convert::{utf8_to_utf16, StringConverter};
use crate::encoding::{EncodingVersion, OptionalFormat};
use crate::error::{Error, Result};
use crate::logger::{default_logger, Logger};
use crate::registry::FactoryRegistry;
use crate::value::{ValueGraph, ValueHandle};

use decoder::{Decoder, DeferredPatch, ExceptionPatch, Owner};

pub use decoder::PendingValue;

/// One open read encapsulation.
#[derive(Debug)]
struct ReadEncaps {
    /// Offset of the i32 size field.
    start: usize,
    /// Declared size, header included.
    size: usize,
    encoding: EncodingVersion,
    decoder: Option<Decoder>,
    /// Highest tag requested outside of any instance.
    opt_floor: Option<i32>,
}

impl ReadEncaps {
    fn end(&self) -> usize {
        self.start + self.size
    }
}

#[derive(Debug)]
struct ReadEncapsStack {
    frames: Vec<ReadEncaps>,
    implicit: ReadEncaps,
}

impl ReadEncapsStack {
    fn new(len: usize, encoding: EncodingVersion) -> Self {
        Self {
            frames: Vec::new(),
            implicit: ReadEncaps {
                start: 0,
                size: len,
                encoding,
                decoder: None,
                opt_floor: None,
            },
        }
    }

    fn current(&self) -> &ReadEncaps {
        self.frames.last().unwrap_or(&self.implicit)
    }

    fn current_mut(&mut self) -> &mut ReadEncaps {
        self.frames.last_mut().unwrap_or(&mut self.implicit)
    }
}

/// Unmarshals primitives, encapsulations, class graphs and exceptions.
pub struct InputStream<'r> {
    buf: Buffer,
    config: StreamConfig,
    registry: &'r FactoryRegistry,
    logger: Arc<dyn Logger>,
    converter: Option<Arc<dyn StringConverter>>,
    encaps: ReadEncapsStack,
    /// Start of the outermost sequence whose minimum size is being tracked.
    start_seq: Option<usize>,
    min_seq_size: usize,
    graph: ValueGraph,
    /// Targets of [`PendingValue`]s; `None` until patched.
    roots: Vec<Option<Option<ValueHandle>>>,
    /// Instance (or exception) whose body is being read.
    owners: Vec<Owner>,
    /// Patches against checked-out instances, applied at check-in.
    deferred: HashMap<ValueHandle, Vec<DeferredPatch>>,
    exception_patches: Vec<ExceptionPatch>,
}

impl<'r> InputStream<'r> {
    /// Stream over `bytes` using [`StreamConfig::default`].
    pub fn new(bytes: Vec<u8>, registry: &'r FactoryRegistry) -> Self {
        let config = StreamConfig::default();
        Self {
            encaps: ReadEncapsStack::new(bytes.len(), config.encoding),
            buf: Buffer::from_vec(bytes),
            config,
            registry,
            logger: default_logger(),
            converter: None,
            start_seq: None,
            min_seq_size: 0,
            graph: ValueGraph::new(),
            roots: Vec::new(),
            owners: Vec::new(),
            deferred: HashMap::new(),
            exception_patches: Vec::new(),
        }
    }

    /// Replace the configuration; the stream-level encoding follows it.
    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.encaps.implicit.encoding = config.encoding;
        self.config = config;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Install the codec used by [`read_native_string`](Self::read_native_string).
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

    pub fn position(&self) -> usize {
        self.buf.position()
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Instances decoded so far.
    pub fn graph(&self) -> &ValueGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut ValueGraph {
        &mut self.graph
    }

    pub fn into_graph(self) -> ValueGraph {
        self.graph
    }

    // ========================================================================
    // Primitives
    // ========================================================================

    pub fn read_bool(&mut self) -> Result<bool> {
        self.buf.read_scalar()
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        self.buf.read_scalar()
    }

    pub fn read_short(&mut self) -> Result<i16> {
        self.buf.read_scalar()
    }

    pub fn read_int(&mut self) -> Result<i32> {
        self.buf.read_scalar()
    }

    pub fn read_long(&mut self) -> Result<i64> {
        self.buf.read_scalar()
    }

    pub fn read_float(&mut self) -> Result<f32> {
        self.buf.read_scalar()
    }

    pub fn read_double(&mut self) -> Result<f64> {
        self.buf.read_scalar()
    }

    pub fn read_size(&mut self) -> Result<usize> {
        self.buf.read_size()
    }

    pub fn skip_size(&mut self) -> Result<()> {
        self.buf.skip_size()
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.buf.skip(n)
    }

    /// `n` raw bytes.
    pub fn read_blob(&mut self, n: usize) -> Result<Vec<u8>> {
        Ok(self.buf.read(n)?.to_vec())
    }

    /// Read a sequence size and check the buffer can hold it.
    ///
    /// Sizes of nested sequences accumulate against the outermost one still
    /// being read, so a corrupt inner size cannot claim more bytes than remain.
    pub fn read_and_check_seq_size(&mut self, min_element_size: usize) -> Result<usize> {
        let size = self.buf.read_size()?;
        if size == 0 {
            return Ok(0);
        }
        let pos = self.buf.position();
        let needed = size.saturating_mul(min_element_size);
        match self.start_seq {
            Some(start) if pos <= start.saturating_add(self.min_seq_size) => {
                self.min_seq_size = self.min_seq_size.saturating_add(needed);
            }
            _ => {
                self.start_seq = Some(pos);
                self.min_seq_size = needed;
            }
        }
        let start = self.start_seq.unwrap_or(pos);
        if start.saturating_add(self.min_seq_size) > self.buf.len() {
            return Err(Error::out_of_bounds(pos, needed, self.buf.remaining()));
        }
        Ok(size)
    }

    /// Enumerator written with [`OutputStream::write_enum`](crate::output::OutputStream::write_enum).
    pub fn read_enum(&mut self, max_value: i32) -> Result<i32> {
        let value = if self.encoding().is_1_0() {
            if max_value < 127 {
                i32::from(self.buf.read_scalar::<u8>()?)
            } else if max_value < 32767 {
                i32::from(self.buf.read_scalar::<i16>()?)
            } else {
                self.buf.read_scalar::<i32>()?
            }
        } else {
            self.buf.read_size()? as i32
        };
        if value < 0 || value > max_value {
            return Err(Error::marshal(format!(
                "enumerator value {} is out of range 0..={}",
                value, max_value
            )));
        }
        Ok(value)
    }

    pub fn read_seq<T: WireScalar>(&mut self) -> Result<Vec<T>> {
        let size = self.read_and_check_seq_size(T::SIZE)?;
        let mut values = Vec::with_capacity(size);
        for _ in 0..size {
            values.push(self.buf.read_scalar()?);
        }
        Ok(values)
    }

    pub fn read_byte_seq(&mut self) -> Result<Vec<u8>> {
        let size = self.read_and_check_seq_size(1)?;
        self.read_blob(size)
    }

    pub fn read_string(&mut self) -> Result<String> {
        self.buf.read_string()
    }

    pub fn read_string_seq(&mut self) -> Result<Vec<String>> {
        let size = self.read_and_check_seq_size(1)?;
        let mut values = Vec::with_capacity(size);
        for _ in 0..size {
            values.push(self.buf.read_string()?);
        }
        Ok(values)
    }

    /// Wide string as UTF-16 code units.
    pub fn read_wstring(&mut self) -> Result<Vec<u16>> {
        let len = self.buf.read_size()?;
        utf8_to_utf16(self.buf.read(len)?)
    }

    /// Narrow string in the installed converter's native encoding.
    ///
    /// Without a converter the UTF-8 bytes are validated and returned as is.
    pub fn read_native_string(&mut self) -> Result<Vec<u8>> {
        let len = self.buf.read_size()?;
        let converter = self.converter.clone();
        let utf8 = self.buf.read(len)?;
        match converter {
            Some(converter) => converter.from_utf8(utf8),
            None => {
                std::str::from_utf8(utf8).map_err(|e| Error::StringConversion(e.to_string()))?;
                Ok(utf8.to_vec())
            }
        }
    }

    // ========================================================================
    // Encapsulations
    // ========================================================================

    /// Read an encapsulation header and make it current.
    pub fn start_read_encaps(&mut self) -> Result<EncodingVersion> {
        let start = self.buf.position();
        let (size, encoding) = self.read_encaps_header()?;
        self.encaps.frames.push(ReadEncaps {
            start,
            size,
            encoding,
            decoder: None,
            opt_floor: None,
        });
        Ok(encoding)
    }

    /// Size and version of the encapsulation at the cursor, header consumed.
    fn read_encaps_header(&mut self) -> Result<(usize, EncodingVersion)> {
        let start = self.buf.position();
        let size: i32 = self.buf.read_scalar()?;
        if size < ENCAPS_HEADER_SIZE as i32 {
            return Err(Error::out_of_bounds(
                start,
                ENCAPS_HEADER_SIZE,
                size.max(0) as usize,
            ));
        }
        let size = size as usize;
        if size - 4 > self.buf.remaining() {
            return Err(Error::out_of_bounds(start, size, self.buf.remaining() + 4));
        }
        let major: u8 = self.buf.read_scalar()?;
        let minor: u8 = self.buf.read_scalar()?;
        let encoding = EncodingVersion::new(major, minor);
        encoding.check_supported()?;
        Ok((size, encoding))
    }

    /// Close the innermost encapsulation, leaving the cursor at its end.
    ///
    /// With `strict_encaps_end` unread bytes (after skipping trailing tagged
    /// members) are an error; 1.0 tolerates a single trailing byte.
    pub fn end_read_encaps(&mut self) -> Result<()> {
        let frame = self
            .encaps
            .frames
            .last()
            .ok_or_else(|| Error::encapsulation("no open encapsulation to end"))?;
        let (end, encoding) = (frame.end(), frame.encoding);

        if self.config.strict_encaps_end {
            if !encoding.is_1_0() {
                self.skip_opts()?;
            }
            let pos = self.buf.position();
            if pos != end && !(encoding.is_1_0() && pos + 1 == end) {
                return Err(Error::encapsulation(
                    "buffer size does not match decoded encapsulation size",
                ));
            }
        } else if self.buf.position() > end {
            return Err(Error::encapsulation("read past the end of the encapsulation"));
        }

        self.buf.set_position(end)?;
        self.encaps.frames.pop();
        Ok(())
    }

    /// Skip a whole encapsulation; returns its encoding.
    pub fn skip_encaps(&mut self) -> Result<EncodingVersion> {
        let (size, encoding) = self.read_encaps_header()?;
        self.buf.skip(size - ENCAPS_HEADER_SIZE)?;
        Ok(encoding)
    }

    /// Skip an encapsulation expected to be empty.
    ///
    /// 1.0 requires it to be header-only; 1.1 may carry tagged members, which
    /// are skipped.
    pub fn skip_empty_encaps(&mut self) -> Result<EncodingVersion> {
        let (size, encoding) = self.read_encaps_header()?;
        if encoding.is_1_0() && size != ENCAPS_HEADER_SIZE {
            return Err(Error::encapsulation(format!(
                "expected an empty encapsulation, found {} bytes",
                size
            )));
        }
        self.buf.skip(size - ENCAPS_HEADER_SIZE)?;
        Ok(encoding)
    }

    /// A complete encapsulation (header included) as raw bytes.
    pub fn read_encaps(&mut self) -> Result<(Vec<u8>, EncodingVersion)> {
        let start = self.buf.position();
        let (size, encoding) = self.read_encaps_header()?;
        self.buf.skip(size - ENCAPS_HEADER_SIZE)?;
        Ok((self.buf.slice(start, start + size)?.to_vec(), encoding))
    }

    /// Payload size of the innermost open encapsulation.
    pub fn encaps_size(&self) -> Result<usize> {
        self.encaps
            .frames
            .last()
            .map(|frame| frame.size - ENCAPS_HEADER_SIZE)
            .ok_or_else(|| Error::encapsulation("no open encapsulation"))
    }

    /// Number of explicitly opened encapsulations.
    pub fn encaps_depth(&self) -> usize {
        self.encaps.frames.len()
    }

    // ========================================================================
    // Tagged members
    // ========================================================================

    /// Position the cursor on the payload of tagged member `tag`.
    ///
    /// Members with lower tags are skipped. Returns `false` when the member is
    /// absent, always under 1.0. Tags must be requested in ascending order
    /// within a slice (or within an encapsulation outside instances).
    pub fn read_opt(&mut self, tag: i32, expected: OptionalFormat) -> Result<bool> {
        let frame = self.encaps.current_mut();
        if frame.encoding.is_1_0() {
            return Ok(false);
        }
        let floor = match frame.decoder.as_mut().and_then(Decoder::instance_tags) {
            Some((false, _)) => return Ok(false),
            Some((true, floor)) => floor,
            None => &mut frame.opt_floor,
        };
        if let Some(previous) = *floor {
            if tag <= previous {
                return Err(Error::marshal(format!(
                    "tagged member {} requested after tag {}; tags must be read in ascending order",
                    tag, previous
                )));
            }
        }
        *floor = Some(tag);
        self.read_opt_impl(tag, expected)
    }

    fn read_opt_impl(&mut self, tag: i32, expected: OptionalFormat) -> Result<bool> {
        let end = self.encaps.current().end();
        loop {
            if self.buf.position() >= end {
                return Ok(false);
            }
            let header: u8 = self.buf.read_scalar()?;
            if header == OPTIONAL_END_MARKER {
                self.buf.rewind(1)?;
                return Ok(false);
            }
            let format = OptionalFormat::from_bits(header);
            let mut found = i32::from(header >> 3);
            if found == TAG_INLINE_LIMIT {
                found = self.buf.read_size()? as i32;
            }
            if found > tag {
                let width = if found < TAG_INLINE_LIMIT {
                    1
                } else if found < 255 {
                    2
                } else {
                    6
                };
                self.buf.rewind(width)?;
                return Ok(false);
            }
            if found < tag {
                self.skip_opt(format)?;
                continue;
            }
            if format != expected {
                return Err(Error::marshal(format!(
                    "invalid optional data member `{}': unexpected format",
                    tag
                )));
            }
            return Ok(true);
        }
    }

    /// Skip the payload of a tagged member whose header was consumed.
    pub fn skip_opt(&mut self, format: OptionalFormat) -> Result<()> {
        if let Some(width) = format.fixed_width() {
            return self.buf.skip(width);
        }
        match format {
            OptionalFormat::Size => self.buf.skip_size(),
            OptionalFormat::VSize => {
                let len = self.buf.read_size()?;
                self.buf.skip(len)
            }
            OptionalFormat::FSize => {
                let len: i32 = self.buf.read_scalar()?;
                let len = usize::try_from(len)
                    .map_err(|_| Error::marshal(format!("negative member size {}", len)))?;
                self.buf.skip(len)
            }
            _ => self.skip_value(),
        }
    }

    /// Skip tagged members up to (and including) the end marker.
    pub fn skip_opts(&mut self) -> Result<()> {
        let end = self.encaps.current().end();
        loop {
            if self.buf.position() >= end {
                return Ok(());
            }
            let header: u8 = self.buf.read_scalar()?;
            if header == OPTIONAL_END_MARKER {
                return Ok(());
            }
            if i32::from(header >> 3) == TAG_INLINE_LIMIT {
                self.buf.skip_size()?;
            }
            self.skip_opt(OptionalFormat::from_bits(header))?;
        }
    }
}

impl std::fmt::Debug for InputStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputStream")
            .field("position", &self.buf.position())
            .field("len", &self.buf.len())
            .field("encaps", &self.encaps)
            .field("graph", &self.graph.len())
            .finish()
    }
}
