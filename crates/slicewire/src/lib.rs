// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # slicewire - object-graph marshaling for a sliced RPC wire format
//!
//! The marshal/unmarshal engine of an RPC object protocol: little-endian
//! primitives, compact `Size` prefixes, versioned encapsulations, tagged
//! (optional) members, class graphs with sharing and cycles, and user
//! exceptions. Encodings 1.0 and 1.1 are both spoken; under 1.1 the sliced
//! format lets a receiver skip (and preserve) the slices of derived types it
//! does not know.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use slicewire::{FactoryRegistry, FormatType, InputStream, OutputStream, ValueGraph, ENCODING_1_1};
//!
//! let mut graph = ValueGraph::new();
//! let node = graph.insert(Node { id: 1, next: None });
//!
//! let mut out = OutputStream::new().with_graph(&graph);
//! out.start_write_encaps(ENCODING_1_1, FormatType::Sliced)?;
//! out.write_value(Some(node))?;
//! out.write_pending_values()?;
//! out.end_write_encaps()?;
//!
//! let registry = FactoryRegistry::new();
//! registry.register_value::<Node>("::Demo::Node")?;
//! let mut input = InputStream::new(out.into_bytes(), &registry);
//! input.start_read_encaps()?;
//! let pending = input.read_value()?;
//! input.read_pending_values()?;
//! input.end_read_encaps()?;
//! let decoded = input.resolve(pending)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |  marshal      Marshal / Unmarshal, write_tagged / read_tagged        |
//! +---------------------------------------------------------------------+
//! |  output::OutputStream            |  input::InputStream              |
//! |    Encoder10 / Encoder11         |    Decoder10 / Decoder11         |
//! |    (ids, type-id table, slices)  |    (patches, slicing, hooks)     |
//! +---------------------------------------------------------------------+
//! |  value::ValueGraph (arena)  |  registry::FactoryRegistry (shared)    |
//! +---------------------------------------------------------------------+
//! |  primitive (Size, strings)  |  buffer::Buffer (cursor, LE scalars)   |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`buffer`] - Growable byte buffer with a read cursor
//! - [`output`] / [`input`] - Streams (start here)
//! - [`value`] / [`exception`] - Class and exception contracts
//! - [`registry`] - Type-id factories and compact ids
//! - [`marshal`] - Typed codec and tagged-member helpers
//! - [`config`] - Wire constants and per-stream settings

pub mod buffer;
pub mod config;
pub mod convert;
pub mod encoding;
pub mod error;
pub mod exception;
pub mod input;
pub mod logger;
pub mod marshal;
pub mod output;
pub mod primitive;
pub mod registry;
pub mod value;

pub use buffer::{Buffer, WireScalar};
pub use config::StreamConfig;
pub use convert::{Latin1Converter, StringConverter};
pub use encoding::{
    EncodingVersion, FormatType, OptionalFormat, CURRENT_ENCODING, ENCODING_1_0, ENCODING_1_1,
};
pub use error::{Error, HookError, HookResult, Result};
pub use exception::{DecodedException, UnknownUserException, UserException};
pub use input::{InputStream, PendingValue};
pub use logger::{LogCrateLogger, Logger};
pub use marshal::{read_tagged, write_tagged, Marshal, Unmarshal, WireType};
pub use output::OutputStream;
pub use registry::{CompactIdResolver, ExceptionFactory, FactoryRegistry, ValueFactory};
pub use value::{
    AsAny, SliceInfo, SlicedData, UnknownSlicedValue, Value, ValueEntry, ValueGraph, ValueHandle,
};
