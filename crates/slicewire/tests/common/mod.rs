// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared fixtures for integration tests: a small class hierarchy, a user
//! exception hierarchy, and helpers to build registries and streams.

#![allow(dead_code)]

use slicewire::{
    read_tagged, write_tagged, EncodingVersion, FactoryRegistry, FormatType, HookResult,
    InputStream, OutputStream, Result, UserException, Value, ValueGraph, ValueHandle,
};

pub const NODE_ID: &str = "::Demo::Node";
pub const BASE_ID: &str = "::Demo::Base";
pub const DERIVED_ID: &str = "::Demo::Derived";
pub const BASE_ERROR_ID: &str = "::Demo::BaseError";
pub const DERIVED_ERROR_ID: &str = "::Demo::DerivedError";
pub const NODE_ERROR_ID: &str = "::Demo::NodeError";

/// Linked node; records what its `next` member held when the hook ran.
#[derive(Debug, Default)]
pub struct Node {
    pub id: i32,
    pub next: Option<ValueHandle>,
    pub next_at_hook: Option<Option<ValueHandle>>,
    pub pre_marshal_fails: bool,
}

impl Node {
    pub fn new(id: i32) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}

impl Value for Node {
    fn ice_id(&self) -> &str {
        NODE_ID
    }

    fn write_impl(&self, out: &mut OutputStream<'_>) -> Result<()> {
        out.start_slice(NODE_ID, None, true)?;
        out.write_int(self.id);
        out.write_value(self.next)?;
        out.end_slice()
    }

    fn read_impl(&mut self, input: &mut InputStream<'_>) -> Result<()> {
        input.start_slice()?;
        self.id = input.read_int()?;
        input.read_value_into(|node: &mut Node, next| node.next = next)?;
        input.end_slice()
    }

    fn ice_pre_marshal(&self) -> HookResult {
        if self.pre_marshal_fails {
            return Err("refusing to marshal".into());
        }
        Ok(())
    }

    fn ice_post_unmarshal(&mut self) -> HookResult {
        self.next_at_hook = Some(self.next);
        Ok(())
    }
}

/// Root of a two-level hierarchy.
#[derive(Debug, Default)]
pub struct Base {
    pub name: String,
}

impl Base {
    fn write_base_slice(name: &str, out: &mut OutputStream<'_>) -> Result<()> {
        out.start_slice(BASE_ID, None, true)?;
        out.write_string(name)?;
        out.end_slice()
    }

    fn read_base_slice(input: &mut InputStream<'_>) -> Result<String> {
        input.start_slice()?;
        let name = input.read_string()?;
        input.end_slice()?;
        Ok(name)
    }
}

impl Value for Base {
    fn ice_id(&self) -> &str {
        BASE_ID
    }

    fn write_impl(&self, out: &mut OutputStream<'_>) -> Result<()> {
        Base::write_base_slice(&self.name, out)
    }

    fn read_impl(&mut self, input: &mut InputStream<'_>) -> Result<()> {
        self.name = Base::read_base_slice(input)?;
        Ok(())
    }
}

/// Derived type with a class member and a tagged member in its own slice.
#[derive(Debug, Default)]
pub struct Derived {
    pub name: String,
    pub extra: i64,
    pub peer: Option<ValueHandle>,
    pub note: Option<String>,
    pub compact_id: Option<i32>,
}

impl Value for Derived {
    fn ice_id(&self) -> &str {
        DERIVED_ID
    }

    fn write_impl(&self, out: &mut OutputStream<'_>) -> Result<()> {
        out.start_slice(DERIVED_ID, self.compact_id, false)?;
        out.write_long(self.extra);
        out.write_value(self.peer)?;
        write_tagged(out, 1, self.note.as_deref())?;
        out.end_slice()?;
        Base::write_base_slice(&self.name, out)
    }

    fn read_impl(&mut self, input: &mut InputStream<'_>) -> Result<()> {
        input.start_slice()?;
        self.extra = input.read_long()?;
        input.read_value_into(|derived: &mut Derived, peer| derived.peer = peer)?;
        self.note = read_tagged(input, 1)?;
        input.end_slice()?;
        self.name = Base::read_base_slice(input)?;
        Ok(())
    }
}

/// Root user exception.
#[derive(Debug, Default)]
pub struct BaseError {
    pub reason: String,
}

impl UserException for BaseError {
    fn ice_id(&self) -> &str {
        BASE_ERROR_ID
    }

    fn write_impl(&self, out: &mut OutputStream<'_>) -> Result<()> {
        out.start_slice(BASE_ERROR_ID, None, true)?;
        out.write_string(&self.reason)?;
        out.end_slice()
    }

    fn read_impl(&mut self, input: &mut InputStream<'_>) -> Result<()> {
        input.start_slice()?;
        self.reason = input.read_string()?;
        input.end_slice()
    }
}

#[derive(Debug, Default)]
pub struct DerivedError {
    pub reason: String,
    pub code: i32,
}

impl UserException for DerivedError {
    fn ice_id(&self) -> &str {
        DERIVED_ERROR_ID
    }

    fn write_impl(&self, out: &mut OutputStream<'_>) -> Result<()> {
        out.start_slice(DERIVED_ERROR_ID, None, false)?;
        out.write_int(self.code);
        out.end_slice()?;
        out.start_slice(BASE_ERROR_ID, None, true)?;
        out.write_string(&self.reason)?;
        out.end_slice()
    }

    fn read_impl(&mut self, input: &mut InputStream<'_>) -> Result<()> {
        input.start_slice()?;
        self.code = input.read_int()?;
        input.end_slice()?;
        input.start_slice()?;
        self.reason = input.read_string()?;
        input.end_slice()
    }
}

/// Exception carrying a class member.
#[derive(Debug, Default)]
pub struct NodeError {
    pub node: Option<ValueHandle>,
}

impl UserException for NodeError {
    fn ice_id(&self) -> &str {
        NODE_ERROR_ID
    }

    fn write_impl(&self, out: &mut OutputStream<'_>) -> Result<()> {
        out.start_slice(NODE_ERROR_ID, None, true)?;
        out.write_value(self.node)?;
        out.end_slice()
    }

    fn read_impl(&mut self, input: &mut InputStream<'_>) -> Result<()> {
        input.start_slice()?;
        input.read_value_into(|ex: &mut NodeError, node| ex.node = node)?;
        input.end_slice()
    }

    fn uses_classes(&self) -> bool {
        true
    }
}

/// Registry knowing every fixture type.
pub fn full_registry() -> FactoryRegistry {
    let registry = FactoryRegistry::new();
    registry.register_value::<Node>(NODE_ID).expect("register Node");
    registry.register_value::<Base>(BASE_ID).expect("register Base");
    registry.register_value::<Derived>(DERIVED_ID).expect("register Derived");
    registry.register_exception::<BaseError>(BASE_ERROR_ID).expect("register BaseError");
    registry
        .register_exception::<DerivedError>(DERIVED_ERROR_ID)
        .expect("register DerivedError");
    registry.register_exception::<NodeError>(NODE_ERROR_ID).expect("register NodeError");
    registry
}

/// Registry of an older peer: no `Derived` and no `DerivedError`.
pub fn base_only_registry() -> FactoryRegistry {
    let registry = FactoryRegistry::new();
    registry.register_value::<Node>(NODE_ID).expect("register Node");
    registry.register_value::<Base>(BASE_ID).expect("register Base");
    registry.register_exception::<BaseError>(BASE_ERROR_ID).expect("register BaseError");
    registry
}

/// Marshal `root` (and everything it reaches) in one encapsulation.
pub fn encode_root(
    graph: &ValueGraph,
    root: Option<ValueHandle>,
    encoding: EncodingVersion,
    format: FormatType,
) -> Vec<u8> {
    let mut out = OutputStream::new().with_graph(graph);
    out.start_write_encaps(encoding, format).expect("start encaps");
    out.write_value(root).expect("write value");
    out.write_pending_values().expect("write pending values");
    out.end_write_encaps().expect("end encaps");
    out.into_bytes()
}

/// Unmarshal the single root written by [`encode_root`].
pub fn decode_root(bytes: Vec<u8>, registry: &FactoryRegistry) -> Result<(ValueGraph, Option<ValueHandle>)> {
    let mut input = InputStream::new(bytes, registry);
    input.start_read_encaps()?;
    let pending = input.read_value()?;
    input.read_pending_values()?;
    input.end_read_encaps()?;
    let root = input.resolve(pending)?;
    Ok((input.into_graph(), root))
}
