// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Class instances and the arena that owns them.
//!
//! Object graphs (shared, cyclic, self-referencing) are stored in a
//! [`ValueGraph`]: each instance lives in one slot and every reference to it is
//! a [`ValueHandle`], the slot index. Identity is handle equality, so
//! `decoded.next == Some(decoded_handle)` is how a self-reference reads back.
//!
//! # Arena layout
//!
//! ```text
//! ValueGraph
//! +-- slots: Vec<Slot>
//!     +-- Ready(ValueEntry { value: Box<dyn Value>, sliced: Option<SlicedData> })
//!     +-- CheckedOut            (body currently being unmarshaled)
//! ```
//!
//! Slices preserved while decoding (unknown derived types) are kept in the
//! entry next to the instance and re-emitted when the instance is marshaled
//! again with the sliced format.

use std::any::Any;
use std::fmt;

use crate::error::{Error, HookResult, Result};
use crate::input::InputStream;
use crate::output::OutputStream;

/// Upcast helper implemented for every `'static` type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A class instance that can marshal itself slice by slice.
///
/// `write_impl` emits one `start_slice`/`end_slice` pair per hierarchy level,
/// most-derived first; `read_impl` consumes them in the same order. The engine
/// wraps both calls with the instance bookkeeping (preserved slices, the 1.0
/// root slice), so implementations only describe their own members.
///
/// ```ignore
/// impl Value for Node {
///     fn ice_id(&self) -> &str { "::Demo::Node" }
///
///     fn write_impl(&self, out: &mut OutputStream<'_>) -> Result<()> {
///         out.start_slice("::Demo::Node", None, true)?;
///         out.write_string(&self.name)?;
///         out.write_value(self.next)?;
///         out.end_slice()
///     }
///
///     fn read_impl(&mut self, input: &mut InputStream<'_>) -> Result<()> {
///         input.start_slice()?;
///         self.name = input.read_string()?;
///         input.read_value_into(|node: &mut Node, next| node.next = next)?;
///         input.end_slice()
///     }
/// }
/// ```
pub trait Value: AsAny + fmt::Debug {
    /// Most-derived type id.
    fn ice_id(&self) -> &str;

    /// Marshal every slice of this instance.
    fn write_impl(&self, out: &mut OutputStream<'_>) -> Result<()>;

    /// Unmarshal every slice of this instance.
    fn read_impl(&mut self, input: &mut InputStream<'_>) -> Result<()>;

    /// Invoked once before the instance is marshaled.
    fn ice_pre_marshal(&self) -> HookResult {
        Ok(())
    }

    /// Invoked once every reference of the decoded graph is patched.
    fn ice_post_unmarshal(&mut self) -> HookResult {
        Ok(())
    }
}

impl dyn Value {
    pub fn downcast_ref<T: Value>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Value>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    pub fn is<T: Value>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// Index of an instance in a [`ValueGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueHandle(u32);

impl ValueHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ValueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One level of an instance whose type was unknown to the decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceInfo {
    /// Type id of the slice (empty when only a compact id was sent).
    pub type_id: String,
    /// Compact id of the slice, if one was sent.
    pub compact_id: Option<i32>,
    /// Raw member bytes, tagged-member end marker excluded.
    pub bytes: Vec<u8>,
    /// Instances referenced from this slice's indirection table.
    pub values: Vec<Option<ValueHandle>>,
    pub has_optional_members: bool,
    pub is_last_slice: bool,
}

/// Slices preserved from a partially known instance, most-derived first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlicedData {
    pub slices: Vec<SliceInfo>,
}

impl SlicedData {
    pub fn new(slices: Vec<SliceInfo>) -> Self {
        Self { slices }
    }

    /// Type id of the most-derived preserved slice.
    pub fn most_derived_type_id(&self) -> Option<&str> {
        self.slices.first().map(|s| s.type_id.as_str())
    }
}

/// Placeholder for an instance none of whose slices had a factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSlicedValue {
    unknown_type_id: String,
}

impl UnknownSlicedValue {
    pub fn new(unknown_type_id: impl Into<String>) -> Self {
        Self {
            unknown_type_id: unknown_type_id.into(),
        }
    }

    pub fn unknown_type_id(&self) -> &str {
        &self.unknown_type_id
    }
}

impl Value for UnknownSlicedValue {
    fn ice_id(&self) -> &str {
        &self.unknown_type_id
    }

    /// Writes nothing: the slices are re-emitted from the preserved sliced
    /// data, and only in the sliced format. A compact re-encode drops them.
    fn write_impl(&self, _out: &mut OutputStream<'_>) -> Result<()> {
        Ok(())
    }

    /// Reads nothing: every slice of an unknown type is preserved on decode.
    fn read_impl(&mut self, _input: &mut InputStream<'_>) -> Result<()> {
        Ok(())
    }
}

/// An instance plus the slices preserved for it.
#[derive(Debug)]
pub struct ValueEntry {
    pub value: Box<dyn Value>,
    pub sliced: Option<SlicedData>,
}

#[derive(Debug)]
enum Slot {
    Ready(ValueEntry),
    CheckedOut,
}

/// Arena owning every instance of an object graph.
#[derive(Debug, Default)]
pub struct ValueGraph {
    slots: Vec<Slot>,
}

impl ValueGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Add an instance and return its handle.
    pub fn insert<V: Value>(&mut self, value: V) -> ValueHandle {
        self.insert_boxed(Box::new(value))
    }

    pub fn insert_boxed(&mut self, value: Box<dyn Value>) -> ValueHandle {
        self.push(Slot::Ready(ValueEntry {
            value,
            sliced: None,
        }))
    }

    fn push(&mut self, slot: Slot) -> ValueHandle {
        let handle = ValueHandle(self.slots.len() as u32);
        self.slots.push(slot);
        handle
    }

    pub fn entry(&self, handle: ValueHandle) -> Option<&ValueEntry> {
        match self.slots.get(handle.index()) {
            Some(Slot::Ready(entry)) => Some(entry),
            _ => None,
        }
    }

    pub fn entry_mut(&mut self, handle: ValueHandle) -> Option<&mut ValueEntry> {
        match self.slots.get_mut(handle.index()) {
            Some(Slot::Ready(entry)) => Some(entry),
            _ => None,
        }
    }

    pub fn value(&self, handle: ValueHandle) -> Option<&dyn Value> {
        self.entry(handle).map(|e| e.value.as_ref())
    }

    /// Typed access; `None` when the handle is dangling or of another type.
    pub fn get<T: Value>(&self, handle: ValueHandle) -> Option<&T> {
        self.value(handle).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Value>(&mut self, handle: ValueHandle) -> Option<&mut T> {
        self.entry_mut(handle)
            .and_then(|e| e.value.as_mut().downcast_mut::<T>())
    }

    /// Slices preserved for an instance.
    pub fn sliced_data(&self, handle: ValueHandle) -> Option<&SlicedData> {
        self.entry(handle).and_then(|e| e.sliced.as_ref())
    }

    pub fn set_sliced_data(&mut self, handle: ValueHandle, sliced: Option<SlicedData>) -> Result<()> {
        let entry = self
            .entry_mut(handle)
            .ok_or_else(|| Error::marshal(format!("no instance at {}", handle)))?;
        entry.sliced = sliced;
        Ok(())
    }

    /// Handles of every instance, in insertion order.
    pub fn handles(&self) -> impl Iterator<Item = ValueHandle> + '_ {
        (0..self.slots.len()).map(|i| ValueHandle(i as u32))
    }

    pub(crate) fn reserve(&mut self) -> ValueHandle {
        self.push(Slot::CheckedOut)
    }

    pub(crate) fn is_checked_out(&self, handle: ValueHandle) -> bool {
        matches!(self.slots.get(handle.index()), Some(Slot::CheckedOut))
    }

    pub(crate) fn check_in(&mut self, handle: ValueHandle, entry: ValueEntry) -> Result<()> {
        match self.slots.get_mut(handle.index()) {
            Some(slot @ Slot::CheckedOut) => {
                *slot = Slot::Ready(entry);
                Ok(())
            }
            _ => Err(Error::marshal(format!("instance {} is not checked out", handle))),
        }
    }
}
