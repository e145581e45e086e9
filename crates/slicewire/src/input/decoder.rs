// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Class and exception decoders.
//!
//! Every instance is checked out of the [`ValueGraph`] while its body is read
//! and checked back in afterwards. A reference is resolved through a [`Patch`]:
//! immediately when the target's wire id is already known, otherwise when the
//! target is unmarshaled. Patches aimed at a checked-out owner (the instance
//! being read, or one of its ancestors) wait in `deferred` until check-in.
//!
//! ```text
//! wire id --unmarshaled--> ValueHandle
//!         --patch_map----> [Patch, ...]   (fired in registration order)
//! ```
//!
//! Post-unmarshal hooks run once no patch is outstanding anywhere in the
//! graph, so every member is populated when a hook observes it.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use super::InputStream;
use crate::buffer::Buffer;
use crate::config::{
    FLAG_HAS_INDIRECTION_TABLE, FLAG_HAS_OPTIONAL_MEMBERS, FLAG_HAS_SLICE_SIZE,
    FLAG_HAS_TYPE_ID_COMPACT, FLAG_HAS_TYPE_ID_INDEX, FLAG_HAS_TYPE_ID_STRING, FLAG_IS_LAST_SLICE,
    MIN_SLICE_SIZE, ROOT_TYPE_ID,
};
use crate::encoding::{EncodingVersion, SliceType};
use crate::error::{Error, Result};
use crate::exception::{DecodedException, UnknownUserException, UserException};
use crate::primitive::peek_size;
use crate::registry::ExceptionFactory;
use crate::value::{SliceInfo, SlicedData, UnknownSlicedValue, Value, ValueEntry, ValueHandle};

type MemberSetter = Box<dyn FnOnce(&mut ValueEntry, Option<ValueHandle>) -> Result<()>>;
type ExceptionSetter = Box<dyn FnOnce(&mut dyn UserException, Option<ValueHandle>) -> Result<()>>;

/// Patch bound to its resolved target, waiting for its owner's check-in.
pub(super) type DeferredPatch = Box<dyn FnOnce(&mut ValueEntry) -> Result<()>>;

/// Patch bound to its resolved target, waiting for the exception body to finish.
pub(super) type ExceptionPatch = Box<dyn FnOnce(&mut dyn UserException) -> Result<()>>;

/// Where a decoded reference goes once its target is known.
enum Patch {
    /// Slot of a [`PendingValue`].
    Root(usize),
    /// A member of an arena instance.
    Member { owner: ValueHandle, set: MemberSetter },
    /// A member of the exception being read.
    Exception(ExceptionSetter),
    /// Reference read only to be skipped.
    Discard,
}

impl fmt::Debug for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Patch::Root(slot) => write!(f, "Root({})", slot),
            Patch::Member { owner, .. } => write!(f, "Member({})", owner),
            Patch::Exception(_) => f.write_str("Exception"),
            Patch::Discard => f.write_str("Discard"),
        }
    }
}

/// Body currently being read.
#[derive(Debug, Clone, Copy)]
pub(super) enum Owner {
    Value(ValueHandle),
    Exception,
}

/// A class reference read at the top level, resolved with
/// [`InputStream::resolve`] once its target has been unmarshaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct PendingValue(usize);

#[derive(Debug, Default)]
struct DecoderCommon {
    unmarshaled: HashMap<i32, ValueHandle>,
    patch_map: HashMap<i32, Vec<Patch>>,
    type_ids: HashMap<i32, String>,
    next_type_index: i32,
    /// Instances whose post-unmarshal hook is pending.
    hook_list: Vec<ValueHandle>,
    next_id: i32,
}

/// Type id as a string (registered for later indexes) or as a known index.
fn read_type_id(common: &mut DecoderCommon, buf: &mut Buffer, is_index: bool) -> Result<String> {
    if is_index {
        let index = buf.read_size()? as i32;
        return common
            .type_ids
            .get(&index)
            .cloned()
            .ok_or_else(|| Error::marshal(format!("unknown type id index {}", index)));
    }
    let type_id = buf.read_string()?;
    common.next_type_index += 1;
    common.type_ids.insert(common.next_type_index, type_id.clone());
    Ok(type_id)
}

#[derive(Debug, Default)]
pub(super) struct Decoder10 {
    common: DecoderCommon,
    slice_type: SliceType,
    /// First slice header already consumed while looking for a factory.
    skip_first_slice: bool,
    type_id: String,
    slice_size: i32,
}

#[derive(Debug, Default)]
struct InstanceData {
    slice_type: SliceType,
    skip_first_slice: bool,
    /// Slices skipped for lack of a factory.
    slices: Vec<SliceInfo>,
    /// Wire ids of each skipped slice's indirection table.
    indirection_tables: Vec<Vec<i32>>,
    slice_flags: u8,
    slice_size: i32,
    type_id: String,
    compact_id: Option<i32>,
    /// References into the current slice's indirection table (0-based).
    indirect_patches: Vec<(usize, Patch)>,
    /// Highest tag requested in the current slice.
    opt_floor: Option<i32>,
}

#[derive(Debug)]
pub(super) struct Decoder11 {
    common: DecoderCommon,
    /// Reused across instances; `frames[..depth]` are live.
    frames: Vec<InstanceData>,
    depth: usize,
}

impl Decoder11 {
    fn new() -> Self {
        Self {
            common: DecoderCommon {
                next_id: 1,
                ..DecoderCommon::default()
            },
            frames: Vec::new(),
            depth: 0,
        }
    }

    fn current_mut(&mut self) -> Option<&mut InstanceData> {
        self.depth.checked_sub(1).map(|i| &mut self.frames[i])
    }

    fn current_with_common(&mut self) -> Option<(&mut InstanceData, &mut DecoderCommon)> {
        let i = self.depth.checked_sub(1)?;
        Some((&mut self.frames[i], &mut self.common))
    }

    fn push(&mut self, slice_type: SliceType) {
        if self.frames.len() == self.depth {
            self.frames.push(InstanceData::default());
        }
        let frame = &mut self.frames[self.depth];
        frame.slice_type = slice_type;
        frame.skip_first_slice = false;
        frame.slices.clear();
        frame.indirection_tables.clear();
        frame.indirect_patches.clear();
        frame.slice_flags = 0;
        frame.slice_size = 0;
        frame.type_id.clear();
        frame.compact_id = None;
        frame.opt_floor = None;
        self.depth += 1;
    }

    fn pop(&mut self) {
        if let Some(frame) = self.current_mut() {
            frame.slices.clear();
            frame.indirection_tables.clear();
            frame.indirect_patches.clear();
        }
        self.depth = self.depth.saturating_sub(1);
    }
}

/// Decoder of one encapsulation, chosen by its encoding.
#[derive(Debug)]
pub(super) enum Decoder {
    V10(Decoder10),
    V11(Decoder11),
}

impl Decoder {
    fn new(encoding: EncodingVersion) -> Self {
        if encoding.is_1_0() {
            Decoder::V10(Decoder10::default())
        } else {
            Decoder::V11(Decoder11::new())
        }
    }

    fn common_mut(&mut self) -> &mut DecoderCommon {
        match self {
            Decoder::V10(dec) => &mut dec.common,
            Decoder::V11(dec) => &mut dec.common,
        }
    }

    /// Tagged-member state of the current 1.1 instance: whether its slice
    /// carries tagged members, and the highest tag requested so far.
    pub(super) fn instance_tags(&mut self) -> Option<(bool, &mut Option<i32>)> {
        match self {
            Decoder::V11(dec) => dec.current_mut().map(|frame| {
                (
                    frame.slice_flags & FLAG_HAS_OPTIONAL_MEMBERS != 0,
                    &mut frame.opt_floor,
                )
            }),
            Decoder::V10(_) => None,
        }
    }
}

fn outside_instance() -> Error {
    Error::marshal("slice read outside of an instance")
}

fn invalid_object_id(index: i32) -> Error {
    Error::marshal(format!("invalid object id {}", index))
}

impl<'r> InputStream<'r> {
    fn split(&mut self) -> (&mut Decoder, &mut Buffer) {
        let frame = self.encaps.current_mut();
        let encoding = frame.encoding;
        let decoder = frame.decoder.get_or_insert_with(|| Decoder::new(encoding));
        (decoder, &mut self.buf)
    }

    fn decoder_mut(&mut self) -> &mut Decoder {
        self.split().0
    }

    fn is_1_0(&mut self) -> bool {
        matches!(self.decoder_mut(), Decoder::V10(_))
    }

    fn decoder10_mut(&mut self) -> Result<&mut Decoder10> {
        match self.decoder_mut() {
            Decoder::V10(dec) => Ok(dec),
            Decoder::V11(_) => Err(Error::marshal("operation requires the 1.0 encoding")),
        }
    }

    fn decoder11_mut(&mut self) -> Result<&mut Decoder11> {
        match self.decoder_mut() {
            Decoder::V11(dec) => Ok(dec),
            Decoder::V10(_) => Err(Error::marshal("operation requires the 1.1 encoding")),
        }
    }

    fn frame11(&mut self) -> Result<&mut InstanceData> {
        self.decoder11_mut()?
            .current_mut()
            .ok_or_else(outside_instance)
    }

    // ========================================================================
    // Patches
    // ========================================================================

    /// Deliver a resolved reference to its target.
    fn fire(&mut self, patch: Patch, target: Option<ValueHandle>) -> Result<()> {
        match patch {
            Patch::Root(slot) => {
                let root = self
                    .roots
                    .get_mut(slot)
                    .ok_or_else(|| Error::marshal(format!("unknown pending value {}", slot)))?;
                *root = Some(target);
                Ok(())
            }
            Patch::Member { owner, set } => {
                if self.graph.is_checked_out(owner) {
                    let deferred: DeferredPatch = Box::new(move |entry| set(entry, target));
                    self.deferred.entry(owner).or_default().push(deferred);
                    return Ok(());
                }
                let entry = self
                    .graph
                    .entry_mut(owner)
                    .ok_or_else(|| Error::marshal(format!("no instance at {}", owner)))?;
                set(entry, target)
            }
            Patch::Exception(set) => {
                let patch: ExceptionPatch = Box::new(move |ex| set(ex, target));
                self.exception_patches.push(patch);
                Ok(())
            }
            Patch::Discard => Ok(()),
        }
    }

    /// Fire now if `index` is known, otherwise queue until it is unmarshaled.
    fn add_patch_entry(&mut self, index: i32, patch: Patch) -> Result<()> {
        let common = self.decoder_mut().common_mut();
        let known = common.unmarshaled.get(&index).copied();
        match known {
            Some(handle) => self.fire(patch, Some(handle)),
            None => {
                common.patch_map.entry(index).or_default().push(patch);
                Ok(())
            }
        }
    }

    fn patch_map_is_empty(&mut self) -> bool {
        self.decoder_mut().common_mut().patch_map.is_empty()
    }

    // ========================================================================
    // References
    // ========================================================================

    /// Read a class reference outside of any member, e.g. an operation
    /// parameter. Under 1.0 it resolves after
    /// [`read_pending_values`](Self::read_pending_values).
    pub fn read_value(&mut self) -> Result<PendingValue> {
        let slot = self.roots.len();
        self.roots.push(None);
        self.read_reference(Patch::Root(slot))?;
        Ok(PendingValue(slot))
    }

    /// Target of a reference read with [`read_value`](Self::read_value).
    pub fn resolve(&self, pending: PendingValue) -> Result<Option<ValueHandle>> {
        match self.roots.get(pending.0) {
            Some(Some(target)) => Ok(*target),
            _ => Err(Error::marshal("index for class received, but no instance")),
        }
    }

    /// Read a class member of the instance (or exception) being unmarshaled.
    ///
    /// `set` runs once the target is known, possibly after the current body
    /// has been read; `T` is the concrete type of the owner.
    ///
    /// ```ignore
    /// input.read_value_into(|node: &mut Node, next| node.next = next)?;
    /// ```
    pub fn read_value_into<T, F>(&mut self, set: F) -> Result<()>
    where
        T: Any,
        F: FnOnce(&mut T, Option<ValueHandle>) + 'static,
    {
        let patch = match self.owners.last() {
            Some(Owner::Value(owner)) => Patch::Member {
                owner: *owner,
                set: Box::new(move |entry: &mut ValueEntry, target: Option<ValueHandle>| {
                    let owner = (*entry.value)
                        .as_any_mut()
                        .downcast_mut::<T>()
                        .ok_or_else(|| Error::marshal("class member patched on an instance of another type"))?;
                    set(owner, target);
                    Ok(())
                }),
            },
            Some(Owner::Exception) => Patch::Exception(Box::new(
                move |ex: &mut dyn UserException, target: Option<ValueHandle>| {
                    let owner = (*ex)
                        .as_any_mut()
                        .downcast_mut::<T>()
                        .ok_or_else(|| Error::marshal("class member patched on an exception of another type"))?;
                    set(owner, target);
                    Ok(())
                },
            )),
            None => return Err(Error::marshal("class member read outside of an instance")),
        };
        self.read_reference(patch)
    }

    /// Read and drop a class reference (the instance is still unmarshaled).
    pub fn skip_value(&mut self) -> Result<()> {
        self.read_reference(Patch::Discard)
    }

    fn read_reference(&mut self, patch: Patch) -> Result<()> {
        if self.is_1_0() {
            let index: i32 = self.buf.read_scalar()?;
            if index > 0 {
                return Err(invalid_object_id(index));
            }
            let index = index.checked_neg().ok_or_else(|| invalid_object_id(index))?;
            return if index == 0 {
                self.fire(patch, None)
            } else {
                self.add_patch_entry(index, patch)
            };
        }

        let index = self.buf.read_size()? as i32;
        if index == 0 {
            return self.fire(patch, None);
        }
        if let Some(frame) = self.decoder11_mut()?.current_mut() {
            if frame.slice_flags & FLAG_HAS_INDIRECTION_TABLE != 0 {
                if !matches!(patch, Patch::Discard) {
                    frame.indirect_patches.push((index as usize - 1, patch));
                }
                return Ok(());
            }
        }
        self.read_instance(index, patch).map(|_| ())
    }

    // ========================================================================
    // Instances
    // ========================================================================

    /// 1.1 instance: a back-reference (`index > 1`) or an inline body (`1`).
    fn read_instance(&mut self, index: i32, patch: Patch) -> Result<i32> {
        if index < 1 {
            return Err(invalid_object_id(index));
        }
        if index > 1 {
            if !matches!(patch, Patch::Discard) {
                self.add_patch_entry(index, patch)?;
            }
            return Ok(index);
        }

        let depth_max = self.config.class_graph_depth_max;
        let dec = self.decoder11_mut()?;
        if dec.depth >= depth_max {
            return Err(Error::marshal("maximum class graph depth reached"));
        }
        dec.push(SliceType::Value);
        dec.common.next_id += 1;
        let index = dec.common.next_id;

        self.start_slice()?;
        let mut most_derived: Option<String> = None;
        let value = loop {
            let frame = self.frame11()?;
            if let Some(compact) = frame.compact_id {
                let resolved = self.registry.resolve_compact_id(compact)?.unwrap_or_default();
                self.frame11()?.type_id = resolved;
            }
            let frame = self.frame11()?;
            let type_id = frame.type_id.clone();
            let compact = frame.compact_id;
            let most_derived = most_derived.get_or_insert_with(|| type_id.clone());

            if !type_id.is_empty() {
                if let Some(value) = self.registry.new_value(&type_id) {
                    break value;
                }
            }
            if !self.config.slice_values {
                let shown = match compact {
                    Some(compact) if type_id.is_empty() => compact.to_string(),
                    _ => type_id,
                };
                return Err(Error::no_factory(
                    "no value factory found and value slicing is disabled",
                    shown,
                ));
            }

            self.skip_slice()?;
            if self.frame11()?.slice_flags & FLAG_IS_LAST_SLICE != 0 {
                // Last chance for a factory to keep the instance.
                break match self.registry.new_value(ROOT_TYPE_ID) {
                    Some(value) => value,
                    None => Box::new(UnknownSlicedValue::new(most_derived.clone())),
                };
            }
            self.start_slice()?;
        };

        let handle = self.unmarshal(index, value)?;
        if self.decoder11_mut()?.depth == 0 && !self.patch_map_is_empty() {
            return Err(Error::marshal("index for class received, but no instance"));
        }
        self.fire(patch, Some(handle))?;
        Ok(index)
    }

    /// Read an instance body into the arena and fire everything waiting on it.
    fn unmarshal(&mut self, index: i32, mut value: Box<dyn Value>) -> Result<ValueHandle> {
        let handle = self.graph.reserve();
        self.decoder_mut()
            .common_mut()
            .unmarshaled
            .insert(index, handle);

        self.owners.push(Owner::Value(handle));
        let body = self.read_value_body(handle, &mut *value);
        self.owners.pop();
        let sliced = body?;

        self.graph.check_in(handle, ValueEntry { value, sliced })?;
        if let Some(patches) = self.deferred.remove(&handle) {
            let entry = self
                .graph
                .entry_mut(handle)
                .ok_or_else(|| Error::marshal(format!("no instance at {}", handle)))?;
            for patch in patches {
                patch(&mut *entry)?;
            }
        }

        let waiting = self
            .decoder_mut()
            .common_mut()
            .patch_map
            .remove(&index)
            .unwrap_or_default();
        for patch in waiting {
            self.fire(patch, Some(handle))?;
        }

        self.schedule_post_unmarshal(handle);
        Ok(handle)
    }

    fn read_value_body(&mut self, handle: ValueHandle, value: &mut dyn Value) -> Result<Option<SlicedData>> {
        self.start_instance(SliceType::Value)?;
        value.read_impl(self)?;
        self.end_instance(Some(handle))
    }

    /// Queue the hook of `handle`; run every queued hook once no patch is outstanding.
    fn schedule_post_unmarshal(&mut self, handle: ValueHandle) {
        let common = self.decoder_mut().common_mut();
        common.hook_list.push(handle);
        if !common.patch_map.is_empty() {
            return;
        }
        let ready = std::mem::take(&mut common.hook_list);
        for handle in ready {
            let Some(entry) = self.graph.entry_mut(handle) else {
                continue;
            };
            if let Err(e) = entry.value.ice_post_unmarshal() {
                self.logger
                    .warning(&format!("exception raised by ice_post_unmarshal:\n{}", e));
            }
        }
    }

    /// Read the 1.0 pending-instance batches that follow the top-level data.
    ///
    /// Fails if a referenced id was never supplied. No-op under 1.1.
    pub fn read_pending_values(&mut self) -> Result<()> {
        if !self.encoding().is_1_0() {
            return Ok(());
        }
        loop {
            let count = self.buf.read_size()?;
            if count == 0 {
                break;
            }
            for _ in 0..count {
                self.read_instance_10()?;
            }
        }
        if !self.patch_map_is_empty() {
            return Err(Error::marshal("index for class received, but no instance"));
        }
        Ok(())
    }

    fn read_instance_10(&mut self) -> Result<()> {
        let index: i32 = self.buf.read_scalar()?;
        if index <= 0 {
            return Err(invalid_object_id(index));
        }
        let dec = self.decoder10_mut()?;
        if dec.common.unmarshaled.contains_key(&index) {
            return Err(Error::marshal(format!("duplicate object id {}", index)));
        }
        dec.slice_type = SliceType::Value;
        dec.skip_first_slice = false;

        self.start_slice()?;
        let most_derived = self.decoder10_mut()?.type_id.clone();
        let value = loop {
            let type_id = self.decoder10_mut()?.type_id.clone();
            // The root type id marks the last 1.0 slice.
            if type_id == ROOT_TYPE_ID {
                return Err(Error::no_factory("", most_derived));
            }
            if let Some(value) = self.registry.new_value(&type_id) {
                break value;
            }
            if !self.config.slice_values {
                return Err(Error::no_factory(
                    "no value factory found and value slicing is disabled",
                    type_id,
                ));
            }
            self.skip_slice()?;
            self.start_slice()?;
        };
        self.unmarshal(index, value).map(|_| ())
    }

    fn start_instance(&mut self, slice_type: SliceType) -> Result<()> {
        match self.decoder_mut() {
            Decoder::V10(dec) => {
                dec.slice_type = slice_type;
                dec.skip_first_slice = true;
            }
            Decoder::V11(dec) => {
                let frame = dec.current_mut().ok_or_else(outside_instance)?;
                frame.skip_first_slice = true;
            }
        }
        Ok(())
    }

    /// Finish an instance; returns the slices preserved for `owner`.
    fn end_instance(&mut self, owner: Option<ValueHandle>) -> Result<Option<SlicedData>> {
        if self.is_1_0() {
            if self.decoder10_mut()?.slice_type == SliceType::Value {
                self.start_slice()?;
                if self.buf.read_size()? != 0 {
                    return Err(Error::marshal("invalid Object slice"));
                }
                self.end_slice()?;
            }
            self.decoder10_mut()?.slice_type = SliceType::None;
            return Ok(None);
        }
        let sliced = match owner {
            Some(owner) => self.read_sliced_data(owner)?,
            None => None,
        };
        self.decoder11_mut()?.pop();
        Ok(sliced)
    }

    /// Bind the indirection tables of skipped slices to the preserved slices.
    fn read_sliced_data(&mut self, owner: ValueHandle) -> Result<Option<SlicedData>> {
        let frame = self.frame11()?;
        if frame.slices.is_empty() {
            return Ok(None);
        }
        let slices = std::mem::take(&mut frame.slices);
        let tables = std::mem::take(&mut frame.indirection_tables);
        for (n, table) in tables.into_iter().enumerate() {
            for (j, index) in table.into_iter().enumerate() {
                let set: MemberSetter =
                    Box::new(move |entry: &mut ValueEntry, target: Option<ValueHandle>| {
                        let slot = entry
                            .sliced
                            .as_mut()
                            .and_then(|sliced| sliced.slices.get_mut(n))
                            .and_then(|info| info.values.get_mut(j))
                            .ok_or_else(|| Error::marshal("preserved slice reference out of range"))?;
                        *slot = target;
                        Ok(())
                    });
                self.add_patch_entry(index, Patch::Member { owner, set })?;
            }
        }
        Ok(Some(SlicedData::new(slices)))
    }

    // ========================================================================
    // Slices
    // ========================================================================

    /// Read the next slice header of the current instance or exception.
    ///
    /// The first call after a factory lookup returns without reading: that
    /// header was consumed to find the factory.
    pub fn start_slice(&mut self) -> Result<()> {
        let (decoder, buf) = self.split();
        match decoder {
            Decoder::V10(dec) => {
                if dec.skip_first_slice {
                    dec.skip_first_slice = false;
                    return Ok(());
                }
                dec.type_id = match dec.slice_type {
                    SliceType::Value => {
                        let is_index: bool = buf.read_scalar()?;
                        read_type_id(&mut dec.common, buf, is_index)?
                    }
                    SliceType::Exception => buf.read_string()?,
                    SliceType::None => return Err(outside_instance()),
                };
                dec.slice_size = read_slice_size(buf)?;
            }
            Decoder::V11(dec) => {
                let (frame, common) = dec.current_with_common().ok_or_else(outside_instance)?;
                frame.opt_floor = None;
                if frame.skip_first_slice {
                    frame.skip_first_slice = false;
                    return Ok(());
                }
                let flags: u8 = buf.read_scalar()?;
                frame.slice_flags = flags;
                match frame.slice_type {
                    SliceType::Value if flags & FLAG_HAS_TYPE_ID_COMPACT == FLAG_HAS_TYPE_ID_COMPACT => {
                        frame.type_id.clear();
                        frame.compact_id = Some(buf.read_size()? as i32);
                    }
                    SliceType::Value
                        if flags & (FLAG_HAS_TYPE_ID_STRING | FLAG_HAS_TYPE_ID_INDEX) != 0 =>
                    {
                        frame.type_id =
                            read_type_id(common, buf, flags & FLAG_HAS_TYPE_ID_INDEX != 0)?;
                        frame.compact_id = None;
                    }
                    SliceType::Value => {
                        // Compact format: only the first slice names its type.
                        frame.type_id.clear();
                        frame.compact_id = None;
                    }
                    SliceType::Exception => frame.type_id = buf.read_string()?,
                    SliceType::None => return Err(outside_instance()),
                }
                frame.slice_size = if flags & FLAG_HAS_SLICE_SIZE != 0 {
                    read_slice_size(buf)?
                } else {
                    0
                };
            }
        }
        Ok(())
    }

    /// Finish the current slice: skip unread tagged members and resolve
    /// references through the slice's indirection table.
    pub fn end_slice(&mut self) -> Result<()> {
        if self.is_1_0() {
            return Ok(());
        }
        let flags = self.frame11()?.slice_flags;
        if flags & FLAG_HAS_OPTIONAL_MEMBERS != 0 {
            self.skip_opts()?;
        }
        if flags & FLAG_HAS_INDIRECTION_TABLE == 0 {
            return Ok(());
        }

        let table = self.read_indirection_table()?;
        if table.is_empty() {
            return Err(Error::marshal("empty indirection table"));
        }
        let patches = std::mem::take(&mut self.frame11()?.indirect_patches);
        if patches.is_empty() && flags & FLAG_HAS_OPTIONAL_MEMBERS == 0 {
            return Err(Error::marshal("no references to indirection table"));
        }
        for (position, patch) in patches {
            let index = *table
                .get(position)
                .ok_or_else(|| Error::marshal("indirection out of range"))?;
            self.add_patch_entry(index, patch)?;
        }
        Ok(())
    }

    /// Read a `Size`-counted table of instances; returns their wire ids.
    fn read_indirection_table(&mut self) -> Result<Vec<i32>> {
        let count = self.read_and_check_seq_size(1)?;
        let mut table = Vec::with_capacity(count);
        for _ in 0..count {
            let index = self.buf.read_size()? as i32;
            table.push(self.read_instance(index, Patch::Discard)?);
        }
        Ok(table)
    }

    /// Skip the current slice, preserving it (1.1) for re-emission.
    fn skip_slice(&mut self) -> Result<()> {
        if self.config.trace_slicing {
            let (kind, type_id) = self.slice_description();
            log::debug!("[slicewire] slicing unknown {} type `{}`", kind, type_id);
        }
        if self.is_1_0() {
            let size = self.decoder10_mut()?.slice_size;
            return self.buf.skip(size as usize - 4);
        }

        let frame = self.frame11()?;
        let flags = frame.slice_flags;
        let size = frame.slice_size;
        let type_id = frame.type_id.clone();
        let compact_id = frame.compact_id;
        if flags & FLAG_HAS_SLICE_SIZE == 0 {
            let shown = match compact_id {
                Some(compact) if type_id.is_empty() => compact.to_string(),
                _ => type_id,
            };
            return Err(Error::no_factory(
                "no value factory found and compact format prevents slicing \
                 (the sender should use the sliced format instead)",
                shown,
            ));
        }

        let start = self.buf.position();
        self.buf.skip(size as usize - 4)?;
        let has_optional_members = flags & FLAG_HAS_OPTIONAL_MEMBERS != 0;
        // The end marker is written again when the slice is re-emitted.
        let end = if has_optional_members {
            self.buf.position() - 1
        } else {
            self.buf.position()
        };
        let bytes = self.buf.slice(start, end)?.to_vec();

        let table = if flags & FLAG_HAS_INDIRECTION_TABLE != 0 {
            self.read_indirection_table()?
        } else {
            Vec::new()
        };
        let info = SliceInfo {
            type_id,
            compact_id,
            bytes,
            values: vec![None; table.len()],
            has_optional_members,
            is_last_slice: flags & FLAG_IS_LAST_SLICE != 0,
        };
        let frame = self.frame11()?;
        frame.indirection_tables.push(table);
        frame.slices.push(info);
        Ok(())
    }

    fn slice_description(&mut self) -> (&'static str, String) {
        let (slice_type, type_id) = match self.decoder_mut() {
            Decoder::V10(dec) => (dec.slice_type, dec.type_id.clone()),
            Decoder::V11(dec) => match dec.current_mut() {
                Some(frame) => (frame.slice_type, frame.type_id.clone()),
                None => (SliceType::None, String::new()),
            },
        };
        let kind = match slice_type {
            SliceType::Exception => "exception",
            _ => "object",
        };
        (kind, type_id)
    }

    // ========================================================================
    // Exceptions
    // ========================================================================

    /// Decode a user exception using the registry's exception factories.
    pub fn read_exception(&mut self) -> Result<DecodedException> {
        self.read_exception_with(None)
    }

    /// Decode a user exception, trying `factory` before the registry at each slice.
    ///
    /// An exception none of whose slices has a factory decodes to
    /// [`DecodedException::Unknown`].
    pub fn read_exception_with(&mut self, factory: Option<ExceptionFactory>) -> Result<DecodedException> {
        self.exception_patches.clear();
        if self.is_1_0() {
            self.read_exception_10(factory.as_ref())
        } else {
            self.read_exception_11(factory.as_ref())
        }
    }

    fn new_exception(&self, factory: Option<&ExceptionFactory>, type_id: &str) -> Option<Box<dyn UserException>> {
        if let Some(ex) = factory.and_then(|factory| factory(type_id)) {
            return Some(ex);
        }
        self.registry
            .find_exception_factory(type_id)
            .and_then(|factory| factory(type_id))
    }

    fn read_exception_body(&mut self, ex: &mut dyn UserException) -> Result<()> {
        self.start_instance(SliceType::Exception)?;
        self.owners.push(Owner::Exception);
        let body = ex.read_impl(self);
        self.owners.pop();
        body?;
        self.end_instance(None).map(|_| ())
    }

    fn apply_exception_patches(&mut self, ex: &mut dyn UserException) -> Result<()> {
        for patch in std::mem::take(&mut self.exception_patches) {
            patch(&mut *ex)?;
        }
        Ok(())
    }

    fn read_exception_10(&mut self, factory: Option<&ExceptionFactory>) -> Result<DecodedException> {
        let uses_classes: bool = self.buf.read_scalar()?;
        let dec = self.decoder10_mut()?;
        dec.slice_type = SliceType::Exception;
        dec.skip_first_slice = false;

        self.start_slice()?;
        let most_derived = self.decoder10_mut()?.type_id.clone();
        loop {
            let type_id = self.decoder10_mut()?.type_id.clone();
            if let Some(mut ex) = self.new_exception(factory, &type_id) {
                self.read_exception_body(&mut *ex)?;
                if uses_classes {
                    self.read_pending_values()?;
                }
                if !self.patch_map_is_empty() {
                    self.exception_patches.clear();
                    return Err(Error::marshal("index for class received, but no instance"));
                }
                self.apply_exception_patches(&mut *ex)?;
                return Ok(DecodedException::Known(ex));
            }

            self.skip_slice()?;
            if !self.probe_exception_slice_10() {
                self.decoder10_mut()?.slice_type = SliceType::None;
                if uses_classes {
                    self.read_pending_values()?;
                }
                self.exception_patches.clear();
                return Ok(DecodedException::Unknown(UnknownUserException::from_type_id(
                    &most_derived,
                )));
            }
            self.start_slice()?;
        }
    }

    /// Whether another 1.0 exception slice header follows, without consuming it.
    ///
    /// 1.0 has no last-slice marker for exceptions: a header is a scoped UTF-8
    /// type id followed by a slice size that fits in the encapsulation. This is
    /// a heuristic. Bytes that follow the last slice, such as the pending value
    /// batches of an exception that uses classes, can in principle match it.
    fn probe_exception_slice_10(&self) -> bool {
        let end = self.encaps.current().end().min(self.buf.len());
        let Ok(rest) = self.buf.slice(self.buf.position(), end) else {
            return false;
        };
        let Some((len, width)) = peek_size(rest) else {
            return false;
        };
        let Some(type_id) = rest.get(width..width + len) else {
            return false;
        };
        if !type_id.starts_with(b"::") || std::str::from_utf8(type_id).is_err() {
            return false;
        }
        let header = width + len;
        let Some(raw) = rest.get(header..header + 4) else {
            return false;
        };
        let mut size = [0u8; 4];
        size.copy_from_slice(raw);
        let size = i32::from_le_bytes(size);
        size >= MIN_SLICE_SIZE && header + size as usize <= rest.len()
    }

    fn read_exception_11(&mut self, factory: Option<&ExceptionFactory>) -> Result<DecodedException> {
        self.decoder11_mut()?.push(SliceType::Exception);
        self.start_slice()?;
        let most_derived = self.frame11()?.type_id.clone();
        loop {
            let frame = self.frame11()?;
            let type_id = frame.type_id.clone();
            let flags = frame.slice_flags;
            if let Some(mut ex) = self.new_exception(factory, &type_id) {
                self.read_exception_body(&mut *ex)?;
                if !self.patch_map_is_empty() {
                    self.exception_patches.clear();
                    return Err(Error::marshal("index for class received, but no instance"));
                }
                self.apply_exception_patches(&mut *ex)?;
                return Ok(DecodedException::Known(ex));
            }

            // The compact format cannot skip: report what is known so far.
            let unknown = if flags & FLAG_HAS_SLICE_SIZE == 0 {
                Some(type_id)
            } else {
                self.skip_slice()?;
                (flags & FLAG_IS_LAST_SLICE != 0).then(|| most_derived.clone())
            };
            if let Some(unknown) = unknown {
                self.decoder11_mut()?.pop();
                self.exception_patches.clear();
                return Ok(DecodedException::Unknown(UnknownUserException::from_type_id(
                    &unknown,
                )));
            }
            self.start_slice()?;
        }
    }
}

fn read_slice_size(buf: &mut Buffer) -> Result<i32> {
    let size: i32 = buf.read_scalar()?;
    if size < MIN_SLICE_SIZE {
        return Err(Error::marshal(format!("invalid slice size {}", size)));
    }
    Ok(size)
}
