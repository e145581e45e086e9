// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Class and exception encoders.
//!
//! # 1.0 layout
//!
//! ```text
//! reference   : i32 (-id, 0 = null)
//! pending     : Size count, { i32 id, slices... }*, ..., Size 0
//! value slice : bool is_index, (Size index | string type id), i32 size, members
//! ```
//!
//! # 1.1 layout
//!
//! ```text
//! reference : Size (0 = null, 1 = inline instance follows, n = earlier id n)
//! slice     : u8 flags, [type id], [i32 size], members, [0xFF], [indirection table]
//! ```

use std::collections::HashMap;

use super::OutputStream;
use crate::buffer::Buffer;
use crate::config::{
    FLAG_HAS_INDIRECTION_TABLE, FLAG_HAS_OPTIONAL_MEMBERS, FLAG_HAS_SLICE_SIZE,
    FLAG_HAS_TYPE_ID_COMPACT, FLAG_HAS_TYPE_ID_INDEX, FLAG_HAS_TYPE_ID_STRING, FLAG_IS_LAST_SLICE,
    OPTIONAL_END_MARKER, ROOT_TYPE_ID,
};
use crate::encoding::{EncodingVersion, FormatType, SliceType};
use crate::error::{Error, Result};
use crate::exception::UserException;
use crate::value::{SlicedData, Value, ValueEntry, ValueHandle};

#[derive(Debug, Default)]
struct EncoderCommon {
    marshaled: HashMap<ValueHandle, i32>,
    type_ids: HashMap<String, i32>,
    next_type_index: i32,
    next_id: i32,
}

impl EncoderCommon {
    /// Index of a type id written earlier; unseen ids are registered and `None` returned.
    fn register_type_id(&mut self, type_id: &str) -> Option<i32> {
        if let Some(index) = self.type_ids.get(type_id) {
            return Some(*index);
        }
        self.next_type_index += 1;
        self.type_ids
            .insert(type_id.to_string(), self.next_type_index);
        None
    }
}

#[derive(Debug, Default)]
pub(super) struct Encoder10 {
    common: EncoderCommon,
    /// Instances referenced but not yet written, in id order.
    to_be_marshaled: Vec<(ValueHandle, i32)>,
    queued: HashMap<ValueHandle, i32>,
    slice_type: SliceType,
    /// Offset just past the current slice's size field.
    slice_start: usize,
    slice_open: bool,
}

impl Encoder10 {
    /// Object id for `handle`, queueing it for the next pending batch.
    fn register_value(&mut self, handle: ValueHandle) -> i32 {
        if let Some(id) = self.queued.get(&handle) {
            return *id;
        }
        if let Some(id) = self.common.marshaled.get(&handle) {
            return *id;
        }
        self.common.next_id += 1;
        let id = self.common.next_id;
        self.queued.insert(handle, id);
        self.to_be_marshaled.push((handle, id));
        id
    }
}

#[derive(Debug, Default)]
struct InstanceFrame {
    slice_type: SliceType,
    first_slice: bool,
    slice_flags: u8,
    slice_flags_pos: usize,
    /// Offset just past the current slice's size field.
    slice_start: usize,
    indirection_table: Vec<ValueHandle>,
    indirection_map: HashMap<ValueHandle, usize>,
}

impl InstanceFrame {
    /// 1-based indirection index of `handle` in the current slice.
    fn indirect_index(&mut self, handle: ValueHandle) -> usize {
        if let Some(index) = self.indirection_map.get(&handle) {
            return *index;
        }
        self.indirection_table.push(handle);
        let index = self.indirection_table.len();
        self.indirection_map.insert(handle, index);
        index
    }
}

#[derive(Debug)]
pub(super) struct Encoder11 {
    common: EncoderCommon,
    /// Reused across instances; `frames[..depth]` are live.
    frames: Vec<InstanceFrame>,
    depth: usize,
}

impl Encoder11 {
    fn new() -> Self {
        Self {
            common: EncoderCommon {
                next_id: 1,
                ..EncoderCommon::default()
            },
            frames: Vec::new(),
            depth: 0,
        }
    }

    fn current_mut(&mut self) -> Option<&mut InstanceFrame> {
        self.depth.checked_sub(1).map(|i| &mut self.frames[i])
    }

    fn current_with_common(&mut self) -> Option<(&mut InstanceFrame, &mut EncoderCommon)> {
        let i = self.depth.checked_sub(1)?;
        Some((&mut self.frames[i], &mut self.common))
    }

    fn push(&mut self, slice_type: SliceType) {
        if self.frames.len() == self.depth {
            self.frames.push(InstanceFrame::default());
        }
        let frame = &mut self.frames[self.depth];
        frame.slice_type = slice_type;
        frame.first_slice = true;
        frame.slice_flags = 0;
        frame.indirection_table.clear();
        frame.indirection_map.clear();
        self.depth += 1;
    }

    fn pop(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}

/// Encoder of one encapsulation, chosen by its encoding.
#[derive(Debug)]
pub(super) enum Encoder {
    V10(Encoder10),
    V11(Encoder11),
}

impl Encoder {
    fn new(encoding: EncodingVersion) -> Self {
        if encoding.is_1_0() {
            Encoder::V10(Encoder10::default())
        } else {
            Encoder::V11(Encoder11::new())
        }
    }

    /// Record that the current 1.1 slice carries tagged members.
    pub(super) fn mark_optional_member(&mut self) {
        if let Encoder::V11(enc) = self {
            if let Some(frame) = enc.current_mut() {
                frame.slice_flags |= FLAG_HAS_OPTIONAL_MEMBERS;
            }
        }
    }
}

fn outside_instance() -> Error {
    Error::marshal("slice written outside of an instance")
}

/// Wire slice size: the member bytes plus the size field itself.
fn slice_size(members: usize) -> Result<i32> {
    members
        .checked_add(4)
        .and_then(|size| i32::try_from(size).ok())
        .ok_or_else(|| Error::marshal(format!("slice of {} bytes exceeds the wire limit", members)))
}

impl<'g> OutputStream<'g> {
    /// Encoder of the current encapsulation, the buffer, and the class format.
    fn split(&mut self) -> (&mut Encoder, &mut Buffer, FormatType) {
        let frame = self.encaps.current_mut();
        let encoding = frame.encoding;
        let format = frame.format;
        let encoder = frame.encoder.get_or_insert_with(|| Encoder::new(encoding));
        (encoder, &mut self.buf, format)
    }

    fn encoder11_mut(&mut self) -> Result<&mut Encoder11> {
        match self.split().0 {
            Encoder::V11(enc) => Ok(enc),
            Encoder::V10(_) => Err(Error::marshal("operation requires the 1.1 encoding")),
        }
    }

    fn encoder10_mut(&mut self) -> Result<&mut Encoder10> {
        match self.split().0 {
            Encoder::V10(enc) => Ok(enc),
            Encoder::V11(_) => Err(Error::marshal("operation requires the 1.0 encoding")),
        }
    }

    fn value_entry(&self, handle: ValueHandle) -> Result<&'g ValueEntry> {
        let graph = self
            .graph
            .ok_or_else(|| Error::marshal("no value graph attached to the output stream"))?;
        graph
            .entry(handle)
            .ok_or_else(|| Error::marshal(format!("no instance at {}", handle)))
    }

    fn pre_marshal(&self, value: &dyn Value) {
        if let Err(e) = value.ice_pre_marshal() {
            self.logger
                .warning(&format!("exception raised by ice_pre_marshal:\n{}", e));
        }
    }

    // ========================================================================
    // Instances
    // ========================================================================

    /// Write a class reference (or null).
    ///
    /// 1.0 writes the negated object id and queues the instance for
    /// [`write_pending_values`](Self::write_pending_values). 1.1 writes the
    /// instance inline on first sight, or an indirection index when called from
    /// inside a sliced-format slice.
    pub fn write_value(&mut self, value: Option<ValueHandle>) -> Result<()> {
        let (encoder, buf, format) = self.split();
        let handle = match (encoder, value) {
            (Encoder::V10(enc), value) => {
                let id = value.map_or(0, |h| -enc.register_value(h));
                buf.write_scalar(id);
                return Ok(());
            }
            (Encoder::V11(_), None) => return buf.write_size(0),
            (Encoder::V11(enc), Some(h)) => match enc.current_mut() {
                Some(frame) if format == FormatType::Sliced => {
                    let index = frame.indirect_index(h);
                    return buf.write_size(index);
                }
                _ => h,
            },
        };
        self.write_instance(handle)
    }

    /// 1.1 inline instance: marker 1 plus body, or the id of an earlier instance.
    fn write_instance(&mut self, handle: ValueHandle) -> Result<()> {
        let existing = self.encoder11_mut()?.common.marshaled.get(&handle).copied();
        if let Some(id) = existing {
            return self.buf.write_size(id as usize);
        }
        let enc = self.encoder11_mut()?;
        enc.common.next_id += 1;
        let id = enc.common.next_id;
        enc.common.marshaled.insert(handle, id);

        let entry = self.value_entry(handle)?;
        self.pre_marshal(entry.value.as_ref());
        self.buf.write_size(1)?;
        self.write_body(entry)
    }

    fn write_body(&mut self, entry: &'g ValueEntry) -> Result<()> {
        self.start_instance(SliceType::Value, entry.sliced.as_ref())?;
        entry.value.write_impl(self)?;
        self.end_instance()
    }

    /// Drain instances queued by 1.0 references, batch by batch, then `Size 0`.
    ///
    /// No-op under 1.1, where instances are written inline.
    pub fn write_pending_values(&mut self) -> Result<()> {
        let frame = self.encaps.current();
        match &frame.encoder {
            Some(Encoder::V10(_)) => {}
            None if frame.encoding.is_1_0() => return self.buf.write_size(0),
            _ => return Ok(()),
        }
        loop {
            let batch = {
                let enc = self.encoder10_mut()?;
                if enc.to_be_marshaled.is_empty() {
                    break;
                }
                enc.queued.clear();
                let batch = std::mem::take(&mut enc.to_be_marshaled);
                for (handle, id) in &batch {
                    enc.common.marshaled.insert(*handle, *id);
                }
                batch
            };
            self.buf.write_size(batch.len())?;
            for (handle, id) in batch {
                self.buf.write_scalar(id);
                let entry = self.value_entry(handle)?;
                self.pre_marshal(entry.value.as_ref());
                self.write_body(entry)?;
            }
        }
        self.buf.write_size(0)
    }

    fn start_instance(&mut self, slice_type: SliceType, sliced: Option<&SlicedData>) -> Result<()> {
        let inline = match self.split().0 {
            Encoder::V10(enc) => {
                enc.slice_type = slice_type;
                false
            }
            Encoder::V11(enc) => {
                enc.push(slice_type);
                true
            }
        };
        match sliced {
            Some(data) if inline => self.write_sliced_data(data),
            _ => Ok(()),
        }
    }

    fn end_instance(&mut self) -> Result<()> {
        let write_root = match self.split().0 {
            Encoder::V10(enc) => {
                let root = enc.slice_type == SliceType::Value;
                if !root {
                    enc.slice_type = SliceType::None;
                }
                root
            }
            Encoder::V11(enc) => {
                enc.pop();
                false
            }
        };
        if write_root {
            // 1.0 terminates every value with an empty root slice.
            self.start_slice(ROOT_TYPE_ID, None, true)?;
            self.buf.write_size(0)?;
            self.end_slice()?;
            self.encoder10_mut()?.slice_type = SliceType::None;
        }
        Ok(())
    }

    /// Re-emit slices preserved when the instance was decoded.
    ///
    /// Only the sliced format can carry them; the compact format drops them.
    fn write_sliced_data(&mut self, data: &SlicedData) -> Result<()> {
        if self.encaps.current().format != FormatType::Sliced {
            return Ok(());
        }
        for info in &data.slices {
            self.start_slice(&info.type_id, info.compact_id, info.is_last_slice)?;
            self.buf.write(&info.bytes);
            let frame = self
                .encoder11_mut()?
                .current_mut()
                .ok_or_else(outside_instance)?;
            if info.has_optional_members {
                frame.slice_flags |= FLAG_HAS_OPTIONAL_MEMBERS;
            }
            for value in &info.values {
                let handle = value.ok_or_else(|| {
                    Error::marshal("preserved slice references an unresolved instance")
                })?;
                frame.indirection_table.push(handle);
            }
            self.end_slice()?;
        }
        Ok(())
    }

    // ========================================================================
    // Slices
    // ========================================================================

    /// Open the next slice of the current instance or exception.
    ///
    /// `compact_id` replaces the type id string for value slices when set.
    pub fn start_slice(&mut self, type_id: &str, compact_id: Option<i32>, last: bool) -> Result<()> {
        let (encoder, buf, format) = self.split();
        match encoder {
            Encoder::V10(enc) => {
                match enc.slice_type {
                    SliceType::Value => match enc.common.register_type_id(type_id) {
                        Some(index) => {
                            buf.write_scalar(true);
                            buf.write_size(index as usize)?;
                        }
                        None => {
                            buf.write_scalar(false);
                            buf.write_sized_bytes(type_id.as_bytes())?;
                        }
                    },
                    SliceType::Exception => buf.write_sized_bytes(type_id.as_bytes())?,
                    SliceType::None => return Err(outside_instance()),
                }
                buf.write_scalar(0i32);
                enc.slice_start = buf.len();
                enc.slice_open = true;
            }
            Encoder::V11(enc) => {
                let (frame, common) = enc.current_with_common().ok_or_else(outside_instance)?;
                let sliced = format == FormatType::Sliced;
                let mut flags = 0u8;
                if sliced {
                    flags |= FLAG_HAS_SLICE_SIZE;
                }
                if last {
                    flags |= FLAG_IS_LAST_SLICE;
                }
                frame.slice_flags_pos = buf.len();
                buf.write_scalar(0u8);

                match frame.slice_type {
                    SliceType::Value if sliced || frame.first_slice => match compact_id {
                        Some(compact) if compact >= 0 => {
                            flags |= FLAG_HAS_TYPE_ID_COMPACT;
                            buf.write_size(compact as usize)?;
                        }
                        _ => match common.register_type_id(type_id) {
                            Some(index) => {
                                flags |= FLAG_HAS_TYPE_ID_INDEX;
                                buf.write_size(index as usize)?;
                            }
                            None => {
                                flags |= FLAG_HAS_TYPE_ID_STRING;
                                buf.write_sized_bytes(type_id.as_bytes())?;
                            }
                        },
                    },
                    SliceType::Value => {}
                    SliceType::Exception => buf.write_sized_bytes(type_id.as_bytes())?,
                    SliceType::None => return Err(outside_instance()),
                }

                if sliced {
                    buf.write_scalar(0i32);
                }
                frame.slice_flags = flags;
                frame.slice_start = buf.len();
                frame.first_slice = false;
            }
        }
        Ok(())
    }

    /// Close the current slice: patch its size, flush the indirection table,
    /// and patch the flags byte.
    pub fn end_slice(&mut self) -> Result<()> {
        let (encoder, buf, _) = self.split();
        let table = match encoder {
            Encoder::V10(enc) => {
                if !enc.slice_open {
                    return Err(outside_instance());
                }
                enc.slice_open = false;
                let size = slice_size(buf.len() - enc.slice_start)?;
                return buf.write_scalar_at(enc.slice_start - 4, size);
            }
            Encoder::V11(enc) => {
                let frame = enc.current_mut().ok_or_else(outside_instance)?;
                if frame.slice_flags & FLAG_HAS_OPTIONAL_MEMBERS != 0 {
                    buf.write_scalar(OPTIONAL_END_MARKER);
                }
                if frame.slice_flags & FLAG_HAS_SLICE_SIZE != 0 {
                    let size = slice_size(buf.len() - frame.slice_start)?;
                    buf.write_scalar_at(frame.slice_start - 4, size)?;
                }
                if frame.indirection_table.is_empty() {
                    Vec::new()
                } else {
                    frame.slice_flags |= FLAG_HAS_INDIRECTION_TABLE;
                    frame.indirection_map.clear();
                    std::mem::take(&mut frame.indirection_table)
                }
            }
        };

        if !table.is_empty() {
            self.buf.write_size(table.len())?;
            for handle in table {
                self.write_instance(handle)?;
            }
        }

        let (encoder, buf, _) = self.split();
        if let Encoder::V11(enc) = encoder {
            let frame = enc.current_mut().ok_or_else(outside_instance)?;
            buf.write_scalar_at(frame.slice_flags_pos, frame.slice_flags)?;
        }
        Ok(())
    }

    // ========================================================================
    // Exceptions
    // ========================================================================

    /// Marshal a user exception, most-derived slice first.
    ///
    /// Under 1.0 a leading bool announces class members, which are then
    /// drained as pending values after the slices.
    pub fn write_exception(&mut self, ex: &dyn UserException) -> Result<()> {
        let uses_classes = match self.split().0 {
            Encoder::V10(_) => Some(ex.uses_classes()),
            Encoder::V11(_) => None,
        };
        if let Some(flag) = uses_classes {
            self.buf.write_scalar(flag);
        }
        self.start_instance(SliceType::Exception, None)?;
        ex.write_impl(self)?;
        self.end_instance()?;
        if uses_classes == Some(true) {
            self.write_pending_values()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{ENCODING_1_0, ENCODING_1_1};
    use crate::input::InputStream;

    /// Exception whose writer closes its only slice twice.
    #[derive(Debug, Default)]
    struct DoubleEnd;

    impl UserException for DoubleEnd {
        fn ice_id(&self) -> &str {
            "::Demo::DoubleEnd"
        }

        fn write_impl(&self, out: &mut OutputStream<'_>) -> Result<()> {
            out.start_slice("::Demo::DoubleEnd", None, true)?;
            out.write_int(1);
            out.end_slice()?;
            out.end_slice()
        }

        fn read_impl(&mut self, _input: &mut InputStream<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_end_slice_without_open_slice() {
        for encoding in [ENCODING_1_0, ENCODING_1_1] {
            let mut out = OutputStream::new();
            out.start_write_encaps(encoding, FormatType::Default).expect("start");
            match out.end_slice() {
                Err(Error::Marshal(_)) => {}
                other => panic!("{}: unexpected result {:?}", encoding, other),
            }
        }
    }

    #[test]
    fn test_1_0_slice_closed_twice_is_rejected() {
        let mut out = OutputStream::new();
        out.start_write_encaps(ENCODING_1_0, FormatType::Default).expect("start");
        match out.write_exception(&DoubleEnd) {
            Err(Error::Marshal(_)) => {}
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_1_0_slice_size_counts_itself() {
        let mut out = OutputStream::new();
        out.start_write_encaps(ENCODING_1_0, FormatType::Default).expect("start");
        if let (Encoder::V10(enc), _, _) = out.split() {
            enc.slice_type = SliceType::Exception;
        }
        out.start_slice("::A", None, true).expect("start slice");
        out.write_int(7);
        out.end_slice().expect("end slice");
        // header(6) + string(1 + 3) + size(4) + int(4)
        let bytes = out.as_bytes();
        assert_eq!(bytes.len(), 6 + 4 + 4 + 4);
        assert_eq!(&bytes[10..14], &8i32.to_le_bytes());
        assert!(slice_size(i32::MAX as usize).is_err());
    }
}
