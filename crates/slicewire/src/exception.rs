// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! User exceptions.
//!
//! Exceptions marshal like a single class instance without identity: one slice
//! per hierarchy level, most-derived first. When no factory knows any slice the
//! decoder returns [`DecodedException::Unknown`] instead of failing.

use std::fmt;

use crate::error::Result;
use crate::input::InputStream;
use crate::output::OutputStream;
use crate::value::AsAny;

/// A user-defined exception hierarchy member.
pub trait UserException: AsAny + fmt::Debug {
    /// Most-derived type id.
    fn ice_id(&self) -> &str;

    /// Marshal every slice, most-derived first.
    fn write_impl(&self, out: &mut OutputStream<'_>) -> Result<()>;

    /// Unmarshal every slice, most-derived first.
    fn read_impl(&mut self, input: &mut InputStream<'_>) -> Result<()>;

    /// Whether any member is a class instance (1.0 drains pending values after the slices).
    fn uses_classes(&self) -> bool {
        false
    }
}

impl dyn UserException {
    pub fn downcast_ref<T: UserException>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: UserException>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

/// An exception whose type no factory could resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownUserException {
    /// Most-derived type id without its leading `::`.
    pub unknown: String,
}

impl UnknownUserException {
    /// Build from a wire type id, stripping the leading scope qualifier.
    pub fn from_type_id(type_id: &str) -> Self {
        let unknown = match type_id.strip_prefix("::") {
            Some(rest) if !rest.is_empty() => rest,
            _ => type_id,
        };
        Self {
            unknown: unknown.to_string(),
        }
    }
}

impl fmt::Display for UnknownUserException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown user exception `{}`", self.unknown)
    }
}

impl std::error::Error for UnknownUserException {}

/// Result of decoding a user exception.
#[derive(Debug)]
pub enum DecodedException {
    /// A factory materialized the exception (possibly sliced to a base type).
    Known(Box<dyn UserException>),
    /// No slice of the exception had a factory.
    Unknown(UnknownUserException),
}

impl DecodedException {
    pub fn ice_id(&self) -> String {
        match self {
            DecodedException::Known(ex) => ex.ice_id().to_string(),
            DecodedException::Unknown(unknown) => format!("::{}", unknown.unknown),
        }
    }

    pub fn known(&self) -> Option<&dyn UserException> {
        match self {
            DecodedException::Known(ex) => Some(ex.as_ref()),
            DecodedException::Unknown(_) => None,
        }
    }

    /// Typed access to a known exception.
    pub fn downcast_ref<T: UserException>(&self) -> Option<&T> {
        self.known().and_then(|ex| ex.downcast_ref::<T>())
    }
}
