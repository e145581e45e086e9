// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for the marshal/unmarshal engine.
//!
//! Every protocol violation surfaces as an [`Error`] returned to the caller.
//! The one exception is a failure raised by a user hook (`ice_pre_marshal`,
//! `ice_post_unmarshal`): those are reported as [`HookError`], routed to the
//! [`Logger`](crate::logger::Logger) and never abort the stream.

use std::fmt;

use crate::encoding::EncodingVersion;

/// Engine error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Buffer underrun, or a declared size larger than the bytes left.
    OutOfBounds {
        offset: usize,
        needed: usize,
        available: usize,
    },
    /// Mismatched start/end encapsulation calls or a malformed encapsulation.
    Encapsulation(String),
    /// Structural violation of the object or tag protocol.
    Marshal(String),
    /// No factory resolved a type id and the data could not be sliced.
    NoValueFactory { reason: String, type_id: String },
    /// Text transcoding failure.
    StringConversion(String),
    /// Encoding version this engine cannot produce or consume.
    UnsupportedEncoding(EncodingVersion),
    /// A factory is already registered for this id.
    AlreadyRegistered { kind: &'static str, id: String },
    /// No factory is registered for this id.
    NotRegistered { kind: &'static str, id: String },
}

impl Error {
    pub(crate) fn out_of_bounds(offset: usize, needed: usize, available: usize) -> Self {
        Error::OutOfBounds {
            offset,
            needed,
            available,
        }
    }

    pub(crate) fn marshal(reason: impl Into<String>) -> Self {
        Error::Marshal(reason.into())
    }

    pub(crate) fn encapsulation(reason: impl Into<String>) -> Self {
        Error::Encapsulation(reason.into())
    }

    pub(crate) fn no_factory(reason: impl Into<String>, type_id: impl Into<String>) -> Self {
        Error::NoValueFactory {
            reason: reason.into(),
            type_id: type_id.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfBounds {
                offset,
                needed,
                available,
            } => write!(
                f,
                "out of bounds at offset {}: needed {} bytes, {} available",
                offset, needed, available
            ),
            Error::Encapsulation(reason) => write!(f, "encapsulation error: {}", reason),
            Error::Marshal(reason) => write!(f, "marshal error: {}", reason),
            Error::NoValueFactory { reason, type_id } => {
                if reason.is_empty() {
                    write!(f, "no value factory for type `{}`", type_id)
                } else {
                    write!(f, "no value factory for type `{}`: {}", type_id, reason)
                }
            }
            Error::StringConversion(reason) => write!(f, "string conversion failed: {}", reason),
            Error::UnsupportedEncoding(version) => {
                write!(f, "unsupported encoding version {}", version)
            }
            Error::AlreadyRegistered { kind, id } => {
                write!(f, "{} factory already registered for `{}`", kind, id)
            }
            Error::NotRegistered { kind, id } => {
                write!(f, "no {} factory registered for `{}`", kind, id)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;

/// Failure raised by a user-supplied life-cycle hook.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of a life-cycle hook.
pub type HookResult = core::result::Result<(), HookError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_variants() {
        let err = Error::out_of_bounds(12, 4, 1);
        assert_eq!(
            err.to_string(),
            "out of bounds at offset 12: needed 4 bytes, 1 available"
        );

        let err = Error::marshal("invalid object id");
        assert_eq!(err.to_string(), "marshal error: invalid object id");

        let err = Error::no_factory("", "::Demo::Missing");
        assert_eq!(err.to_string(), "no value factory for type `::Demo::Missing`");

        let err = Error::no_factory("slicing is disabled", "::Demo::Missing");
        assert_eq!(
            err.to_string(),
            "no value factory for type `::Demo::Missing`: slicing is disabled"
        );

        let err = Error::UnsupportedEncoding(EncodingVersion::new(2, 0));
        assert_eq!(err.to_string(), "unsupported encoding version 2.0");
    }

    #[test]
    fn test_hook_error_from_string() {
        let hook: HookError = "hook failed".into();
        assert_eq!(hook.to_string(), "hook failed");
    }
}
