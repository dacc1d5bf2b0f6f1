//! Error taxonomy shared by the schema, codec, registry and runtime.
//!
//! Every failure in the crate is a [`WireError`].  What the caller should do
//! about one depends on where it came from:
//!
//! - **Recoverable** errors are raised locally before anything reaches the
//!   wire (a request the bound version does not support, a value of the
//!   wrong shape, a schema built out of order).  The connection stays healthy.
//! - **Fatal** errors mean the byte stream is desynchronised or the peer broke
//!   the contract.  The connection must be closed.
//! - **Policy-dependent** errors (an unknown opcode, a message nobody handles)
//!   are skipped or fatal depending on [`Strictness`].

use std::io;

use thiserror::Error;

use crate::connection::Strictness;

/// Errors produced while building schemas or moving messages.
#[derive(Debug, Error)]
pub enum WireError {
    /// A value does not fit the declared argument type, or the argument
    /// count does not match the signature.
    #[error("argument mismatch in {message}: {reason}")]
    ArgumentMismatch { message: String, reason: String },

    /// Fewer bytes remain than the declared arguments require.
    #[error("truncated message: need {needed} bytes, got {available}")]
    TruncatedMessage { needed: usize, available: usize },

    /// A file-descriptor argument found the side-channel queue empty.
    #[error("missing file descriptor for argument {index} of {message}")]
    MissingDescriptor { message: String, index: usize },

    /// The opcode has no signature in the target object's interface.
    #[error("unknown opcode {opcode} for interface {interface}")]
    UnknownOpcode { interface: String, opcode: u16 },

    /// No live object has this id.
    #[error("unknown object id {0}")]
    UnknownObject(u32),

    /// The id is already bound to a live (or not yet released) object.
    #[error("object id {0} is already in use")]
    DuplicateId(u32),

    /// A zero id or null value was received for a non-nullable argument.
    #[error("null value for non-nullable argument {index} of {message}")]
    NullNotAllowed { message: String, index: usize },

    /// The message needs a newer version than the object was bound at.
    #[error("{interface}.{message} requires version {required}, object has version {available}")]
    VersionMismatch {
        interface: String,
        message: String,
        required: u32,
        available: u32,
    },

    /// A decoded message has no handler registered for it.
    #[error("no handler registered for {interface}.{message} (opcode {opcode})")]
    UnhandledRequest {
        interface: String,
        message: String,
        opcode: u16,
    },

    /// A signature was registered at an opcode other than the next one.
    #[error("opcode conflict in {interface}: expected opcode {expected}, got {got}")]
    OpcodeConflict {
        interface: String,
        expected: u16,
        got: u16,
    },

    /// The schema itself is inconsistent.
    #[error("invalid schema for {interface}: {reason}")]
    InvalidSchema { interface: String, reason: String },

    /// An interface name could not be resolved through the catalog.
    #[error("unknown interface {0:?}")]
    UnknownInterface(String),

    /// An object argument points at an object of the wrong interface.
    #[error("object {id} is a {found}, expected {expected}")]
    WrongInterface {
        id: u32,
        expected: String,
        found: String,
    },

    /// A new id lies outside the id range of the side that allocated it.
    #[error("object id {id:#x} is outside the {side} id range")]
    IdOutOfRange { id: u32, side: &'static str },

    /// Every id of a range is in use.
    #[error("no free ids left in the {0} id range")]
    IdSpaceExhausted(&'static str),

    /// The bytes cannot be a valid message (bad header, bad string, trailing data).
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The encoded message does not fit the 16-bit size field.
    #[error("message of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge { size: usize, max: usize },

    /// The peer sent a message its object's version does not include.
    #[error("peer sent {interface}.{message} (since {since}) to a version {version} object")]
    MessageNotInVersion {
        interface: String,
        message: String,
        since: u32,
        version: u32,
    },

    /// The peer reported a protocol error and is closing the connection.
    #[error("peer error on object {object_id}, code {code}: {message}")]
    PeerError {
        object_id: u32,
        code: u32,
        message: String,
    },

    /// The connection was closed, by either side.
    #[error("connection closed")]
    ConnectionClosed,

    /// The transport failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
}

/// How a [`WireError`] affects the connection it occurred on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Reported to the caller; nothing was sent and the connection is fine.
    Recoverable,
    /// The connection must be closed.
    Fatal,
    /// Skipped or fatal depending on [`Strictness`].
    PolicyDependent,
}

impl WireError {
    /// Classifies the error.
    pub fn severity(&self) -> Severity {
        match self {
            WireError::ArgumentMismatch { .. }
            | WireError::VersionMismatch { .. }
            | WireError::OpcodeConflict { .. }
            | WireError::InvalidSchema { .. }
            | WireError::MessageTooLarge { .. }
            | WireError::IdSpaceExhausted(_) => Severity::Recoverable,

            WireError::UnknownOpcode { .. } | WireError::UnhandledRequest { .. } => {
                Severity::PolicyDependent
            }

            WireError::TruncatedMessage { .. }
            | WireError::MissingDescriptor { .. }
            | WireError::UnknownObject(_)
            | WireError::DuplicateId(_)
            | WireError::NullNotAllowed { .. }
            | WireError::UnknownInterface(_)
            | WireError::WrongInterface { .. }
            | WireError::IdOutOfRange { .. }
            | WireError::InvalidMessage(_)
            | WireError::MessageNotInVersion { .. }
            | WireError::PeerError { .. }
            | WireError::ConnectionClosed
            | WireError::Io(_) => Severity::Fatal,
        }
    }

    /// Returns `true` if the error must close the connection under `strictness`.
    pub fn is_fatal(&self, strictness: Strictness) -> bool {
        match self.severity() {
            Severity::Recoverable => false,
            Severity::Fatal => true,
            Severity::PolicyDependent => strictness == Strictness::Strict,
        }
    }

    pub(crate) fn mismatch(message: &str, reason: impl Into<String>) -> Self {
        WireError::ArgumentMismatch {
            message: message.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = WireError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_mismatch_is_recoverable() {
        let err = WireError::VersionMismatch {
            interface: "wl_requests".into(),
            message: "versioned".into(),
            required: 2,
            available: 1,
        };
        assert_eq!(err.severity(), Severity::Recoverable);
        assert!(!err.is_fatal(Strictness::Strict));
    }

    #[test]
    fn test_stream_errors_are_fatal_under_any_policy() {
        let errors = [
            WireError::TruncatedMessage {
                needed: 8,
                available: 4,
            },
            WireError::UnknownObject(7),
            WireError::DuplicateId(3),
            WireError::NullNotAllowed {
                message: "m".into(),
                index: 0,
            },
            WireError::MissingDescriptor {
                message: "m".into(),
                index: 1,
            },
        ];
        for err in &errors {
            assert!(err.is_fatal(Strictness::Lenient), "{err} must be fatal");
            assert!(err.is_fatal(Strictness::Strict), "{err} must be fatal");
        }
    }

    #[test]
    fn test_unknown_opcode_follows_strictness() {
        let err = WireError::UnknownOpcode {
            interface: "wl_core".into(),
            opcode: 9,
        };
        assert!(err.is_fatal(Strictness::Strict));
        assert!(!err.is_fatal(Strictness::Lenient));
    }

    #[test]
    fn test_io_error_converts_and_is_fatal() {
        let err: WireError = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
        assert!(matches!(err, WireError::Io(_)));
        assert_eq!(err.severity(), Severity::Fatal);
    }
}
