//! Directive Status Codes
//!
//! Every directive in the core reports failure through one vocabulary,
//! whether the object it targeted lives on this node or another one. The
//! numeric values are part of the wire format: a response packet carries the
//! status of the remote side in its `return_code` word, and the requesting
//! node turns it back into the same `StatusCode` the caller would have seen
//! for a local failure.
//!
//! Success is not a variant. It is `Ok(..)` in Rust and `0` on the wire.

use thiserror::Error;

/// Failure status of a directive
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StatusCode {
    #[error("returned from a thread")]
    TaskExited = 1,

    #[error("multiprocessing not configured")]
    MpNotConfigured = 2,

    #[error("invalid object name")]
    InvalidName = 3,

    #[error("invalid object id")]
    InvalidId = 4,

    #[error("too many objects")]
    TooMany = 5,

    #[error("timed out waiting")]
    Timeout = 6,

    #[error("object was deleted while waiting")]
    ObjectWasDeleted = 7,

    #[error("invalid size")]
    InvalidSize = 8,

    #[error("invalid address")]
    InvalidAddress = 9,

    #[error("invalid number")]
    InvalidNumber = 10,

    #[error("item has not been initialized")]
    NotDefined = 11,

    #[error("resources still outstanding")]
    ResourceInUse = 12,

    #[error("request not satisfied")]
    Unsatisfied = 13,

    #[error("object is in the wrong state")]
    IncorrectState = 14,

    #[error("thread already suspended")]
    AlreadySuspended = 15,

    #[error("illegal on calling thread")]
    IllegalOnSelf = 16,

    #[error("illegal on remote object")]
    IllegalOnRemoteObject = 17,

    #[error("called from interrupt context")]
    CalledFromIsr = 18,

    #[error("invalid priority")]
    InvalidPriority = 19,

    #[error("invalid node")]
    InvalidNode = 21,

    #[error("directive not configured")]
    NotConfigured = 22,

    #[error("not owner of resource")]
    NotOwnerOfResource = 23,

    #[error("directive not implemented")]
    NotImplemented = 24,

    #[error("internal inconsistency detected")]
    InternalError = 25,

    #[error("could not get enough memory")]
    NoMemory = 26,

    #[error("driver I/O error")]
    IoError = 27,
}

/// Result type used by every directive of the core
pub type Result<T> = core::result::Result<T, StatusCode>;

/// Wire value of a successful directive
pub const SUCCESSFUL: u32 = 0;

impl StatusCode {
    /// Numeric status as carried in a packet's `return_code` word
    #[inline]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Encode a directive result for the wire
    pub fn to_wire(result: Result<()>) -> u32 {
        match result {
            Ok(()) => SUCCESSFUL,
            Err(status) => status.code(),
        }
    }

    /// Decode a `return_code` word
    ///
    /// Unknown codes come from a peer running a different protocol revision;
    /// they are reported as `InternalError` rather than trusted.
    pub fn from_wire(code: u32) -> Result<()> {
        let status = match code {
            SUCCESSFUL => return Ok(()),
            1 => Self::TaskExited,
            2 => Self::MpNotConfigured,
            3 => Self::InvalidName,
            4 => Self::InvalidId,
            5 => Self::TooMany,
            6 => Self::Timeout,
            7 => Self::ObjectWasDeleted,
            8 => Self::InvalidSize,
            9 => Self::InvalidAddress,
            10 => Self::InvalidNumber,
            11 => Self::NotDefined,
            12 => Self::ResourceInUse,
            13 => Self::Unsatisfied,
            14 => Self::IncorrectState,
            15 => Self::AlreadySuspended,
            16 => Self::IllegalOnSelf,
            17 => Self::IllegalOnRemoteObject,
            18 => Self::CalledFromIsr,
            19 => Self::InvalidPriority,
            21 => Self::InvalidNode,
            22 => Self::NotConfigured,
            23 => Self::NotOwnerOfResource,
            24 => Self::NotImplemented,
            26 => Self::NoMemory,
            27 => Self::IoError,
            _ => Self::InternalError,
        };
        Err(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_success() {
        assert_eq!(StatusCode::to_wire(Ok(())), SUCCESSFUL);
        assert_eq!(StatusCode::from_wire(SUCCESSFUL), Ok(()));
    }

    #[test]
    fn test_wire_codes_are_stable() {
        assert_eq!(StatusCode::InvalidId.code(), 4);
        assert_eq!(StatusCode::TooMany.code(), 5);
        assert_eq!(StatusCode::Timeout.code(), 6);
        assert_eq!(StatusCode::ObjectWasDeleted.code(), 7);
        assert_eq!(StatusCode::NoMemory.code(), 26);
    }

    #[test]
    fn test_wire_decode_matches_encode() {
        for status in [
            StatusCode::InvalidName,
            StatusCode::Unsatisfied,
            StatusCode::IllegalOnRemoteObject,
            StatusCode::InvalidNode,
            StatusCode::InternalError,
        ] {
            assert_eq!(StatusCode::from_wire(StatusCode::to_wire(Err(status))), Err(status));
        }
    }

    #[test]
    fn test_unknown_code_is_internal_error() {
        assert_eq!(StatusCode::from_wire(20), Err(StatusCode::InternalError));
        assert_eq!(StatusCode::from_wire(0xFFFF), Err(StatusCode::InternalError));
    }
}
