//! Shared classification of transport failures.

use crate::transport::{Code, Status};

/// What a worker should do after a failed send or receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Stop permanently: the resource is gone, access was revoked, or the
    /// stream was deliberately ended.
    Terminal,
    /// The channel is unhealthy: reconnect, then continue.
    Retriable,
    /// Retry on the same handle after a short pause.
    Transient,
}

pub fn classify(status: &Status) -> ErrorClass {
    match status.code() {
        Code::NotFound | Code::PermissionDenied | Code::Canceled => ErrorClass::Terminal,
        Code::Unavailable => ErrorClass::Retriable,
        _ => ErrorClass::Transient,
    }
}
