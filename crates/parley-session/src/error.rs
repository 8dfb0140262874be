use crate::event::EndReason;
use parley_types::PortError;
use thiserror::Error;

/// Errors that can end a call's handling early.
///
/// Only the bootstrap variants ever leave the controller; the remaining
/// variants describe contained failures and are logged where they occur.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no tenant owns room {room}")]
    UnresolvedTenant { room: String },

    #[error("room {room} ended before the call started ({reason:?})")]
    EndedDuringBootstrap { room: String, reason: EndReason },

    #[error("lookup failed: {0}")]
    Lookup(#[source] PortError),

    #[error("vendor call failed: {0}")]
    Vendor(#[source] PortError),

    #[error("settlement step {step} failed: {source}")]
    Settlement {
        step: &'static str,
        #[source]
        source: PortError,
    },
}
