//! Engine error handling.
//!
//! Frame handlers never propagate failures past the frame that caused
//! them: a handler returns [`HandlerResult`], and the dispatch layer maps
//! the error onto the frame-local policy: a deduplicated operator notice
//! for protocol violations, a link teardown for identity collisions.

use thiserror::Error;

/// Failure of a single inbound frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The frame was structurally or semantically invalid. `kind` is a
    /// stable token used to deduplicate operator notices per peer.
    #[error("protocol violation ({kind}): {detail}")]
    Protocol {
        /// Stable violation class (e.g. `"euid.args"`).
        kind: &'static str,
        /// Human-readable specifics.
        detail: String,
    },

    /// The peer must be disconnected (identity collision).
    #[error("{reason}")]
    Disconnect {
        /// Reason sent on the closing `ERROR` frame.
        reason: String,
    },
}

impl HandlerError {
    /// Shorthand for a protocol violation.
    pub fn protocol(kind: &'static str, detail: impl Into<String>) -> Self {
        HandlerError::Protocol {
            kind,
            detail: detail.into(),
        }
    }
}

/// Result type for frame handlers.
pub type HandlerResult = Result<(), HandlerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_display_carries_kind() {
        let err = HandlerError::protocol("sjoin.ts", "bad timestamp");
        assert_eq!(
            err.to_string(),
            "protocol violation (sjoin.ts): bad timestamp"
        );
    }
}
