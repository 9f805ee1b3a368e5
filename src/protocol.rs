// src/protocol.rs
//! Reserved control tokens shared by the pipe layer and the wire service
//!
//! These values travel inside regular payload frames but are reinterpreted
//! as control signals by the receiving side. User payloads equal to them
//! are rejected at the API boundary.

/// Payload that announces an orderly pipe close. Always transmitted before
/// a pipe endpoint closes its local handle, so a peer blocked in a read
/// observes the close instead of hanging.
pub const CLOSING_FLAG: &[u8] = b"CLOSE_CONN_";

/// Payload used by the server shutdown path to unblock the accept loop.
/// A connection carrying it is closed without being dispatched.
pub const WAKEUP_FLAG: &[u8] = b"NEXT";

/// Node name reserved for the controller in the pipe graph. Workers may
/// not register under it (in any case variation).
pub const CONTROLLER_NODE: &str = "manager";

/// Width of the wire length header: 8 zero-padded decimal ASCII digits.
pub const FRAME_HEADER_LEN: usize = 8;

/// Largest payload expressible in the length header.
pub const MAX_FRAME_PAYLOAD: usize = 99_999_999;

/// First response frame of a successful evaluation.
pub const EXEC_OK: &[u8] = b"exec_ok:1";

/// First response frame of a failed evaluation.
pub const EXEC_FAIL: &[u8] = b"exec_ok:0";

/// Prefix of the second response frame, carrying the payload type name.
pub const DATA_TYPE_PREFIX: &str = "data_type:";

/// Check whether a worker name collides with the controller identity.
pub fn is_reserved_name(name: &str) -> bool {
    name.eq_ignore_ascii_case(CONTROLLER_NODE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_name_is_case_insensitive() {
        assert!(is_reserved_name("manager"));
        assert!(is_reserved_name("MANAGER"));
        assert!(is_reserved_name("Manager"));
        assert!(!is_reserved_name("manager2"));
    }

    #[test]
    fn test_control_tokens_are_distinct() {
        assert_ne!(CLOSING_FLAG, WAKEUP_FLAG);
    }
}
