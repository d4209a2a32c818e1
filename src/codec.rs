//! Dashboard protocol framing.
//!
//! The controller protocol is line based on the way out and unframed on the
//! way back: a command is its text followed by `\n`, and a reply is whatever
//! one read delivers, trimmed.

use bytes::{BufMut, Bytes, BytesMut};

use crate::types::COMMAND_TERMINATOR;

/// Frame a command for the wire.
///
/// The text is passed through untouched; only the terminator is appended.
pub fn encode_command(command: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(command.len() + 1);
    buf.put_slice(command.as_bytes());
    buf.put_u8(COMMAND_TERMINATOR);
    buf.freeze()
}

/// Decode one read from the socket into reply text.
///
/// Invalid UTF-8 is replaced rather than rejected, then surrounding
/// whitespace is trimmed.
pub fn decode_reply(data: &[u8]) -> String {
    String::from_utf8_lossy(data).trim().to_owned()
}

/// Extract the contents of the first `{...}` section of a reply.
///
/// The manager never calls this; it is offered to callers interpreting
/// replies such as `0,{1.0,2.0,3.0,4.0},GetPose();`.
pub fn extract_payload(reply: &str) -> Option<&str> {
    let start = reply.find('{')? + 1;
    let len = reply[start..].find('}')?;
    if len == 0 {
        return None;
    }
    Some(&reply[start..start + len])
}

/// Split a `{...}` payload into its trimmed comma-separated values.
pub fn payload_values(reply: &str) -> Vec<&str> {
    extract_payload(reply)
        .map(|p| p.split(',').map(str::trim).collect())
        .unwrap_or_default()
}
