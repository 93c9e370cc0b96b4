//! DNS-over-TCP framing: the 2-byte big-endian length prefix from
//! RFC 1035 §4.2.2.

/// Maximum payload length representable by the 16-bit length prefix.
pub const MAX_MESSAGE_LEN: usize = u16::MAX as usize;

#[derive(Debug, thiserror::Error)]
#[error("payload of {0} bytes exceeds the 65535-byte TCP frame maximum")]
pub struct TooLarge(pub usize);

/// Writes `htons(payload.len()) || payload` into `out`, returning the
/// number of bytes written.
pub fn frame_for_tcp(payload: &[u8], out: &mut [u8]) -> Result<usize, TooLarge> {
    if payload.len() > MAX_MESSAGE_LEN {
        return Err(TooLarge(payload.len()));
    }
    let total = 2 + payload.len();
    if out.len() < total {
        // Caller is expected to size `out` correctly; this is a programmer
        // error, not a runtime condition callers need to recover from.
        panic!("output buffer too small for framed message");
    }
    out[0..2].copy_from_slice(&(payload.len() as u16).to_be_bytes());
    out[2..total].copy_from_slice(payload);
    Ok(total)
}

/// True iff `buffer[..buffer_len]` holds a complete framed message: the
/// 2-byte prefix plus exactly that many further bytes.
pub fn tcp_message_complete(buffer: &[u8], buffer_len: usize) -> bool {
    if buffer_len < 2 {
        return false;
    }
    let declared = u16::from_be_bytes([buffer[0], buffer[1]]) as usize;
    buffer_len - 2 == declared
}

/// Strips the 2-byte prefix, returning the message payload.
///
/// Panics if the buffer does not hold a complete message; callers must
/// check [`tcp_message_complete`] first.
pub fn strip_prefix(buffer: &[u8], buffer_len: usize) -> &[u8] {
    assert!(tcp_message_complete(buffer, buffer_len));
    &buffer[2..buffer_len]
}
