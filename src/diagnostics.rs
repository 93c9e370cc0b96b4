//! Best-effort decoding of the QNAME/QTYPE/RCODE fields of a DNS message,
//! for logging only. Never panics and never reads out of bounds, regardless
//! of how malformed or truncated `payload` is.

/// Decodes the QNAME starting at `offset` into a printable string with
/// labels joined by `.`. Returns the name and the number of wire bytes
/// consumed (including the terminating root label, if reached).
///
/// Label kinds (top two bits of the length octet):
/// - `00`: uncompressed label, `llen` literal bytes follow.
/// - `11`: compressed pointer. Emits a single `_` placeholder and stops;
///   pointer targets are never followed.
/// - `01`: EDNS0 binary label. Decodes `ceil(bitcount / 8)` bytes, with
///   `bitcount == 0` meaning 256 bits, then continues to the next label.
pub fn decode_name(payload: &[u8], offset: usize, max_out: usize) -> (String, usize) {
    let mut out = Vec::with_capacity(max_out.min(64));
    let mut pos = offset;

    loop {
        if out.len() >= max_out {
            break;
        }
        let Some(&llen_byte) = payload.get(pos) else {
            break;
        };
        let tag = llen_byte & 0xc0;

        if llen_byte == 0 {
            pos += 1;
            break;
        }

        if tag == 0x00 {
            let llen = llen_byte as usize;
            let start = pos + 1;
            let end = start.saturating_add(llen).min(payload.len());
            if start > payload.len() {
                break;
            }
            out.extend_from_slice(&payload[start..end]);
            pos = start + llen;
            if end < start + llen {
                // Label ran off the end of the buffer; nothing more to read.
                break;
            }
            out.push(b'.');
        } else if tag == 0xc0 {
            out.push(b'_');
            pos += 2;
            break;
        } else if tag == 0x40 {
            let Some(&bitcount_byte) = payload.get(pos + 1) else {
                break;
            };
            let bitcount = if bitcount_byte == 0 {
                256usize
            } else {
                bitcount_byte as usize
            };
            let nbytes = (bitcount + 7) / 8;
            let start = pos + 2;
            let end = start.saturating_add(nbytes).min(payload.len());
            if start > payload.len() {
                break;
            }
            out.extend_from_slice(&payload[start..end]);
            pos = end;
            out.push(b'.');
            if end < start + nbytes {
                break;
            }
        } else {
            // Reserved tag (0x80): nothing sensible to decode further.
            pos += 1;
            break;
        }
    }

    if out.last() == Some(&b'.') {
        out.pop();
    }

    (String::from_utf8_lossy(&out).into_owned(), pos - offset)
}

/// Maps a QTYPE code to a short human-readable string; unknown codes map
/// to a placeholder.
pub fn qtype_name(qtype: u16) -> &'static str {
    match qtype {
        1 => "A",
        2 => "NS",
        5 => "CNAME",
        6 => "SOA",
        12 => "PTR",
        15 => "MX",
        28 => "AAAA",
        255 => "ANY",
        _ => "(tbd)",
    }
}

/// Maps an RCODE (the low 4 bits of the flags octet) to a short
/// human-readable string; unknown codes map to a placeholder.
pub fn rcode_name(rcode: u8) -> &'static str {
    match rcode {
        0 => "NOERROR",
        1 => "FORMERR",
        2 => "SERVFAIL",
        3 => "NXDOMAIN",
        4 => "NOTIMP",
        5 => "REFUSED",
        _ => "",
    }
}
