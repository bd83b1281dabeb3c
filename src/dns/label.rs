// Hostname <-> length-prefixed label sequence
//
// "testname.com" <-> \x08testname\x03com\x00

use super::{MAX_LABEL_LEN, MAX_NAME_LEN};
use crate::error::{Result, TunnelError};
use bytes::{Buf, BufMut, BytesMut};
use std::io::Cursor;

/// Encode a dotted ASCII hostname as DNS labels.
///
/// A trailing dot is treated as the terminator already being present, so
/// `"example.com."` and `"example.com"` encode identically. `""` and `"."`
/// both encode to the root name `[0]`.
pub fn encode_hostname(name: &str) -> Result<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(name.len() + 2);
    write_hostname(name, &mut buf)?;
    Ok(buf.to_vec())
}

/// Decode the labels starting at `start`.
///
/// Returns the dotted name and the offset just past the zero terminator.
pub fn decode_hostname(bytes: &[u8], start: usize) -> Result<(String, usize)> {
    let mut cursor = Cursor::new(bytes);
    cursor.set_position(start as u64);
    let name = read_hostname(&mut cursor)?;
    Ok((name, cursor.position() as usize))
}

pub(crate) fn write_hostname(name: &str, buf: &mut BytesMut) -> Result<()> {
    let start = buf.len();
    let trimmed = name.strip_suffix('.').unwrap_or(name);

    if !trimmed.is_empty() {
        for label in trimmed.split('.') {
            let bytes = label.as_bytes();
            if bytes.is_empty() {
                buf.truncate(start);
                return Err(TunnelError::Encoding(format!(
                    "empty label in hostname {:?}",
                    name
                )));
            }
            if bytes.len() > MAX_LABEL_LEN {
                buf.truncate(start);
                return Err(TunnelError::Encoding(format!(
                    "label of {} bytes exceeds {} in hostname {:?}",
                    bytes.len(),
                    MAX_LABEL_LEN,
                    name
                )));
            }
            if !label.is_ascii() {
                buf.truncate(start);
                return Err(TunnelError::Encoding(format!(
                    "non-ASCII label {:?}",
                    label
                )));
            }
            buf.put_u8(bytes.len() as u8);
            buf.put_slice(bytes);
        }
    }
    buf.put_u8(0);

    let written = buf.len() - start;
    if written > MAX_NAME_LEN {
        buf.truncate(start);
        return Err(TunnelError::Encoding(format!(
            "hostname encodes to {} bytes (max: {})",
            written, MAX_NAME_LEN
        )));
    }

    Ok(())
}

pub(crate) fn read_hostname(buf: &mut Cursor<&[u8]>) -> Result<String> {
    let start = buf.position() as usize;
    let mut labels: Vec<String> = Vec::new();

    loop {
        if !buf.has_remaining() {
            return Err(TunnelError::TruncatedMessage {
                needed: 1,
                available: 0,
            });
        }

        let len = buf.get_u8() as usize;
        if len == 0 {
            break;
        }

        if len & 0xC0 != 0 {
            return Err(TunnelError::Decoding(format!(
                "unsupported label type {:#04x} at offset {}",
                len,
                buf.position() - 1
            )));
        }

        if buf.remaining() < len {
            return Err(TunnelError::TruncatedMessage {
                needed: len,
                available: buf.remaining(),
            });
        }

        // length bytes and labels so far, this label, and the terminator
        let consumed = buf.position() as usize - start;
        if consumed + len + 1 > MAX_NAME_LEN {
            return Err(TunnelError::Decoding(format!(
                "hostname longer than {} bytes",
                MAX_NAME_LEN
            )));
        }

        let mut label = vec![0u8; len];
        buf.copy_to_slice(&mut label);

        if !label.is_ascii() || label.contains(&b'.') {
            return Err(TunnelError::Decoding(format!(
                "invalid label bytes {:02x?}",
                label
            )));
        }

        labels.push(
            String::from_utf8(label)
                .map_err(|e| TunnelError::Decoding(format!("invalid label: {}", e)))?,
        );
    }

    Ok(labels.join("."))
}
