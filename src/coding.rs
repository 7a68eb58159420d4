use bytes::BufMut;

use crate::error::{Error, Result};

pub const MAX_VARINT32_LEN: usize = 5;

pub fn varint_length(mut n: u32) -> usize {
    let mut len = 1;
    while n >= 0x80 {
        n >>= 7;
        len += 1;
    }
    len
}

// return length of the varint
pub fn put_varint32(buf: &mut impl BufMut, mut n: u32) -> usize {
    let mut len = 0;
    loop {
        let mut byte = (n as u8) & 0x7F;
        n >>= 7;
        if n != 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        len += 1;
        if n == 0 {
            return len;
        }
    }
}

/// Decodes a varint32 from the front of `src`, returning the value and the
/// number of bytes consumed.
pub fn decode_varint32(src: &[u8]) -> Result<(u32, usize)> {
    let mut n = 0u32;
    for (i, &byte) in src.iter().take(MAX_VARINT32_LEN).enumerate() {
        let bits = (byte & 0x7F) as u32;
        if i == MAX_VARINT32_LEN - 1 && bits > 0x0F {
            return Err(Error::Corruption("varint32 overflow".into()));
        }
        n |= bits << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((n, i + 1));
        }
    }

    if src.len() >= MAX_VARINT32_LEN {
        Err(Error::Corruption("varint32 overflow".into()))
    } else {
        Err(Error::Corruption("varint32 truncated".into()))
    }
}

pub fn put_length_prefixed_slice(buf: &mut impl BufMut, s: &[u8]) -> usize {
    let len = put_varint32(buf, s.len() as u32);
    buf.put_slice(s);
    len + s.len()
}

/// Reads a length-prefixed byte span from the front of `src`, returning the
/// span and the total number of bytes consumed.
pub fn get_length_prefixed_slice(src: &[u8]) -> Result<(&[u8], usize)> {
    let (len, offset) = decode_varint32(src)?;
    let end = offset + len as usize;
    if end > src.len() {
        return Err(Error::Corruption(format!(
            "length prefix {len} exceeds remaining {} bytes",
            src.len() - offset
        )));
    }
    Ok((&src[offset..end], end))
}
