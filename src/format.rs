//! Key and entry layouts.
//!
//! An internal key is the user key followed by the little-endian sequence
//! number. A memtable entry, as stored in arena memory, is
//!
//! ```text
//! varint32(internal_key_len) | internal_key | varint32(value_len) | value
//! ```
//!
//! and a lookup key is the same without the value section.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    coding::{get_length_prefixed_slice, put_length_prefixed_slice, put_varint32, varint_length},
    error::{Error, Result},
};

pub const SEQ_LEN: usize = size_of::<u64>();

pub fn get_user_key(internal_key: &[u8]) -> &[u8] {
    assert!(internal_key.len() >= SEQ_LEN);
    &internal_key[..internal_key.len() - SEQ_LEN]
}

pub fn get_key_seq(internal_key: &[u8]) -> u64 {
    assert!(internal_key.len() >= SEQ_LEN);
    let mut seq = &internal_key[internal_key.len() - SEQ_LEN..];
    seq.get_u64_le()
}

pub fn make_internal_key(user_key: &[u8], seq: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(user_key.len() + SEQ_LEN);
    buf.put(user_key);
    buf.put_u64_le(seq);
    buf.freeze()
}

pub fn memtable_entry_len(user_key: &[u8], value: &[u8]) -> usize {
    let ikey_len = user_key.len() + SEQ_LEN;
    varint_length(ikey_len as u32) + ikey_len + varint_length(value.len() as u32) + value.len()
}

/// Writes a memtable entry into `buf`, which must be exactly
/// [`memtable_entry_len`] bytes long.
pub fn encode_memtable_entry(mut buf: &mut [u8], seq: u64, user_key: &[u8], value: &[u8]) {
    let ikey_len = user_key.len() + SEQ_LEN;
    put_varint32(&mut buf, ikey_len as u32);
    buf.put_slice(user_key);
    buf.put_u64_le(seq);
    put_length_prefixed_slice(&mut buf, value);
    debug_assert!(buf.is_empty());
}

pub fn make_lookup_key(user_key: &[u8], seq: u64) -> Bytes {
    let ikey_len = user_key.len() + SEQ_LEN;
    let mut buf = BytesMut::with_capacity(varint_length(ikey_len as u32) + ikey_len);
    put_varint32(&mut buf, ikey_len as u32);
    buf.put(user_key);
    buf.put_u64_le(seq);
    buf.freeze()
}

/// Internal key of an entry or lookup key, plus the bytes consumed.
pub fn get_mem_internal_key(entry: &[u8]) -> Result<(&[u8], usize)> {
    let (ikey, used) = get_length_prefixed_slice(entry)?;
    if ikey.len() < SEQ_LEN {
        return Err(Error::Corruption(format!(
            "internal key of {} bytes is shorter than its sequence number",
            ikey.len()
        )));
    }
    Ok((ikey, used))
}

/// Splits a full memtable entry into its internal key and value.
pub fn decode_memtable_entry(entry: &[u8]) -> Result<(&[u8], &[u8])> {
    let (ikey, used) = get_mem_internal_key(entry)?;
    let (value, _) = get_length_prefixed_slice(&entry[used..])?;
    Ok((ikey, value))
}
