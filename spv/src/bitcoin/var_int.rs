use crate::{Error, Result};
use bytes::{Buf, BufMut};

/// The size of the value encoded as a varint.
pub fn varint_size(value: u64) -> u64 {
    match value {
        0..=252 => 1,
        253..=0xffff => 3,
        0x10000..=0xffffffff => 5,
        _ => 9,
    }
}

/// Read a varint from the buffer.
pub fn varint_decode(buffer: &mut dyn Buf) -> Result<u64> {
    let n0 = buffer.try_get_u8()?;
    let v = match n0 {
        0xff => buffer.try_get_u64_le()?,
        0xfe => buffer.try_get_u32_le()? as u64,
        0xfd => buffer.try_get_u16_le()? as u64,
        _ => n0 as u64,
    };
    Ok(v)
}

/// Read a varint that is used as the length of something that follows, checking that the
/// buffer holds at least `min_item_size` bytes per item.
pub fn varint_decode_len(buffer: &mut dyn Buf, min_item_size: usize) -> Result<usize> {
    let n = varint_decode(buffer)?;
    if n > (buffer.remaining() / min_item_size.max(1)) as u64 {
        return Err(Error::DataTooSmall);
    }
    Ok(n as usize)
}

/// Write a varint to the buffer.
pub fn varint_encode(buffer: &mut dyn BufMut, value: u64) -> Result<()> {
    match value {
        0..=252 => buffer.put_u8(value as u8),
        253..=0xffff => {
            buffer.put_u8(0xfd);
            buffer.put_u16_le(value as u16);
        }
        0x10000..=0xffffffff => {
            buffer.put_u8(0xfe);
            buffer.put_u32_le(value as u32);
        }
        _ => {
            buffer.put_u8(0xff);
            buffer.put_u64_le(value);
        }
    };
    Ok(())
}

/// Read a length-prefixed string.
pub fn var_str_decode(buffer: &mut dyn Buf) -> Result<String> {
    let len = varint_decode_len(buffer, 1)?;
    let mut v = vec![0u8; len];
    buffer.copy_to_slice(&mut v);
    Ok(String::from_utf8(v)?)
}

/// Write a length-prefixed string.
pub fn var_str_encode(buffer: &mut dyn BufMut, value: &str) -> Result<()> {
    varint_encode(buffer, value.len() as u64)?;
    buffer.put_slice(value.as_bytes());
    Ok(())
}
