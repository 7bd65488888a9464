//! Bounds-checked little-endian reading and writing for container bytes.
//!
//! Readers take an offset cursor and advance it; an overrun is an input
//! error with the position, never a panic.

use crate::Result;

pub(super) fn write_u8(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

pub(super) fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub(super) fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub(super) fn write_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub(super) fn read_bytes<'a>(data: &'a [u8], offset: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = offset
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| malformed_error!("container truncated at offset {offset}"))?;
    let slice = &data[*offset..end];
    *offset = end;
    Ok(slice)
}

pub(super) fn read_u8(data: &[u8], offset: &mut usize) -> Result<u8> {
    Ok(read_bytes(data, offset, 1)?[0])
}

pub(super) fn read_u16(data: &[u8], offset: &mut usize) -> Result<u16> {
    let bytes = read_bytes(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub(super) fn read_u32(data: &[u8], offset: &mut usize) -> Result<u32> {
    let bytes = read_bytes(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub(super) fn read_i32(data: &[u8], offset: &mut usize) -> Result<i32> {
    let bytes = read_bytes(data, offset, 4)?;
    Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_primitives() {
        let mut out = Vec::new();
        write_u8(&mut out, 7);
        write_u16(&mut out, 0xBEEF);
        write_u32(&mut out, 0xDEAD_BEEF);
        write_i32(&mut out, -42);

        let mut offset = 0;
        assert_eq!(read_u8(&out, &mut offset).unwrap(), 7);
        assert_eq!(read_u16(&out, &mut offset).unwrap(), 0xBEEF);
        assert_eq!(read_u32(&out, &mut offset).unwrap(), 0xDEAD_BEEF);
        assert_eq!(read_i32(&out, &mut offset).unwrap(), -42);
        assert_eq!(offset, out.len());
    }

    #[test]
    fn test_overrun_is_an_input_error() {
        let data = [1u8, 2];
        let mut offset = 1;
        assert!(read_u32(&data, &mut offset).is_err());
        // A failed read leaves the cursor where it was.
        assert_eq!(offset, 1);
    }
}
