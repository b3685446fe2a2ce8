//! Big-endian word access, the byte order of flattened device trees.

/// Read a big-endian `u32` at byte `offset`, or `None` if it runs past the slice.
#[inline]
pub fn read_be32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read a big-endian `u64` at byte `offset`, or `None` if it runs past the slice.
#[inline]
pub fn read_be64(data: &[u8], offset: usize) -> Option<u64> {
    let hi = read_be32(data, offset)? as u64;
    let lo = read_be32(data, offset.checked_add(4)?)? as u64;
    Some((hi << 32) | lo)
}

/// Append a big-endian `u32` to a byte buffer.
#[inline]
pub fn push_be32(buf: &mut impl Extend<u8>, value: u32) {
    buf.extend(value.to_be_bytes());
}
