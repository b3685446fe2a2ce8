use alloc::{boxed::Box, vec::Vec};
use core::{fmt, str};
use utils::endian::{read_be32, read_be64};

/// A named property of a live tree node. Data is stored exactly as it appears in the blob.
#[derive(Debug, Clone)]
pub struct Property {
    pub name: Box<str>,
    pub data: Box<[u8]>,
}

impl Property {
    pub fn new(name: &str, data: &[u8]) -> Property {
        Property {
            name: Box::from(name),
            data: Box::from(data),
        }
    }
    pub fn value_as_u32(&self) -> Result<u32, PropertyError> {
        decode_u32(&self.data)
    }
    pub fn value_as_u64(&self) -> Result<u64, PropertyError> {
        decode_u64(&self.data)
    }
    pub fn value_as_str(&self) -> Result<&str, PropertyError> {
        decode_str(&self.data)
    }
    pub fn value_as_strlist(&self) -> Result<Vec<&str>, PropertyError> {
        decode_strlist(&self.data)
    }
    pub fn value_as_u32_list(&self) -> Result<Vec<u32>, PropertyError> {
        decode_u32_array(&self.data)
    }
}

/// Decode the first cell of a property as a big-endian `u32`.
pub fn decode_u32(data: &[u8]) -> Result<u32, PropertyError> {
    read_be32(data, 0).ok_or(PropertyError::InvalidPropFormat)
}

/// Decode a property as a big-endian `u64` (two cells).
pub fn decode_u64(data: &[u8]) -> Result<u64, PropertyError> {
    read_be64(data, 0).ok_or(PropertyError::InvalidPropFormat)
}

/// Decode a property as a single string, dropping the NUL terminator.
pub fn decode_str(data: &[u8]) -> Result<&str, PropertyError> {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    str::from_utf8(&data[..end]).map_err(|_| PropertyError::InvalidPropFormat)
}

/// Decode a NUL-separated string list. A missing final terminator is tolerated.
pub fn decode_strlist(data: &[u8]) -> Result<Vec<&str>, PropertyError> {
    let mut res = Vec::new();
    let mut st = 0;
    for i in 0..data.len() {
        if data[i] == 0 {
            res.push(str::from_utf8(&data[st..i]).map_err(|_| PropertyError::InvalidPropFormat)?);
            st = i + 1;
        }
    }
    if st != data.len() {
        res.push(str::from_utf8(&data[st..]).map_err(|_| PropertyError::InvalidPropFormat)?);
    }
    Ok(res)
}

/// Decode a property as an array of big-endian cells.
pub fn decode_u32_array(data: &[u8]) -> Result<Vec<u32>, PropertyError> {
    if data.len() % 4 != 0 {
        return Err(PropertyError::InvalidPropFormat);
    }
    Ok(data
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyError {
    InvalidPropFormat,
    PropNotFound,
    DanglingHandle,
}

impl fmt::Display for PropertyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyError::InvalidPropFormat => f.write_str("invalid property format"),
            PropertyError::PropNotFound => f.write_str("property not found"),
            PropertyError::DanglingHandle => f.write_str("dangling phandle"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_lists_split_on_nul() {
        let data = b"vendor,a\0generic-b\0";
        assert_eq!(decode_strlist(data).unwrap(), ["vendor,a", "generic-b"]);
        assert_eq!(decode_strlist(b"tail").unwrap(), ["tail"]);
        assert_eq!(decode_str(b"okay\0").unwrap(), "okay");
    }

    #[test]
    fn short_cells_are_rejected() {
        assert_eq!(decode_u32(&[0, 1]), Err(PropertyError::InvalidPropFormat));
        assert_eq!(decode_u32_array(&[0, 0, 0, 1, 0]), Err(PropertyError::InvalidPropFormat));
        assert_eq!(decode_u32_array(&[0, 0, 0, 1, 0, 0, 0, 2]).unwrap(), [1, 2]);
        assert_eq!(decode_u64(&[0, 0, 0, 1, 0, 0, 0, 2]).unwrap(), (1 << 32) | 2);
    }
}
