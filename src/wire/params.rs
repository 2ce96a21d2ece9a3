use crate::error::{Error, Result};

const TAG_NULL: u32 = 0;
const TAG_INT: u32 = 1;
const TAG_DOUBLE: u32 = 2;
const TAG_TEXT: u32 = 3;
const TAG_BLOB: u32 = 4;

/// A single parameter or result cell. `Text`'s declared wire length
/// includes the trailing NUL; the in-memory `String` does not carry it.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Int(i64),
    Double(f64),
    Text(String),
    Blob(Vec<u8>),
}

fn pad_to(buf: &mut Vec<u8>, align: usize) {
    let rem = buf.len() % align;
    if rem != 0 {
        buf.resize(buf.len() + (align - rem), 0);
    }
}

/// Appends the packed representation of `cells` to `buf`, aligning
/// relative to `buf`'s current length (SPEC_FULL.md §4.B).
pub fn pack(buf: &mut Vec<u8>, cells: &[Cell]) -> Result<()> {
    pad_to(buf, 8);
    buf.extend_from_slice(&(cells.len() as u32).to_le_bytes());

    for cell in cells {
        pad_to(buf, 4);
        match cell {
            Cell::Null => {
                buf.extend_from_slice(&TAG_NULL.to_le_bytes());
            }
            Cell::Int(v) => {
                buf.extend_from_slice(&TAG_INT.to_le_bytes());
                pad_to(buf, 8);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Cell::Double(v) => {
                buf.extend_from_slice(&TAG_DOUBLE.to_le_bytes());
                pad_to(buf, 8);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Cell::Blob(bytes) => {
                buf.extend_from_slice(&TAG_BLOB.to_le_bytes());
                buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                buf.extend_from_slice(bytes);
            }
            Cell::Text(s) => {
                let declared_len = s.len() + 1;
                buf.extend_from_slice(&TAG_TEXT.to_le_bytes());
                buf.extend_from_slice(&(declared_len as u32).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
                buf.push(0);
            }
        }
    }

    pad_to(buf, 4);
    Ok(())
}

/// Packs a fresh vector from scratch; convenience over [`pack`].
pub fn pack_new(cells: &[Cell]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    pack(&mut buf, cells)?;
    Ok(buf)
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32> {
    let bytes = buf
        .get(offset..offset + 4)
        .ok_or_else(|| Error::frame("truncated parameter buffer"))?;
    Ok(u32::from_le_bytes(bytes.try_into().expect("len 4")))
}

fn align_up(offset: usize, align: usize) -> usize {
    let rem = offset % align;
    if rem == 0 {
        offset
    } else {
        offset + (align - rem)
    }
}

/// Unpacks a cell vector starting at `base_offset` within `buf`.
/// Returns the cells and the offset of the first byte past the cells
/// (before final 4-byte padding is applied by the caller, if any).
pub fn unpack(buf: &[u8], base_offset: usize) -> Result<(Vec<Cell>, usize)> {
    let mut offset = align_up(base_offset, 8);
    let count = read_u32(buf, offset)? as usize;
    offset += 4;

    let mut cells = Vec::with_capacity(count);
    for _ in 0..count {
        offset = align_up(offset, 4);
        let tag = read_u32(buf, offset)?;
        offset += 4;
        let cell = match tag {
            TAG_NULL => Cell::Null,
            TAG_INT => {
                offset = align_up(offset, 8);
                let bytes = buf
                    .get(offset..offset + 8)
                    .ok_or_else(|| Error::frame("truncated int cell"))?;
                offset += 8;
                Cell::Int(i64::from_le_bytes(bytes.try_into().expect("len 8")))
            }
            TAG_DOUBLE => {
                offset = align_up(offset, 8);
                let bytes = buf
                    .get(offset..offset + 8)
                    .ok_or_else(|| Error::frame("truncated double cell"))?;
                offset += 8;
                Cell::Double(f64::from_le_bytes(bytes.try_into().expect("len 8")))
            }
            TAG_BLOB => {
                let len = read_u32(buf, offset)? as usize;
                offset += 4;
                let bytes = buf
                    .get(offset..offset + len)
                    .ok_or_else(|| Error::frame("truncated blob cell"))?;
                offset += len;
                Cell::Blob(bytes.to_vec())
            }
            TAG_TEXT => {
                let len = read_u32(buf, offset)? as usize;
                offset += 4;
                if len == 0 {
                    return Err(Error::frame("string cell declared zero length"));
                }
                let bytes = buf
                    .get(offset..offset + len)
                    .ok_or_else(|| Error::frame("truncated string cell"))?;
                offset += len;
                let (body, terminator) = bytes.split_at(len - 1);
                if terminator != [0] {
                    return Err(Error::frame("string cell missing trailing NUL"));
                }
                let text = std::str::from_utf8(body)
                    .map_err(|e| Error::frame(format!("string cell not valid utf-8: {e}")))?
                    .to_string();
                Cell::Text(text)
            }
            other => return Err(Error::frame(format!("unknown cell type tag {other}"))),
        };
        cells.push(cell);
    }

    Ok((cells, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cells() -> Vec<Cell> {
        vec![
            Cell::Null,
            Cell::Int(-42),
            Cell::Double(3.5),
            Cell::Text("hi".into()),
            Cell::Blob(vec![1, 2, 3, 4, 5]),
        ]
    }

    #[test]
    fn round_trips() {
        let cells = sample_cells();
        let packed = pack_new(&cells).unwrap();
        let (unpacked, _) = unpack(&packed, 0).unwrap();
        assert_eq!(cells, unpacked);
    }

    #[test]
    fn int_and_float_bodies_align_to_eight() {
        let cells = vec![Cell::Null, Cell::Int(7)];
        let packed = pack_new(&cells).unwrap();
        // offset 0: count(4) -> 4; tag(4) -> 8 (NULL, no body); tag(4) -> 12
        // pad to 4 already aligned; INT body must start at a multiple of 8
        let int_tag_offset = 8;
        assert_eq!(
            u32::from_le_bytes(packed[int_tag_offset..int_tag_offset + 4].try_into().unwrap()),
            TAG_INT
        );
        let body_offset = int_tag_offset + 4;
        let aligned = align_up(body_offset, 8);
        assert_eq!(
            i64::from_le_bytes(packed[aligned..aligned + 8].try_into().unwrap()),
            7
        );
    }

    #[test]
    fn string_without_terminator_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_le_bytes()); // count
        buf.extend_from_slice(&TAG_TEXT.to_le_bytes());
        buf.extend_from_slice(&2u32.to_le_bytes()); // declared len
        buf.extend_from_slice(b"hx"); // no NUL terminator
        assert!(unpack(&buf, 0).is_err());
    }

    #[test]
    fn string_zero_length_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&TAG_TEXT.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        assert!(unpack(&buf, 0).is_err());
    }

    #[test]
    fn unknown_tag_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&99u32.to_le_bytes());
        assert!(unpack(&buf, 0).is_err());
    }

    #[test]
    fn malformed_truncated_never_allocates_result() {
        let buf = vec![2u8, 0, 0, 0]; // claims 2 cells, no cell data
        assert!(unpack(&buf, 0).is_err());
    }
}
