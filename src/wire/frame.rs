use std::io::{BufRead, Read, Write};

use crate::constant::BASELINE;
use crate::error::{Error, Result};

/// Read one frame: a 4-byte little-endian length (bytes following it),
/// a 4-byte little-endian opcode, then `length - 4` payload bytes.
/// Frames below [`BASELINE`] are zero-padded on the wire; padding is
/// simply discarded here since `length` already bounds the real payload.
///
/// Returns `Ok(None)` on a clean EOF with zero bytes read (the other end
/// closed its socket); any other short read is a frame error.
pub fn read_frame<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> Result<Option<(u32, usize)>> {
    let mut header = [0u8; 4];
    match read_exact_or_eof(reader, &mut header)? {
        false => return Ok(None),
        true => {}
    }
    let length = u32::from_le_bytes(header) as usize;
    if length < 4 {
        return Err(Error::frame(format!(
            "frame length {length} too small to hold an opcode"
        )));
    }

    let mut rest = vec![0u8; length.max(BASELINE - 4)];
    reader
        .read_exact(&mut rest[..length])
        .map_err(Error::Io)?;
    // consume any zero padding up to baseline that a short frame carries
    if 4 + length < BASELINE {
        let mut pad = vec![0u8; BASELINE - 4 - length];
        reader.read_exact(&mut pad).map_err(Error::Io)?;
    }

    let opcode = u32::from_le_bytes(
        rest[0..4]
            .try_into()
            .map_err(|_| Error::frame("truncated opcode"))?,
    );
    buf.clear();
    buf.extend_from_slice(&rest[4..length]);
    Ok(Some((opcode, buf.len())))
}

fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(Error::frame("connection closed mid-header"));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(true)
}

/// Write one frame: opcode followed by `payload`, zero-padded up to
/// [`BASELINE`] when the combined size is smaller than that.
pub fn write_frame<W: Write>(writer: &mut W, opcode: u32, payload: &[u8]) -> Result<()> {
    let length = 4 + payload.len();
    let mut out = Vec::with_capacity(4 + length.max(BASELINE - 4));
    out.extend_from_slice(&(length as u32).to_le_bytes());
    out.extend_from_slice(&opcode.to_le_bytes());
    out.extend_from_slice(payload);
    if 4 + length < BASELINE {
        out.resize(BASELINE, 0);
    }
    writer.write_all(&out).map_err(Error::Io)?;
    writer.flush().map_err(Error::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    #[test]
    fn round_trips_small_payload() {
        let mut wire = Vec::new();
        write_frame(&mut wire, 7, b"hello").unwrap();
        assert_eq!(wire.len(), BASELINE);

        let mut reader = BufReader::new(&wire[..]);
        let mut buf = Vec::new();
        let (opcode, len) = read_frame(&mut reader, &mut buf).unwrap().unwrap();
        assert_eq!(opcode, 7);
        assert_eq!(len, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn round_trips_large_payload() {
        let payload = vec![0xABu8; BASELINE * 3];
        let mut wire = Vec::new();
        write_frame(&mut wire, 1, &payload).unwrap();
        assert_eq!(wire.len(), 4 + 4 + payload.len());

        let mut reader = BufReader::new(&wire[..]);
        let mut buf = Vec::new();
        let (opcode, len) = read_frame(&mut reader, &mut buf).unwrap().unwrap();
        assert_eq!(opcode, 1);
        assert_eq!(len, payload.len());
        assert_eq!(buf, payload);
    }

    #[test]
    fn clean_eof_returns_none() {
        let wire: Vec<u8> = Vec::new();
        let mut reader = BufReader::new(&wire[..]);
        let mut buf = Vec::new();
        assert!(read_frame(&mut reader, &mut buf).unwrap().is_none());
    }
}
