//! Binary encode/decode for the `.steps` file format.
//!
//! All integers are little-endian. Strings are length-prefixed with a
//! `u32`; shapes are a `u32` rank followed by `u64` extents; column data
//! is a `u64` element count followed by packed little-endian elements.
//!
//! ```text
//! [MAGIC "MMST"] [VERSION u8]
//! [TAG_FRAME step u64 nvars u32 {var}*] ... [TAG_END]
//! var   = name dtype:u8 shape nblocks:u32 {start count data}*
//! ```

use std::io::{self, Read, Write};

use middleman_core::{BlockId, BlockInfo, Column, DType, Shape, StepId, StreamError};

use crate::frame::{FrameVar, StepFrame};
use crate::{FORMAT_VERSION, MAGIC};

/// Record tag preceding an encoded [`StepFrame`].
pub const TAG_FRAME: u8 = 1;

/// Record tag marking a cleanly closed stream.
pub const TAG_END: u8 = 2;

/// One decoded record.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    /// A published step.
    Frame(StepFrame),
    /// The writer closed the stream.
    End,
}

// ── Primitive writers ───────────────────────────────────────────

fn write_u8(w: &mut dyn Write, v: u8) -> Result<(), StreamError> {
    w.write_all(&[v])?;
    Ok(())
}

fn write_u32_le(w: &mut dyn Write, v: u32) -> Result<(), StreamError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_u64_le(w: &mut dyn Write, v: u64) -> Result<(), StreamError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_str(w: &mut dyn Write, s: &str) -> Result<(), StreamError> {
    write_u32_le(w, s.len() as u32)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn write_shape(w: &mut dyn Write, shape: &[usize]) -> Result<(), StreamError> {
    write_u32_le(w, shape.len() as u32)?;
    for &d in shape {
        write_u64_le(w, d as u64)?;
    }
    Ok(())
}

macro_rules! write_elems {
    ($w:expr, $v:expr) => {{
        let mut buf = Vec::with_capacity(std::mem::size_of_val($v.as_slice()));
        for x in $v {
            buf.extend_from_slice(&x.to_le_bytes());
        }
        $w.write_all(&buf)?;
    }};
}

fn write_column(w: &mut dyn Write, col: &Column) -> Result<(), StreamError> {
    write_u8(w, col.dtype().tag())?;
    write_u64_le(w, col.len() as u64)?;
    match col {
        Column::F32(v) => write_elems!(w, v),
        Column::F64(v) => write_elems!(w, v),
        Column::I32(v) => write_elems!(w, v),
        Column::I64(v) => write_elems!(w, v),
        Column::U64(v) => write_elems!(w, v),
    }
    Ok(())
}

// ── Primitive readers ───────────────────────────────────────────

fn read_u8(r: &mut dyn Read) -> Result<u8, StreamError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32_le(r: &mut dyn Read) -> Result<u32, StreamError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64_le(r: &mut dyn Read) -> Result<u64, StreamError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Read exactly `len` bytes without trusting `len` for the allocation.
fn read_bytes(r: &mut dyn Read, len: u64) -> Result<Vec<u8>, StreamError> {
    let mut buf = Vec::new();
    r.take(len).read_to_end(&mut buf)?;
    if (buf.len() as u64) < len {
        return Err(StreamError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {len} bytes, got {}", buf.len()),
        )));
    }
    Ok(buf)
}

fn read_str(r: &mut dyn Read) -> Result<String, StreamError> {
    let len = read_u32_le(r)?;
    let buf = read_bytes(r, u64::from(len))?;
    String::from_utf8(buf).map_err(|e| StreamError::MalformedFrame {
        detail: format!("invalid UTF-8 string: {e}"),
    })
}

fn read_shape(r: &mut dyn Read) -> Result<Shape, StreamError> {
    let rank = read_u32_le(r)?;
    if rank > 8 {
        return Err(StreamError::MalformedFrame {
            detail: format!("shape rank {rank} exceeds 8"),
        });
    }
    let mut shape = Shape::new();
    for _ in 0..rank {
        shape.push(read_u64_le(r)? as usize);
    }
    Ok(shape)
}

macro_rules! read_elems {
    ($bytes:expr, $ty:ty, $variant:ident) => {{
        const N: usize = std::mem::size_of::<$ty>();
        Column::$variant(
            $bytes
                .chunks_exact(N)
                .map(|c| {
                    let mut a = [0u8; N];
                    a.copy_from_slice(c);
                    <$ty>::from_le_bytes(a)
                })
                .collect(),
        )
    }};
}

fn read_column(r: &mut dyn Read) -> Result<Column, StreamError> {
    let tag = read_u8(r)?;
    let dtype = DType::from_tag(tag).ok_or_else(|| StreamError::MalformedFrame {
        detail: format!("unknown dtype tag {tag}"),
    })?;
    let len = read_u64_le(r)?;
    let nbytes = len
        .checked_mul(dtype.size_of() as u64)
        .ok_or_else(|| StreamError::MalformedFrame {
            detail: format!("column length {len} overflows"),
        })?;
    let bytes = read_bytes(r, nbytes)?;
    Ok(match dtype {
        DType::F32 => read_elems!(bytes, f32, F32),
        DType::F64 => read_elems!(bytes, f64, F64),
        DType::I32 => read_elems!(bytes, i32, I32),
        DType::I64 => read_elems!(bytes, i64, I64),
        DType::U64 => read_elems!(bytes, u64, U64),
    })
}

// ── Header encode/decode ────────────────────────────────────────

/// Encode the file header (magic and format version).
pub fn encode_header(w: &mut dyn Write) -> Result<(), StreamError> {
    w.write_all(&MAGIC)?;
    write_u8(w, FORMAT_VERSION)
}

/// Decode and validate the file header.
pub fn decode_header(r: &mut dyn Read) -> Result<(), StreamError> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(StreamError::InvalidMagic);
    }
    let version = read_u8(r)?;
    if version != FORMAT_VERSION {
        return Err(StreamError::UnsupportedVersion { found: version });
    }
    Ok(())
}

// ── Record encode/decode ────────────────────────────────────────

/// Encode one step frame, tag included.
pub fn encode_frame(w: &mut dyn Write, frame: &StepFrame) -> Result<(), StreamError> {
    write_u8(w, TAG_FRAME)?;
    write_u64_le(w, frame.step.0)?;
    write_u32_le(w, frame.vars.len() as u32)?;
    for (name, var) in &frame.vars {
        write_str(w, name)?;
        write_u8(w, var.dtype.tag())?;
        write_shape(w, &var.shape)?;
        write_u32_le(w, var.blocks.len() as u32)?;
        for (info, data) in &var.blocks {
            write_shape(w, &info.start)?;
            write_shape(w, &info.count)?;
            write_column(w, data)?;
        }
    }
    Ok(())
}

/// Encode the end-of-stream marker.
pub fn encode_end(w: &mut dyn Write) -> Result<(), StreamError> {
    write_u8(w, TAG_END)
}

/// Decode one record.
///
/// Returns `Ok(None)` on clean EOF (no bytes before the tag). A record
/// cut short surfaces as [`StreamError::Io`] with
/// [`io::ErrorKind::UnexpectedEof`]; see [`is_truncation`].
pub fn decode_record(r: &mut dyn Read) -> Result<Option<Record>, StreamError> {
    let mut tag = [0u8; 1];
    loop {
        match r.read(&mut tag) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(StreamError::Io(e)),
        }
    }
    match tag[0] {
        TAG_END => Ok(Some(Record::End)),
        TAG_FRAME => decode_frame_body(r).map(|f| Some(Record::Frame(f))),
        other => Err(StreamError::MalformedFrame {
            detail: format!("unknown record tag {other}"),
        }),
    }
}

fn decode_frame_body(r: &mut dyn Read) -> Result<StepFrame, StreamError> {
    let mut frame = StepFrame::new(StepId(read_u64_le(r)?));
    let nvars = read_u32_le(r)?;
    for _ in 0..nvars {
        let name = read_str(r)?;
        let tag = read_u8(r)?;
        let dtype = DType::from_tag(tag).ok_or_else(|| StreamError::MalformedFrame {
            detail: format!("variable '{name}' has unknown dtype tag {tag}"),
        })?;
        let shape = read_shape(r)?;
        let nblocks = read_u32_le(r)?;
        let mut blocks = Vec::new();
        for i in 0..nblocks {
            let start = read_shape(r)?;
            let count = read_shape(r)?;
            let data = read_column(r)?;
            if data.dtype() != dtype {
                return Err(StreamError::MalformedFrame {
                    detail: format!("variable '{name}' block {i} holds {}", data.dtype()),
                });
            }
            blocks.push((
                BlockInfo {
                    id: BlockId(i),
                    start,
                    count,
                },
                data,
            ));
        }
        if frame
            .vars
            .insert(name.clone(), FrameVar { dtype, shape, blocks })
            .is_some()
        {
            return Err(StreamError::MalformedFrame {
                detail: format!("variable '{name}' appears twice in step {}", frame.step),
            });
        }
    }
    Ok(frame)
}

/// Whether a decode error means the input simply ended mid-record.
pub fn is_truncation(err: &StreamError) -> bool {
    matches!(err, StreamError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameBuilder;
    use middleman_core::VariableDef;

    fn sample_frame() -> StepFrame {
        let mut b = FrameBuilder::new();
        b.define(VariableDef::local("table", DType::F64, &[0, 2]))
            .unwrap();
        b.define(VariableDef::local("igid", DType::I64, &[0])).unwrap();
        b.define(VariableDef::global_1d("n_t", DType::I32, 1)).unwrap();
        b.begin().unwrap();
        b.put("table", Column::F64(vec![1.5, -2.0, 3.25, 0.0]), Some(&[2, 2]))
            .unwrap();
        b.put("igid", Column::I64(vec![]), Some(&[0])).unwrap();
        b.put("n_t", Column::I32(vec![42]), None).unwrap();
        b.end().unwrap()
    }

    #[test]
    fn frame_survives_encoding() {
        let frame = sample_frame();
        let mut buf = Vec::new();
        encode_frame(&mut buf, &frame).unwrap();
        encode_end(&mut buf).unwrap();

        let mut r = buf.as_slice();
        assert_eq!(decode_record(&mut r).unwrap(), Some(Record::Frame(frame)));
        assert_eq!(decode_record(&mut r).unwrap(), Some(Record::End));
        assert_eq!(decode_record(&mut r).unwrap(), None);
    }

    #[test]
    fn header_checks_magic_and_version() {
        let mut buf = Vec::new();
        encode_header(&mut buf).unwrap();
        assert!(decode_header(&mut buf.as_slice()).is_ok());

        let bad = b"MURK\x01";
        assert!(matches!(
            decode_header(&mut bad.as_slice()),
            Err(StreamError::InvalidMagic)
        ));
        let future = b"MMST\x09";
        assert!(matches!(
            decode_header(&mut future.as_slice()),
            Err(StreamError::UnsupportedVersion { found: 9 })
        ));
    }

    #[test]
    fn every_truncation_point_is_detected() {
        let mut buf = Vec::new();
        encode_frame(&mut buf, &sample_frame()).unwrap();
        for cut in 1..buf.len() {
            let err = decode_record(&mut &buf[..cut]).unwrap_err();
            assert!(is_truncation(&err), "cut at {cut}: {err}");
        }
    }

    #[test]
    fn unknown_tag_is_malformed() {
        let err = decode_record(&mut [7u8].as_slice()).unwrap_err();
        assert!(matches!(err, StreamError::MalformedFrame { .. }));
        assert!(!is_truncation(&err));
    }

    #[test]
    fn huge_length_does_not_allocate() {
        let mut buf = vec![TAG_FRAME];
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&u32::MAX.to_le_bytes());
        let err = decode_record(&mut buf.as_slice()).unwrap_err();
        assert!(is_truncation(&err));
    }
}
