//! On-disk step streams.
//!
//! [`FileStepWriter`] appends encoded frames to a `.steps` file and
//! flushes after each one. [`FileStepReader`] decodes them; in follow
//! mode it tolerates a file that is still being written, reporting
//! [`StepStatus::NotReady`] until the next complete frame is on disk.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use middleman_core::{
    BlockId, BlockInfo, Column, StepId, StepReader, StepStatus, StepWriter, StreamError,
    VariableDef, VariableInfo,
};

use crate::codec::{decode_header, decode_record, encode_end, encode_frame, encode_header};
use crate::codec::{is_truncation, Record};
use crate::frame::{FrameBuilder, OpenStep, ReadCursor};
use crate::MAGIC;

/// Header length: magic plus version byte.
const HEADER_LEN: u64 = MAGIC.len() as u64 + 1;

/// Interval between file polls while a follow reader waits.
const FOLLOW_POLL: Duration = Duration::from_millis(10);

// ── Writer ──────────────────────────────────────────────────────

/// Writes a step stream to a file.
#[derive(Debug)]
pub struct FileStepWriter {
    path: PathBuf,
    out: Option<BufWriter<File>>,
    builder: FrameBuilder,
}

impl FileStepWriter {
    /// Create (or truncate) `path` and write the header.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, StreamError> {
        let path = path.as_ref().to_path_buf();
        let mut out = BufWriter::new(File::create(&path)?);
        encode_header(&mut out)?;
        out.flush()?;
        log::debug!("opened step file {} for writing", path.display());
        Ok(Self {
            path,
            out: Some(out),
            builder: FrameBuilder::new(),
        })
    }

    /// Path of the file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn out(&mut self) -> Result<&mut BufWriter<File>, StreamError> {
        self.out.as_mut().ok_or(StreamError::Closed)
    }
}

impl StepWriter for FileStepWriter {
    fn define_variable(&mut self, def: VariableDef) -> Result<(), StreamError> {
        self.builder.define(def)
    }

    fn begin_step(&mut self) -> Result<(), StreamError> {
        self.builder.begin()
    }

    fn put(&mut self, name: &str, data: Column, count: Option<&[usize]>) -> Result<(), StreamError> {
        self.builder.put(name, data, count)
    }

    fn end_step(&mut self) -> Result<(), StreamError> {
        let frame = self.builder.end()?;
        // Encode fully before touching the file so a follower never sees
        // an interleaving of two frames.
        let mut buf = Vec::new();
        encode_frame(&mut buf, &frame)?;
        let out = self.out()?;
        out.write_all(&buf)?;
        out.flush()?;
        Ok(())
    }

    fn steps_written(&self) -> u64 {
        self.builder.steps_written()
    }

    fn close(&mut self) -> Result<(), StreamError> {
        self.builder.close();
        let Some(mut out) = self.out.take() else {
            return Ok(());
        };
        encode_end(&mut out)?;
        out.flush()?;
        log::debug!(
            "closed step file {} after {} steps",
            self.path.display(),
            self.builder.steps_written()
        );
        Ok(())
    }
}

impl Drop for FileStepWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("failed to close {}: {e}", self.path.display());
        }
    }
}

// ── Reader ──────────────────────────────────────────────────────

/// Reads a step stream from a file.
#[derive(Debug)]
pub struct FileStepReader {
    path: PathBuf,
    file: Option<File>,
    /// Offset of the next undecoded record.
    pos: u64,
    follow: bool,
    wait: Duration,
    ended: bool,
    cursor: ReadCursor,
}

impl FileStepReader {
    /// Open a complete file. The header is validated immediately; a
    /// missing `END` marker is treated as end of stream.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StreamError> {
        let mut reader = Self::new(path.as_ref(), false, Duration::ZERO);
        reader.file = Some(File::open(&reader.path)?);
        if !reader.try_read_header()? {
            return Err(StreamError::MalformedFrame {
                detail: format!("{} is shorter than the header", reader.path.display()),
            });
        }
        Ok(reader)
    }

    /// Follow a file that may still be growing, or may not exist yet.
    ///
    /// `begin_step` waits up to `wait` for the next complete frame before
    /// reporting [`StepStatus::NotReady`].
    pub fn follow(path: impl AsRef<Path>, wait: Duration) -> Self {
        Self::new(path.as_ref(), true, wait)
    }

    fn new(path: &Path, follow: bool, wait: Duration) -> Self {
        Self {
            path: path.to_path_buf(),
            file: None,
            pos: 0,
            follow,
            wait,
            ended: false,
            cursor: ReadCursor::default(),
        }
    }

    /// Path of the file being read.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Validate the header if enough bytes exist. `Ok(false)` means the
    /// file is still shorter than the header.
    fn try_read_header(&mut self) -> Result<bool, StreamError> {
        if self.pos >= HEADER_LEN {
            return Ok(true);
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(false);
        };
        if file.metadata()?.len() < HEADER_LEN {
            return Ok(false);
        }
        file.seek(SeekFrom::Start(0))?;
        decode_header(file)?;
        self.pos = HEADER_LEN;
        Ok(true)
    }

    /// One attempt at decoding the next record. `Ok(None)` means no
    /// complete record is available yet.
    fn try_next(&mut self) -> Result<Option<Record>, StreamError> {
        if self.file.is_none() {
            match File::open(&self.path) {
                Ok(f) => self.file = Some(f),
                Err(e) if self.follow && e.kind() == std::io::ErrorKind::NotFound => {
                    return Ok(None)
                }
                Err(e) => return Err(e.into()),
            }
        }
        if !self.try_read_header()? {
            return Ok(None);
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(None);
        };
        file.seek(SeekFrom::Start(self.pos))?;
        let mut tail = Vec::new();
        file.read_to_end(&mut tail)?;

        let mut rest = tail.as_slice();
        match decode_record(&mut rest) {
            Ok(Some(record)) => {
                self.pos += (tail.len() - rest.len()) as u64;
                Ok(Some(record))
            }
            Ok(None) if self.follow => Ok(None),
            Ok(None) => {
                log::warn!("{} ends without an end marker", self.path.display());
                Ok(Some(Record::End))
            }
            Err(e) if is_truncation(&e) && self.follow => Ok(None),
            Err(e) if is_truncation(&e) => Err(StreamError::MalformedFrame {
                detail: format!("truncated record at offset {} in {}", self.pos, self.path.display()),
            }),
            Err(e) => Err(e),
        }
    }
}

impl StepReader for FileStepReader {
    fn begin_step(&mut self) -> Result<StepStatus, StreamError> {
        self.cursor.check_can_begin()?;
        if self.ended {
            return Ok(StepStatus::EndOfStream);
        }
        let deadline = Instant::now() + self.wait;
        loop {
            match self.try_next()? {
                Some(Record::Frame(frame)) => {
                    self.cursor.open = Some(OpenStep::new(Arc::new(frame)));
                    return Ok(StepStatus::Ok);
                }
                Some(Record::End) => {
                    self.ended = true;
                    log::debug!("end of stream in {}", self.path.display());
                    return Ok(StepStatus::EndOfStream);
                }
                None => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(StepStatus::NotReady);
                    }
                    std::thread::sleep(remaining.min(FOLLOW_POLL));
                }
            }
        }
    }

    fn current_step(&self) -> Option<StepId> {
        self.cursor.current_step()
    }

    fn inquire_variable(&self, name: &str) -> Result<Option<VariableInfo>, StreamError> {
        Ok(self.cursor.step()?.frame().variable_info(name))
    }

    fn blocks_info(&self, name: &str) -> Result<Vec<BlockInfo>, StreamError> {
        self.cursor.step()?.frame().blocks_info(name)
    }

    fn get(&mut self, name: &str, block: BlockId) -> Result<(), StreamError> {
        self.cursor.step_mut()?.get(name, block)
    }

    fn perform_gets(&mut self) -> Result<Vec<Column>, StreamError> {
        self.cursor.step_mut()?.perform_gets()
    }

    fn end_step(&mut self) -> Result<(), StreamError> {
        self.cursor.end()
    }

    fn close(&mut self) -> Result<(), StreamError> {
        self.cursor.open = None;
        self.cursor.closed = true;
        self.file = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use middleman_core::DType;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "middleman-file-{}-{name}.steps",
            std::process::id()
        ))
    }

    fn write_two_steps(w: &mut FileStepWriter) {
        w.define_variable(VariableDef::local("gid", DType::I64, &[0]))
            .unwrap();
        for step in 0..2i64 {
            w.begin_step().unwrap();
            w.put("gid", Column::I64(vec![step, step + 10]), Some(&[2]))
                .unwrap();
            w.end_step().unwrap();
        }
    }

    #[test]
    fn written_steps_read_back() {
        let path = temp_path("roundtrip");
        let mut w = FileStepWriter::create(&path).unwrap();
        write_two_steps(&mut w);
        w.close().unwrap();

        let mut r = FileStepReader::open(&path).unwrap();
        for step in 0..2i64 {
            assert_eq!(r.begin_step().unwrap(), StepStatus::Ok);
            assert_eq!(r.current_step(), Some(StepId(step as u64)));
            r.get("gid", BlockId(0)).unwrap();
            assert_eq!(r.perform_gets().unwrap(), vec![Column::I64(vec![step, step + 10])]);
            r.end_step().unwrap();
        }
        assert_eq!(r.begin_step().unwrap(), StepStatus::EndOfStream);
        assert_eq!(r.begin_step().unwrap(), StepStatus::EndOfStream);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn follow_reader_waits_for_missing_file() {
        let path = temp_path("missing");
        std::fs::remove_file(&path).ok();
        let mut r = FileStepReader::follow(&path, Duration::ZERO);
        assert_eq!(r.begin_step().unwrap(), StepStatus::NotReady);

        let mut w = FileStepWriter::create(&path).unwrap();
        assert_eq!(r.begin_step().unwrap(), StepStatus::NotReady);
        write_two_steps(&mut w);
        assert_eq!(r.begin_step().unwrap(), StepStatus::Ok);
        r.end_step().unwrap();
        assert_eq!(r.begin_step().unwrap(), StepStatus::Ok);
        r.end_step().unwrap();
        assert_eq!(r.begin_step().unwrap(), StepStatus::NotReady);
        w.close().unwrap();
        assert_eq!(r.begin_step().unwrap(), StepStatus::EndOfStream);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn follow_reader_skips_partial_frame_until_complete() {
        let path = temp_path("partial");
        let mut w = FileStepWriter::create(&path).unwrap();
        write_two_steps(&mut w);
        w.close().unwrap();
        let full = std::fs::read(&path).unwrap();

        // Cut the file inside the second frame.
        std::fs::write(&path, &full[..full.len() - 5]).unwrap();
        let mut r = FileStepReader::follow(&path, Duration::ZERO);
        assert_eq!(r.begin_step().unwrap(), StepStatus::Ok);
        r.end_step().unwrap();
        assert_eq!(r.begin_step().unwrap(), StepStatus::NotReady);

        std::fs::write(&path, &full).unwrap();
        assert_eq!(r.begin_step().unwrap(), StepStatus::Ok);
        assert_eq!(r.current_step(), Some(StepId(1)));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn truncated_file_is_malformed_without_follow() {
        let path = temp_path("truncated");
        let mut w = FileStepWriter::create(&path).unwrap();
        write_two_steps(&mut w);
        w.close().unwrap();
        let full = std::fs::read(&path).unwrap();
        std::fs::write(&path, &full[..full.len() - 5]).unwrap();

        let mut r = FileStepReader::open(&path).unwrap();
        assert_eq!(r.begin_step().unwrap(), StepStatus::Ok);
        r.end_step().unwrap();
        assert!(matches!(
            r.begin_step(),
            Err(StreamError::MalformedFrame { .. })
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn writer_rejects_puts_after_close() {
        let path = temp_path("closed");
        let mut w = FileStepWriter::create(&path).unwrap();
        w.close().unwrap();
        assert!(matches!(w.begin_step(), Err(StreamError::Closed)));
        std::fs::remove_file(&path).ok();
    }
}
