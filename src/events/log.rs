//! Append-only event log file.
//!
//! Each mutation is written as one batch frame:
//!
//! ```text
//! "BAT\0" | payload_len: u32 | payload (MessagePack Vec<CustodyEvent>) | crc32(payload): u32
//! ```
//!
//! A batch is either fully present or treated as absent, which is what makes
//! split and merge all-or-nothing on disk.

use crate::error::{LedgerError, Result};
use crate::types::CustodyEvent;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the log header.
const LOG_MAGIC: &[u8; 4] = b"CUS\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

/// Header size (magic + version).
const HEADER_SIZE: u64 = 5;

/// Magic bytes opening every batch frame.
const BATCH_MAGIC: &[u8; 4] = b"BAT\0";

/// Largest batch payload accepted when reading.
const MAX_BATCH_BYTES: usize = 256 * 1024 * 1024;

/// Frame overhead (magic + length + checksum).
const FRAME_OVERHEAD: u64 = 4 + 4 + 4;

struct Writer {
    file: File,
    size: u64,
    writes_since_sync: u64,
}

impl Writer {
    /// Drop everything past `offset`. Best effort; the next append seeks to
    /// `offset` and overwrites whatever the truncate left behind.
    fn rollback(&mut self, offset: u64) {
        if let Err(e) = self.file.set_len(offset) {
            tracing::warn!(offset, error = %e, "failed to truncate event log after write error");
        }
        self.size = offset;
    }
}

/// Append-only, checksummed log of event batches.
pub struct EventLog {
    path: PathBuf,
    writer: Mutex<Writer>,
    /// Sync every N batches (1 = every batch).
    sync_interval: u64,
}

/// Outcome of reading one frame.
enum Frame {
    Batch(Vec<CustodyEvent>),
    End,
    Torn(&'static str),
}

impl EventLog {
    /// Open or create a log, returning it with every intact batch in order.
    ///
    /// An incomplete or corrupt final frame (a crash mid-write) is truncated.
    /// A corrupt frame followed by more data is reported as corruption.
    pub fn open(path: impl AsRef<Path>, sync_interval: u64) -> Result<(Self, Vec<Vec<CustodyEvent>>)> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let file_size = file.metadata()?.len();

        let mut batches = Vec::new();
        let size = if file_size == 0 {
            file.write_all(LOG_MAGIC)?;
            file.write_all(&[LOG_VERSION])?;
            file.sync_all()?;
            HEADER_SIZE
        } else {
            let valid_end = Self::read_batches(&file, file_size, &mut batches)?;
            if valid_end < file_size {
                tracing::warn!(
                    path = %path.display(),
                    valid_end,
                    file_size,
                    "truncating torn tail of event log"
                );
                file.set_len(valid_end)?;
                file.sync_all()?;
            }
            valid_end
        };

        tracing::debug!(path = %path.display(), batches = batches.len(), "opened event log");

        Ok((
            Self {
                path,
                writer: Mutex::new(Writer {
                    file,
                    size,
                    writes_since_sync: 0,
                }),
                sync_interval: sync_interval.max(1),
            },
            batches,
        ))
    }

    /// Append one batch. On failure, including a failed sync, the file is
    /// cut back to its previous length so no partial batch survives.
    pub fn append_batch(&self, events: &[CustodyEvent]) -> Result<u64> {
        self.append_with_sync(events, File::sync_data)
    }

    fn append_with_sync(
        &self,
        events: &[CustodyEvent],
        sync: impl FnOnce(&File) -> std::io::Result<()>,
    ) -> Result<u64> {
        let payload = rmp_serde::to_vec_named(events)?;
        if payload.len() > MAX_BATCH_BYTES {
            return Err(LedgerError::Serialization("event batch too large".into()));
        }
        let payload_len = payload.len() as u32;

        let mut frame = Vec::with_capacity(payload.len() + FRAME_OVERHEAD as usize);
        frame.extend_from_slice(BATCH_MAGIC);
        frame.extend_from_slice(&payload_len.to_le_bytes());
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());

        let mut writer = self.writer.lock();
        let offset = writer.size;

        let written = match writer.file.seek(SeekFrom::Start(offset)) {
            Ok(_) => writer.file.write_all(&frame),
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            writer.rollback(offset);
            return Err(e.into());
        }
        writer.size = offset + frame.len() as u64;

        writer.writes_since_sync += 1;
        if writer.writes_since_sync >= self.sync_interval {
            if let Err(e) = sync(&writer.file) {
                writer.rollback(offset);
                return Err(e.into());
            }
            writer.writes_since_sync = 0;
        }

        Ok(offset)
    }

    /// Force pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.file.sync_all()?;
        writer.writes_since_sync = 0;
        Ok(())
    }

    /// Current file size.
    pub fn size(&self) -> u64 {
        self.writer.lock().size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every intact batch; returns the offset just past the last one.
    fn read_batches(file: &File, file_size: u64, out: &mut Vec<Vec<CustodyEvent>>) -> Result<u64> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut magic = [0u8; 4];
        let mut version = [0u8; 1];
        if reader.read_exact(&mut magic).is_err() || &magic != LOG_MAGIC {
            return Err(LedgerError::InvalidFormat("invalid event log magic".into()));
        }
        reader.read_exact(&mut version)?;
        if version[0] != LOG_VERSION {
            return Err(LedgerError::InvalidFormat(format!(
                "unsupported event log version: {}",
                version[0]
            )));
        }

        let mut offset = HEADER_SIZE;
        loop {
            match Self::read_frame(&mut reader)? {
                Frame::Batch(events) => {
                    offset = reader.stream_position()?;
                    out.push(events);
                }
                Frame::End => return Ok(offset),
                Frame::Torn(reason) => {
                    let frame_end = Self::declared_frame_end(file, offset)?;
                    if frame_end.map_or(true, |end| end >= file_size) {
                        tracing::warn!(offset, reason, "discarding incomplete event batch");
                        return Ok(offset);
                    }
                    return Err(LedgerError::Corruption(format!(
                        "event batch at offset {} is damaged ({}) and followed by more data",
                        offset, reason
                    )));
                }
            }
        }
    }

    fn read_frame(reader: &mut impl Read) -> Result<Frame> {
        let mut magic = [0u8; 4];
        match read_fully(reader, &mut magic)? {
            0 => return Ok(Frame::End),
            4 => {}
            _ => return Ok(Frame::Torn("short frame header")),
        }
        if &magic != BATCH_MAGIC {
            return Ok(Frame::Torn("bad frame magic"));
        }

        let mut len_bytes = [0u8; 4];
        if read_fully(reader, &mut len_bytes)? < 4 {
            return Ok(Frame::Torn("short frame length"));
        }
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_BATCH_BYTES {
            return Ok(Frame::Torn("frame length out of range"));
        }

        let mut payload = vec![0u8; len];
        if read_fully(reader, &mut payload)? < len {
            return Ok(Frame::Torn("short payload"));
        }

        let mut crc_bytes = [0u8; 4];
        if read_fully(reader, &mut crc_bytes)? < 4 {
            return Ok(Frame::Torn("short checksum"));
        }
        let stored = u32::from_le_bytes(crc_bytes);
        let computed = crc32fast::hash(&payload);
        if stored != computed {
            return Ok(Frame::Torn("checksum mismatch"));
        }

        let events: Vec<CustodyEvent> = rmp_serde::from_slice(&payload)?;
        Ok(Frame::Batch(events))
    }

    /// End offset a frame at `offset` claims, if its header is readable.
    fn declared_frame_end(file: &File, offset: u64) -> Result<Option<u64>> {
        let mut file = file.try_clone()?;
        file.seek(SeekFrom::Start(offset + 4))?;
        let mut len_bytes = [0u8; 4];
        if read_fully(&mut file, &mut len_bytes)? < 4 {
            return Ok(None);
        }
        let len = u32::from_le_bytes(len_bytes) as u64;
        Ok(Some(offset + FRAME_OVERHEAD + len))
    }
}

/// Read until `buf` is full or EOF; returns bytes read.
fn read_fully(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
