use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Append-only write-ahead log of [`Event`] records.
///
/// Frame layout: `[u32 LE: payload len][bincode payload][u32 LE: crc32(payload)]`.
/// A torn or corrupt frame ends replay; everything before it is kept.
///
/// The file only ever grows by whole synced batches. Opening cuts off a
/// torn tail, and a failed [`Wal::sync`] cuts the file back to its last
/// durable length, so a later batch never lands behind a frame replay
/// would stop at. If that cut fails the log is poisoned and refuses
/// every later write.
pub struct Wal {
    file: File,
    buf: Vec<u8>,
    pending: u64,
    durable_len: u64,
    path: PathBuf,
    appended: u64,
    poisoned: bool,
}

/// Larger length prefixes are treated as corruption.
pub(crate) const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Append one frame to `out`. On error `out` is left untouched.
fn encode_frame(out: &mut Vec<u8>, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_RECORD_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "record too large"));
    }
    out.reserve(payload.len() + 8);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(())
}

/// Read exactly `buf.len()` bytes. `Ok(false)` on a clean or torn EOF.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact record and its frame length in bytes, or `None` at the
/// end of the valid prefix.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut word = [0u8; 4];
    if !fill(reader, &mut word)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !fill(reader, &mut payload)? || !fill(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize(&payload)
        .ok()
        .map(|event| (event, len as u64 + 8)))
}

/// Intact records in file order and the byte length of the prefix
/// holding them. A missing file is an empty log.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid_len = 0u64;
    while let Some((event, frame_len)) = read_frame(&mut reader)? {
        events.push(event);
        valid_len += frame_len;
    }
    Ok((events, valid_len))
}

impl Wal {
    /// Replay `path` and open it for appending, truncating anything past
    /// the last intact record.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, valid_len) = scan(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        if len > valid_len {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = len - valid_len,
                "truncating torn WAL tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            file,
            buf: Vec::new(),
            pending: 0,
            durable_len: valid_len,
            path: path.to_path_buf(),
            appended: 0,
            poisoned: false,
        };
        Ok((wal, events))
    }

    pub fn open(path: &Path) -> io::Result<Self> {
        Self::recover(path).map(|(wal, _)| wal)
    }

    fn check_poisoned(&self) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("WAL poisoned by a failed rollback"));
        }
        Ok(())
    }

    /// Buffer one record. Not durable until [`Wal::sync`]. A record that
    /// cannot be encoded leaves the buffer as it was.
    pub fn push(&mut self, event: &Event) -> io::Result<()> {
        self.check_poisoned()?;
        encode_frame(&mut self.buf, event)?;
        self.pending += 1;
        Ok(())
    }

    /// Write buffered records and fsync. On failure the buffered records
    /// are dropped and the file is cut back to its last durable length.
    pub fn sync(&mut self) -> io::Result<()> {
        self.check_poisoned()?;
        let written = self
            .file
            .write_all(&self.buf)
            .and_then(|()| self.file.sync_all());
        match written {
            Ok(()) => {
                self.durable_len += self.buf.len() as u64;
                self.appended += self.pending;
                self.buf.clear();
                self.pending = 0;
                Ok(())
            }
            Err(e) => {
                if let Err(cut) = self.rollback() {
                    tracing::error!(
                        path = %self.path.display(),
                        "WAL rollback failed, refusing further writes: {cut}"
                    );
                    self.poisoned = true;
                }
                Err(e)
            }
        }
    }

    /// Drop buffered records and cut the file back to the last synced
    /// length.
    pub fn rollback(&mut self) -> io::Result<()> {
        self.buf.clear();
        self.pending = 0;
        self.file.set_len(self.durable_len)?;
        self.file.sync_all()
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.push(event)?;
        self.sync()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records made durable through this handle since it was opened.
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// All intact records in file order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        scan(path).map(|(events, _)| events)
    }
}
