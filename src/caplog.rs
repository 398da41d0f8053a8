//! The persistent capture log.
//!
//! The log is a flat concatenation of records, each consisting of a [RecordHeader] followed by
//! the raw frame. There is no index, so reading it back means scanning from the start. The
//! backing file is abstracted by [LogStore], which the firmware implements on top of its flash
//! file system.
//!
//! In [LogMode::Ring], the write cursor jumps back to the start once the size limit would be
//! exceeded. Records from the previous lap, that weren't overwritten yet, stay in the file. A
//! new record rarely ends exactly where an old one did, so the gap up to the next intact record
//! is covered by a padding record, which the scan skips. Gaps too small for a header are closed
//! by giving up the following old record as well. The write cursor survives closing and
//! reopening the log, so a resumed ring keeps overwriting the oldest records. Only a
//! [CaptureLog], that has never been opened, falls back to the end of the file.

use core::fmt;

use base64::Engine;
use embedded_io::{Error, ErrorKind};
use heapless::String;

use crate::{
    config::LogMode,
    frame::{CapturedFrame, MAX_COPY},
};

pub mod ram;

pub const RECORD_HEADER_LEN: usize = 8;
/// Channel 0 doesn't exist, so it marks padding records.
pub const PADDING_CHANNEL: u8 = 0;
/// The smallest log, that can hold a record of maximum size.
pub const MIN_LOG_BYTES: u32 = (RECORD_HEADER_LEN + MAX_COPY) as u32;
/// The amount of raw bytes encoded into one dump line.
pub const DUMP_CHUNK: usize = 48;
/// A base64 encoded [DUMP_CHUNK].
pub type DumpLine = String<{ DUMP_CHUNK / 3 * 4 }>;

/// The metadata stored in front of every frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RecordHeader {
    pub len: u16,
    pub rssi: i8,
    pub channel: u8,
    pub timestamp: u32,
}
impl RecordHeader {
    pub fn for_frame(frame: &CapturedFrame) -> Self {
        Self {
            len: frame.len() as u16,
            rssi: frame.rssi(),
            channel: frame.channel(),
            timestamp: frame.timestamp(),
        }
    }
    pub fn to_bytes(&self) -> [u8; RECORD_HEADER_LEN] {
        let mut bytes = [0u8; RECORD_HEADER_LEN];
        bytes[0..2].copy_from_slice(&self.len.to_le_bytes());
        bytes[2] = self.rssi as u8;
        bytes[3] = self.channel;
        bytes[4..8].copy_from_slice(&self.timestamp.to_le_bytes());
        bytes
    }
    pub fn from_bytes(bytes: [u8; RECORD_HEADER_LEN]) -> Self {
        let [l0, l1, rssi, channel, t0, t1, t2, t3] = bytes;
        Self {
            len: u16::from_le_bytes([l0, l1]),
            rssi: rssi as i8,
            channel,
            timestamp: u32::from_le_bytes([t0, t1, t2, t3]),
        }
    }
    /// A record covering `gap` bytes, including its header, that the scan skips.
    pub const fn padding(gap: u32) -> Self {
        Self {
            len: (gap - RECORD_HEADER_LEN as u32) as u16,
            rssi: 0,
            channel: PADDING_CHANNEL,
            timestamp: 0,
        }
    }
    pub const fn is_padding(&self) -> bool {
        self.channel == PADDING_CHANNEL
    }
    /// Whether this could be the header of a record starting at `offset`, in a file of `size`
    /// bytes.
    pub fn fits(&self, offset: u32, size: u32) -> bool {
        (self.is_padding() || self.len as usize <= MAX_COPY)
            && offset.saturating_add(self.record_len()) <= size
    }
    /// The length of the header and the payload together.
    pub const fn record_len(&self) -> u32 {
        RECORD_HEADER_LEN as u32 + self.len as u32
    }
}

/// How the backing file is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OpenMode {
    /// Create the file or discard its contents.
    Truncate,
    /// Create the file, if it doesn't exist, and keep its contents.
    Update,
}

/// The file backing the capture log.
pub trait LogStore {
    type Error: Error;

    /// Open the file for writing.
    fn open(&mut self, mode: OpenMode) -> Result<(), Self::Error>;
    fn close(&mut self);
    /// The size of the file, or [None] if it doesn't exist.
    fn size(&mut self) -> Result<Option<u32>, Self::Error>;
    /// Read from the file at `offset`. Returns the amount of bytes read, which is zero at the
    /// end of the file.
    ///
    /// This must work regardless of whether the file is open for writing.
    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, Self::Error>;
    /// Write all of `data` at `offset`. The file must be open.
    fn write_at(&mut self, offset: u32, data: &[u8]) -> Result<(), Self::Error>;
    fn flush(&mut self) -> Result<(), Self::Error>;
    /// Delete the file. Deleting a file, that doesn't exist, isn't an error.
    fn remove(&mut self) -> Result<(), Self::Error>;
    /// Reformat the volume the file lives on.
    fn format(&mut self) -> Result<(), Self::Error>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LogError<E> {
    /// The store reported an error.
    Store(E),
    /// A dump chunk couldn't be encoded.
    Encoding,
}
impl<E> From<E> for LogError<E> {
    fn from(value: E) -> Self {
        Self::Store(value)
    }
}
impl<E: Error> LogError<E> {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(err) => err.kind(),
            Self::Encoding => ErrorKind::InvalidData,
        }
    }
}
impl<E: Error> fmt::Display for LogError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(err) => write!(f, "storage error ({:?})", err.kind()),
            Self::Encoding => f.write_str("encoding error"),
        }
    }
}
pub type LogResult<T, E> = Result<T, LogError<E>>;

/// What [CaptureLog::append] did with a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AppendOutcome {
    Written,
    /// The cursor wrapped around to the start, before the frame was written.
    Wrapped,
    /// The log is full and was closed. The frame wasn't written.
    Full,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LogStatus {
    /// The current file size, or [None] if there is no file.
    pub size: Option<u32>,
    pub limit: u32,
    pub open: bool,
}

/// A size limited log of raw frames.
pub struct CaptureLog<S> {
    store: S,
    is_open: bool,
    cursor: u32,
    /// Whether [Self::cursor] belongs to the file, which is false until the first open.
    resumable: bool,
    /// The first intact record of the previous ring lap at or after the cursor.
    stale: Option<u32>,
}
impl<S: LogStore> CaptureLog<S> {
    pub const fn new(store: S) -> Self {
        Self {
            store,
            is_open: false,
            cursor: 0,
            resumable: false,
            stale: None,
        }
    }
    pub const fn is_open(&self) -> bool {
        self.is_open
    }
    /// The offset, at which the next record will be written.
    pub const fn cursor(&self) -> u32 {
        self.cursor
    }
    pub fn store(&self) -> &S {
        &self.store
    }
    /// Start a logging session.
    ///
    /// In [LogMode::Stop] the file is truncated. In [LogMode::Ring] this is the same as
    /// [Self::resume].
    pub fn open(&mut self, mode: LogMode, max_bytes: u32) -> LogResult<(), S::Error> {
        if mode == LogMode::Ring {
            return self.resume(mode, max_bytes);
        }
        self.close();
        self.store.open(OpenMode::Truncate)?;
        self.cursor = 0;
        self.stale = None;
        self.opened(mode);
        Ok(())
    }
    /// Reopen the log without discarding anything.
    ///
    /// Appending continues at the cursor of the previous session. In [LogMode::Stop] that only
    /// holds if no records of an earlier ring lap lie ahead of it, otherwise the end of the file
    /// is used. A ring, whose cursor is already past the limit, starts over at the beginning.
    pub fn resume(&mut self, mode: LogMode, max_bytes: u32) -> LogResult<(), S::Error> {
        self.close();
        self.store.open(OpenMode::Update)?;
        let size = match self.store.size() {
            Ok(size) => size.unwrap_or(0),
            Err(err) => {
                self.store.close();
                return Err(err.into());
            }
        };
        let keep_cursor = self.resumable
            && match mode {
                LogMode::Ring => true,
                LogMode::Stop => self.stale.is_none(),
            };
        if keep_cursor {
            self.cursor = self.cursor.min(size);
            self.stale = self.stale.filter(|stale| *stale <= size);
        } else {
            self.cursor = size;
            self.stale = None;
        }
        if mode == LogMode::Ring && self.cursor >= max_bytes {
            self.cursor = 0;
            self.stale = Some(0);
        }
        self.opened(mode);
        Ok(())
    }
    fn opened(&mut self, mode: LogMode) {
        debug!(
            "Opened capture log in {} mode at offset {}.",
            mode.keyword(),
            self.cursor
        );
        self.is_open = true;
        self.resumable = true;
    }
    /// Close the log, if it's open.
    pub fn close(&mut self) {
        if self.is_open {
            self.store.close();
            self.is_open = false;
            debug!("Closed capture log.");
        }
    }
    /// Append a frame, resuming the log first if necessary.
    ///
    /// On error the log is closed, so the next append will try to reopen it.
    pub fn append(
        &mut self,
        frame: &CapturedFrame,
        mode: LogMode,
        max_bytes: u32,
    ) -> LogResult<AppendOutcome, S::Error> {
        if !self.is_open {
            self.resume(mode, max_bytes)?;
        }
        let header = RecordHeader::for_frame(frame);
        let mut outcome = AppendOutcome::Written;
        if self.cursor.saturating_add(header.record_len()) > max_bytes {
            match mode {
                LogMode::Ring => {
                    debug!("Capture log wrapped at offset {}.", self.cursor);
                    self.cursor = 0;
                    self.stale = Some(0);
                    outcome = AppendOutcome::Wrapped;
                }
                LogMode::Stop => {
                    info!("Capture log reached its limit of {} bytes.", max_bytes);
                    self.close();
                    return Ok(AppendOutcome::Full);
                }
            }
        }
        if let Err(err) = self.write_record(&header, frame.bytes()) {
            warn!("Writing to the capture log failed: {:?}", err.kind());
            self.close();
            return Err(err.into());
        }
        self.cursor += header.record_len();
        Ok(outcome)
    }
    fn write_record(&mut self, header: &RecordHeader, payload: &[u8]) -> Result<(), S::Error> {
        let end = self.cursor + header.record_len();
        let (stale, padding) = match self.stale {
            Some(stale) => self.skip_overwritten(stale, end)?,
            None => (None, None),
        };
        self.store.write_at(self.cursor, &header.to_bytes())?;
        self.store
            .write_at(self.cursor + RECORD_HEADER_LEN as u32, payload)?;
        if let Some(padding) = padding {
            self.store.write_at(end, &padding.to_bytes())?;
        }
        self.store.flush()?;
        self.stale = stale;
        Ok(())
    }
    /// Find the first record of the previous lap, that survives a write ending at `end`.
    ///
    /// Returns its offset, which is the end of the file if none survives, and the padding
    /// needed in front of it.
    fn skip_overwritten(
        &mut self,
        mut stale: u32,
        end: u32,
    ) -> Result<(Option<u32>, Option<RecordHeader>), S::Error> {
        let size = self.store.size()?.unwrap_or(0);
        while stale < size
            && (stale < end || (stale > end && stale - end < RECORD_HEADER_LEN as u32))
        {
            let mut header = [0u8; RECORD_HEADER_LEN];
            let header = if read_exact_at(&mut self.store, stale, &mut header)? {
                Some(RecordHeader::from_bytes(header)).filter(|header| header.fits(stale, size))
            } else {
                None
            };
            stale = match header {
                Some(header) => stale + header.record_len(),
                None => size,
            };
        }
        let padding = (stale > end && stale - end >= RECORD_HEADER_LEN as u32)
            .then(|| RecordHeader::padding(stale - end));
        // Past the end of the file nothing is left to protect.
        Ok(((end < size).then_some(stale), padding))
    }
    pub fn status(&mut self, max_bytes: u32) -> LogResult<LogStatus, S::Error> {
        Ok(LogStatus {
            size: self.store.size()?,
            limit: max_bytes,
            open: self.is_open,
        })
    }
    /// Close and delete the log.
    pub fn clear(&mut self) -> LogResult<(), S::Error> {
        self.close();
        self.cursor = 0;
        self.stale = None;
        self.store.remove()?;
        Ok(())
    }
    /// Close the log and reformat the volume.
    pub fn format(&mut self) -> LogResult<(), S::Error> {
        self.close();
        self.cursor = 0;
        self.stale = None;
        self.store.format()?;
        Ok(())
    }
    /// Scan the log from the start.
    ///
    /// A missing file yields nothing.
    pub fn export_text(&mut self) -> LogResult<Records<'_, S>, S::Error> {
        let end = self.store.size()?.unwrap_or(0);
        Ok(Records {
            store: &mut self.store,
            offset: 0,
            end,
            done: false,
        })
    }
    /// Encode the log as base64 lines of [DUMP_CHUNK] bytes each.
    pub fn export_dump(&mut self) -> LogResult<DumpChunks<'_, S>, S::Error> {
        let end = self.store.size()?.unwrap_or(0);
        Ok(DumpChunks {
            store: &mut self.store,
            offset: 0,
            end,
            done: false,
        })
    }
}

/// Fill `buf` completely. Returns false, if the file ended first.
fn read_exact_at<S: LogStore>(
    store: &mut S,
    mut offset: u32,
    mut buf: &mut [u8],
) -> Result<bool, S::Error> {
    while !buf.is_empty() {
        let read = store.read_at(offset, buf)?;
        if read == 0 {
            return Ok(false);
        }
        offset += read as u32;
        buf = &mut buf[read..];
    }
    Ok(true)
}

/// The records in the log, in file order.
///
/// Padding is skipped. The scan ends at the first record, that is truncated or longer than
/// [MAX_COPY], or after the first error.
pub struct Records<'a, S> {
    store: &'a mut S,
    offset: u32,
    end: u32,
    done: bool,
}
impl<S: LogStore> Records<'_, S> {
    fn next_record(&mut self) -> Result<Option<CapturedFrame>, S::Error> {
        let header = loop {
            if self.offset.saturating_add(RECORD_HEADER_LEN as u32) > self.end {
                return Ok(None);
            }
            let mut header = [0u8; RECORD_HEADER_LEN];
            if !read_exact_at(self.store, self.offset, &mut header)? {
                return Ok(None);
            }
            let header = RecordHeader::from_bytes(header);
            if !header.fits(self.offset, self.end) {
                trace!("Capture log scan ended at offset {}.", self.offset);
                return Ok(None);
            }
            if !header.is_padding() {
                break header;
            }
            self.offset += header.record_len();
        };
        let mut payload = [0u8; MAX_COPY];
        let payload = &mut payload[..header.len as usize];
        if !read_exact_at(
            self.store,
            self.offset + RECORD_HEADER_LEN as u32,
            payload,
        )? {
            return Ok(None);
        }
        self.offset += header.record_len();
        Ok(Some(CapturedFrame::new(
            header.timestamp,
            header.channel,
            header.rssi,
            payload,
        )))
    }
}
impl<S: LogStore> Iterator for Records<'_, S> {
    type Item = LogResult<CapturedFrame, S::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.next_record().map_err(LogError::from).transpose();
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}

/// The log as base64 lines.
pub struct DumpChunks<'a, S> {
    store: &'a mut S,
    offset: u32,
    end: u32,
    done: bool,
}
impl<S: LogStore> DumpChunks<'_, S> {
    fn next_chunk(&mut self) -> LogResult<Option<DumpLine>, S::Error> {
        if self.offset >= self.end {
            return Ok(None);
        }
        let mut raw = [0u8; DUMP_CHUNK];
        let wanted = ((self.end - self.offset) as usize).min(DUMP_CHUNK);
        let read = self.store.read_at(self.offset, &mut raw[..wanted])?;
        if read == 0 {
            return Ok(None);
        }
        self.offset += read as u32;

        let mut encoded = [0u8; DUMP_CHUNK / 3 * 4];
        let encoded_len = base64::engine::general_purpose::STANDARD
            .encode_slice(&raw[..read], &mut encoded)
            .map_err(|_| LogError::Encoding)?;
        let text = core::str::from_utf8(&encoded[..encoded_len]).map_err(|_| LogError::Encoding)?;
        let mut line = DumpLine::new();
        line.push_str(text).map_err(|_| LogError::Encoding)?;
        Ok(Some(line))
    }
}
impl<S: LogStore> Iterator for DumpChunks<'_, S> {
    type Item = LogResult<DumpLine, S::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.next_chunk().transpose();
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}
