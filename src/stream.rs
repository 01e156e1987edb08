//! Byte sources the engine mines from.
//!
//! A [`Stream`] is either file-backed (read incrementally through a buffered
//! reader) or buffer-backed (a private copy of caller bytes). Both expose the
//! same cursor/window contract: `fill` buffers bytes ahead of the cursor,
//! `window` borrows them, `consume` advances the cursor.
use log::{debug, error};
use parking_lot::Mutex;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const READ_CHUNK: usize = 64 * 1024;

/// Stream handle shared between its owner and the engine it is bound to.
pub type SharedStream = Arc<Mutex<Stream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Ok,
    EndOfInput,
    Failed,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamStatus::Ok => write!(f, "ok"),
            StreamStatus::EndOfInput => write!(f, "end-of-input"),
            StreamStatus::Failed => write!(f, "failed"),
        }
    }
}

enum Source {
    File {
        path: PathBuf,
        reader: BufReader<File>,
        pending: Vec<u8>,
        /// Bytes of `pending` already behind the cursor
        consumed: usize,
        exhausted: bool,
        size: u64,
    },
    Buffer {
        data: Box<[u8]>,
    },
    Unavailable {
        path: PathBuf,
    },
}

pub struct Stream {
    source: Source,
    cursor: u64,
    status: StreamStatus,
    failure: Option<String>,
    previous: Option<u8>,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("origin", &self.origin())
            .field("cursor", &self.cursor)
            .field("status", &self.status)
            .field("failure", &self.failure)
            .finish()
    }
}

impl Stream {
    /// Opens `path` for sequential reading.
    ///
    /// Always returns a stream. Check [`Stream::status`] before use: a path
    /// that cannot be opened, or that is not a regular file, yields a
    /// `Failed` stream carrying the reason in [`Stream::failure`].
    pub fn open_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::try_open_file(path) {
            Ok(stream) => stream,
            Err(e) => {
                debug!("Failed to open stream {:?}: {}", path, e);
                Self {
                    source: Source::Unavailable {
                        path: path.to_path_buf(),
                    },
                    cursor: 0,
                    status: StreamStatus::Failed,
                    failure: Some(e.to_string()),
                    previous: None,
                }
            }
        }
    }

    fn try_open_file(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }

        let mut stream = Self {
            source: Source::File {
                path: path.to_path_buf(),
                reader: BufReader::with_capacity(READ_CHUNK, file),
                pending: Vec::new(),
                consumed: 0,
                exhausted: false,
                size: metadata.len(),
            },
            cursor: 0,
            status: StreamStatus::Ok,
            failure: None,
            previous: None,
        };
        // Prime one byte so an empty file reports end of input right away.
        stream.fill(1);
        Ok(stream)
    }

    /// Wraps a private copy of `bytes`. An empty buffer starts at end of input.
    pub fn open_buffer(bytes: impl AsRef<[u8]>) -> Self {
        let data: Box<[u8]> = bytes.as_ref().into();
        let status = if data.is_empty() {
            StreamStatus::EndOfInput
        } else {
            StreamStatus::Ok
        };
        Self {
            source: Source::Buffer { data },
            cursor: 0,
            status,
            failure: None,
            previous: None,
        }
    }

    pub fn into_shared(self) -> SharedStream {
        Arc::new(Mutex::new(self))
    }

    pub fn status(&self) -> StreamStatus {
        self.status
    }

    pub fn is_ok(&self) -> bool {
        self.status != StreamStatus::Failed
    }

    /// Reason the stream failed, if it did.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Absolute offset of the cursor.
    pub fn position(&self) -> u64 {
        self.cursor
    }

    /// Total size of the source when known up front.
    pub fn len_hint(&self) -> Option<u64> {
        match &self.source {
            Source::File { size, .. } => Some(*size),
            Source::Buffer { data } => Some(data.len() as u64),
            Source::Unavailable { .. } => None,
        }
    }

    /// Display name of the source.
    pub fn origin(&self) -> String {
        match &self.source {
            Source::File { path, .. } | Source::Unavailable { path } => {
                path.display().to_string()
            }
            Source::Buffer { .. } => "<buffer>".to_string(),
        }
    }

    /// Last byte consumed, i.e. the byte just before the cursor.
    pub fn previous_byte(&self) -> Option<u8> {
        self.previous
    }

    /// Buffers at least `want` bytes ahead of the cursor, or everything up
    /// to end of input. A read error fails the stream.
    pub fn fill(&mut self, want: usize) {
        if self.status == StreamStatus::Failed {
            return;
        }
        let result = match &mut self.source {
            Source::File {
                reader,
                pending,
                consumed,
                exhausted,
                ..
            } => fill_pending(reader, pending, consumed, exhausted, want),
            Source::Buffer { .. } | Source::Unavailable { .. } => Ok(()),
        };
        match result {
            Ok(()) => self.refresh_status(),
            Err(e) => self.fail(format!("read error at offset {}: {}", self.cursor, e)),
        }
    }

    /// Bytes buffered from the cursor onward.
    pub fn window(&self) -> &[u8] {
        if self.status == StreamStatus::Failed {
            return &[];
        }
        match &self.source {
            Source::File {
                pending, consumed, ..
            } => &pending[*consumed..],
            Source::Buffer { data } => {
                let start = (self.cursor as usize).min(data.len());
                &data[start..]
            }
            Source::Unavailable { .. } => &[],
        }
    }

    /// True when nothing beyond [`Stream::window`] remains in the source.
    pub fn source_exhausted(&self) -> bool {
        match &self.source {
            Source::File { exhausted, .. } => *exhausted,
            Source::Buffer { .. } | Source::Unavailable { .. } => true,
        }
    }

    /// Advances the cursor by `n` buffered bytes.
    pub fn consume(&mut self, n: usize) {
        if n == 0 || self.status == StreamStatus::Failed {
            return;
        }
        let n = n.min(self.window().len());
        if n == 0 {
            return;
        }
        self.previous = Some(self.window()[n - 1]);
        match &mut self.source {
            Source::File { consumed, .. } => *consumed += n,
            Source::Buffer { .. } | Source::Unavailable { .. } => {}
        }
        self.cursor += n as u64;

        if self.window().is_empty() && !self.source_exhausted() {
            self.fill(1);
        } else {
            self.refresh_status();
        }
    }

    /// Marks the stream permanently failed.
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        error!("Stream {} failed: {}", self.origin(), reason);
        self.status = StreamStatus::Failed;
        self.failure = Some(reason);
        if let Source::File {
            pending, consumed, ..
        } = &mut self.source
        {
            pending.clear();
            *consumed = 0;
        }
    }

    fn refresh_status(&mut self) {
        if self.status == StreamStatus::Failed {
            return;
        }
        if self.source_exhausted() && self.window().is_empty() {
            self.status = StreamStatus::EndOfInput;
        }
    }
}

fn fill_pending(
    reader: &mut BufReader<File>,
    pending: &mut Vec<u8>,
    consumed: &mut usize,
    exhausted: &mut bool,
    want: usize,
) -> io::Result<()> {
    // Drop the bytes already behind the cursor.
    if *consumed > 0 {
        pending.drain(..*consumed);
        *consumed = 0;
    }
    let mut chunk = [0u8; READ_CHUNK];
    while pending.len() < want && !*exhausted {
        let to_read = (want - pending.len()).clamp(1, READ_CHUNK);
        match reader.read(&mut chunk[..to_read]) {
            Ok(0) => *exhausted = true,
            Ok(n) => pending.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
