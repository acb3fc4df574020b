//! Incremental log tailing.
//!
//! The game appends to its log continuously and occasionally rotates or
//! truncates it. The tailer produces complete lines only, survives rotation
//! by watching file identity and size, and persists its byte offset through
//! the caller so a restart resumes exactly where it left off.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use memchr::memchr;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Poll cadence while idle.
pub const POLL_INTERVAL_MS: u64 = 200;

/// Cap on lines surfaced per poll so the ingest loop stays cancellable.
pub const MAX_LINES_PER_POLL: usize = 2_000;

/// Bytes scanned backwards from EOF during cold-start player detection.
pub const COLD_SCAN_BYTES: u64 = 5 * 1024 * 1024;

const READ_CHUNK: usize = 64 * 1024;

/// Text decode mode for the current file generation. Reset on rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeMode {
    Utf8,
    Utf16Le,
}

/// Result of one tailer poll.
#[derive(Debug)]
pub enum TailPoll {
    /// New complete lines, in file order.
    Lines(Vec<String>),
    /// File exists but nothing new.
    Idle,
    /// Source unavailable (missing path); keep polling.
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity(u64);

impl FileIdentity {
    fn of(meta: &std::fs::Metadata) -> Option<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            Some(Self(meta.ino()))
        }
        #[cfg(not(unix))]
        {
            meta.created()
                .ok()
                .and_then(|c| c.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| Self(d.as_nanos() as u64))
        }
    }
}

/// Stateful tailer over one log file.
pub struct LogTailer {
    path: PathBuf,
    /// Byte offset of the first unconsumed complete line.
    offset: u64,
    /// Last observed file size, persisted alongside the offset.
    file_size: u64,
    /// Bytes read past `offset` that do not yet end in a newline.
    partial: Vec<u8>,
    mode: DecodeMode,
    identity: Option<FileIdentity>,
    max_lines_per_poll: usize,
}

impl LogTailer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            file_size: 0,
            partial: Vec::new(),
            mode: DecodeMode::Utf8,
            identity: None,
            max_lines_per_poll: MAX_LINES_PER_POLL,
        }
    }

    /// Restore a tailer from a persisted (offset, file_size) pair.
    pub fn with_position(path: impl Into<PathBuf>, offset: u64, file_size: u64) -> Self {
        let mut tailer = Self::new(path);
        tailer.offset = offset;
        tailer.file_size = file_size;
        tailer
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Skip everything currently in the file; tail from live EOF.
    pub async fn resume_from_eof(&mut self) -> std::io::Result<()> {
        let meta = tokio::fs::metadata(&self.path).await?;
        self.offset = meta.len();
        self.file_size = meta.len();
        self.partial.clear();
        Ok(())
    }

    /// Read any new complete lines. Never returns fragments; at most
    /// `MAX_LINES_PER_POLL` lines per call.
    pub async fn poll(&mut self) -> TailPoll {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return TailPoll::Missing,
            Err(e) => {
                tracing::warn!("[TAILER] stat failed for {}: {e}", self.path.display());
                return TailPoll::Missing;
            }
        };

        let identity = FileIdentity::of(&meta);
        let rotated = meta.len() < self.offset
            || (self.identity.is_some() && identity.is_some() && identity != self.identity);
        if rotated {
            tracing::info!(
                "[TAILER] rotation detected ({} -> {} bytes), restarting at 0",
                self.offset,
                meta.len()
            );
            self.offset = 0;
            self.partial.clear();
            self.mode = DecodeMode::Utf8;
        }
        self.identity = identity;
        self.file_size = meta.len();

        if meta.len() == self.offset + self.partial.len() as u64 {
            return TailPoll::Idle;
        }

        match self.read_lines().await {
            Ok(lines) if lines.is_empty() => TailPoll::Idle,
            Ok(lines) => TailPoll::Lines(lines),
            Err(e) => {
                tracing::warn!("[TAILER] read failed for {}: {e}", self.path.display());
                TailPoll::Missing
            }
        }
    }

    async fn read_lines(&mut self) -> std::io::Result<Vec<String>> {
        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(self.offset + self.partial.len() as u64))
            .await?;

        let mut lines = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let n = file.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            self.partial.extend_from_slice(&chunk[..n]);
            self.maybe_switch_encoding();
            self.extract_lines(&mut lines);
            if lines.len() >= self.max_lines_per_poll {
                break;
            }
        }
        Ok(lines)
    }

    /// Switch to UTF-16LE when the buffer carries its signature: a BOM at
    /// file start, or interleaved NULs at odd positions (ASCII-heavy UTF-16LE
    /// text). Certain character names flip the game into UTF-16 logging.
    fn maybe_switch_encoding(&mut self) {
        if self.mode != DecodeMode::Utf8 || self.partial.len() < 8 {
            return;
        }
        if self.offset == 0 && self.partial.starts_with(&[0xFF, 0xFE]) {
            tracing::info!("[TAILER] UTF-16LE BOM detected, switching decoder");
            self.partial.drain(..2);
            self.offset = 2;
            self.mode = DecodeMode::Utf16Le;
            return;
        }
        let window = &self.partial[..self.partial.len().min(256) & !1];
        if window.is_empty() || !window.contains(&0) {
            return;
        }
        let odd_nulls = window.iter().skip(1).step_by(2).filter(|b| **b == 0).count();
        if odd_nulls * 2 >= window.len() / 2 {
            tracing::info!("[TAILER] interleaved NULs detected, switching to UTF-16LE");
            self.mode = DecodeMode::Utf16Le;
        }
    }

    fn extract_lines(&mut self, out: &mut Vec<String>) {
        match self.mode {
            DecodeMode::Utf8 => self.extract_utf8_lines(out),
            DecodeMode::Utf16Le => self.extract_utf16_lines(out),
        }
    }

    fn extract_utf8_lines(&mut self, out: &mut Vec<String>) {
        while out.len() < self.max_lines_per_poll {
            let Some(nl) = memchr(b'\n', &self.partial) else {
                break;
            };
            let mut end = nl;
            if end > 0 && self.partial[end - 1] == b'\r' {
                end -= 1;
            }
            out.push(String::from_utf8_lossy(&self.partial[..end]).into_owned());
            self.partial.drain(..nl + 1);
            self.offset += nl as u64 + 1;
        }
    }

    fn extract_utf16_lines(&mut self, out: &mut Vec<String>) {
        while out.len() < self.max_lines_per_poll {
            // Scan complete u16 units for a LE newline (0x000A).
            let units = self.partial.len() / 2;
            let mut line_units = None;
            for i in 0..units {
                if self.partial[i * 2] == 0x0A && self.partial[i * 2 + 1] == 0x00 {
                    line_units = Some(i);
                    break;
                }
            }
            let Some(n) = line_units else {
                break;
            };
            let line_bytes = &self.partial[..n * 2];
            let (decoded, _, _) = encoding_rs::UTF_16LE.decode(line_bytes);
            out.push(decoded.trim_end_matches('\r').to_string());
            let consumed = n * 2 + 2;
            self.partial.drain(..consumed);
            self.offset += consumed as u64;
        }
    }
}

/// Bounded backward scan over the tail of an existing file.
///
/// Used once at cold start to pre-seed the player context from a large log
/// without replaying it. Reads at most `max_bytes` from EOF, drops the
/// leading fragment, and returns complete lines in file order.
pub async fn scan_tail_lines(path: &Path, max_bytes: u64) -> std::io::Result<Vec<String>> {
    let mut file = File::open(path).await?;
    let len = file.metadata().await?.len();
    let start = len.saturating_sub(max_bytes);
    file.seek(SeekFrom::Start(start)).await?;

    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf).await?;

    // UTF-16 logs keep their interleaved NULs here; decode accordingly.
    let utf16 = buf.len() >= 8 && {
        let window = &buf[..buf.len().min(256) & !1];
        let odd_nulls = window.iter().skip(1).step_by(2).filter(|b| **b == 0).count();
        odd_nulls * 2 >= window.len() / 2
    };
    let text = if utf16 {
        encoding_rs::UTF_16LE.decode(&buf).0.into_owned()
    } else {
        String::from_utf8_lossy(&buf).into_owned()
    };

    let mut lines: Vec<String> = text
        .lines()
        .map(|l| l.trim_end_matches('\r').to_string())
        .collect();
    if start > 0 && !lines.is_empty() {
        // First entry is almost certainly a fragment of a longer line.
        lines.remove(0);
    }
    Ok(lines)
}
