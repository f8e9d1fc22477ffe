//! Append-only JSON Lines event log
//!
//! Each exported record is one line: serialized JSON followed by `\n`. Lines
//! are written whole under a lock, so concurrent appends never interleave.
//! Apart from an explicit `clear()`, the file only ever shrinks to drop a
//! partial last line: in `open()` after a crash, or right after a failed
//! append.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::record::ExportedRecord;

const SCAN_CHUNK: usize = 64 * 1024;

/// Durable sink for exported records.
#[derive(Debug)]
pub struct EventSink {
    path: PathBuf,
    sync_each_write: bool,
    write_lock: Mutex<()>,
}

impl EventSink {
    /// Open (or create) the log at `path`.
    ///
    /// Creates missing parent directories. If a previous run died mid-write
    /// and left a partial last line, the partial line is cut off so every
    /// line in the file parses.
    pub async fn open(path: impl Into<PathBuf>, sync_each_write: bool) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| sink_error("creating log directory", parent, e))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(|e| sink_error("opening event log", &path, e))?;
        repair_torn_tail(&mut file, &path).await?;

        info!(path = %path.display(), sync_each_write, "event log opened");
        Ok(Self {
            path,
            sync_each_write,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a complete line.
    pub async fn append(&self, record: &ExportedRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)
            .map_err(|e| Error::Sink(format!("serializing record: {e}")))?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| sink_error("opening event log", &self.path, e))?;
        let line_start = file
            .metadata()
            .await
            .map_err(|e| sink_error("reading event log metadata", &self.path, e))?
            .len();

        if let Err(e) = write_line(&mut file, &line, self.sync_each_write).await {
            discard_partial_append(&file, &self.path, line_start).await;
            return Err(sink_error("appending to event log", &self.path, e));
        }
        Ok(())
    }

    /// Number of complete lines in the log. A missing file counts as empty.
    pub async fn count(&self) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(sink_error("opening event log", &self.path, e)),
        };

        let mut buf = vec![0u8; SCAN_CHUNK];
        let mut lines = 0u64;
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| sink_error("reading event log", &self.path, e))?;
            if n == 0 {
                break;
            }
            lines += buf[..n].iter().filter(|&&b| b == b'\n').count() as u64;
        }
        Ok(lines)
    }

    /// Size of the log in bytes. A missing file counts as empty.
    pub async fn size_bytes(&self) -> Result<u64> {
        match fs::metadata(&self.path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(sink_error("reading event log metadata", &self.path, e)),
        }
    }

    /// Empty the log. Waits for any in-flight append to finish first.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        File::create(&self.path)
            .await
            .map_err(|e| sink_error("clearing event log", &self.path, e))?;
        info!(path = %self.path.display(), "event log cleared");
        Ok(())
    }
}

async fn write_line(file: &mut File, line: &[u8], sync: bool) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.flush().await?;
    if sync {
        file.sync_data().await?;
    }
    Ok(())
}

/// Cut the log back to `line_start` after a failed append, so a partial
/// line never sits in front of the next record.
async fn discard_partial_append(file: &File, path: &Path, line_start: u64) {
    match file.set_len(line_start).await {
        Ok(()) => warn!(path = %path.display(), line_start, "discarded partial append"),
        Err(e) => error!(
            path = %path.display(),
            line_start,
            error = %e,
            "could not discard partial append, log may hold a torn line"
        ),
    }
}

fn sink_error(action: &str, path: &Path, e: std::io::Error) -> Error {
    Error::Sink(format!("{action} {}: {e}", path.display()))
}

/// Cut the file back to just after its last `\n`.
async fn repair_torn_tail(file: &mut File, path: &Path) -> Result<()> {
    let len = file
        .metadata()
        .await
        .map_err(|e| sink_error("reading event log metadata", path, e))?
        .len();
    if len == 0 {
        return Ok(());
    }

    let mut end = len;
    let mut buf = vec![0u8; SCAN_CHUNK];
    let keep = loop {
        if end == 0 {
            break 0;
        }
        let start = end.saturating_sub(SCAN_CHUNK as u64);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|e| sink_error("seeking event log", path, e))?;
        file.read_exact(chunk)
            .await
            .map_err(|e| sink_error("reading event log", path, e))?;
        if let Some(pos) = chunk.iter().rposition(|&b| b == b'\n') {
            break start + pos as u64 + 1;
        }
        end = start;
    };

    if keep == len {
        debug!(path = %path.display(), bytes = len, "event log tail intact");
        return Ok(());
    }
    warn!(
        path = %path.display(),
        discarded_bytes = len - keep,
        "event log ended in a partial line, truncating it"
    );
    file.set_len(keep)
        .await
        .map_err(|e| sink_error("truncating event log", path, e))?;
    Ok(())
}
