use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead as _, BufReader, Read as _, Seek as _, SeekFrom, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Deserialize;

use crate::error::SinkError;
use crate::formats::NormalizedRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Written,
    /// Skipped because a record with the same RPC is already in the log.
    Duplicate,
}

pub trait RecordSink: Send + Sync {
    fn append(&self, record: &NormalizedRecord) -> Result<AppendOutcome, SinkError>;
}

/// Append-only JSON Lines log. One record per line, UTF-8, no enclosing array.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    state: Mutex<SinkState>,
}

#[derive(Debug)]
struct SinkState {
    file: File,
    len: u64,
    seen: Option<HashSet<String>>,
    /// Next append writes only this many bytes, then fails.
    #[cfg(test)]
    short_write: Option<usize>,
}

impl SinkState {
    fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        #[cfg(test)]
        if let Some(limit) = self.short_write.take() {
            self.file.write_all(&line[..limit.min(line.len())])?;
            return Err(std::io::Error::other("short write"));
        }
        self.file.write_all(line)?;
        self.file.flush()
    }
}

#[derive(Deserialize)]
struct RpcOnly {
    #[serde(rename = "RPC", default)]
    rpc: String,
}

impl JsonlSink {
    /// Opens (or creates) the log. A trailing partial line left by an
    /// interrupted run is cut off. With `dedupe`, RPCs already in the file
    /// are loaded so later appends of the same product are skipped.
    pub fn open(path: impl Into<PathBuf>, dedupe: bool) -> Result<Self, SinkError> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| io_err("create dir", parent, source))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|source| io_err("open", &path, source))?;

        let len = truncate_partial_tail(&mut file).map_err(|source| io_err("repair", &path, source))?;
        let seen = if dedupe {
            Some(load_rpcs(&mut file).map_err(|source| io_err("read", &path, source))?)
        } else {
            None
        };

        tracing::debug!(path = %path.display(), len, dedupe, "opened record log");
        Ok(Self {
            path,
            state: Mutex::new(SinkState {
                file,
                len,
                seen,
                #[cfg(test)]
                short_write: None,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for JsonlSink {
    fn append(&self, record: &NormalizedRecord) -> Result<AppendOutcome, SinkError> {
        let mut line = serde_json::to_vec(record).map_err(|source| SinkError::Encode {
            rpc: record.rpc.clone(),
            source,
        })?;
        line.push(b'\n');

        let mut guard = self.state.lock().map_err(|_| SinkError::Poisoned)?;
        let state = &mut *guard;

        if let Some(seen) = &state.seen
            && !record.rpc.is_empty()
            && seen.contains(&record.rpc)
        {
            return Ok(AppendOutcome::Duplicate);
        }

        let before = state.len;
        if let Err(source) = state.write_line(&line) {
            if let Err(err) = state.file.set_len(before) {
                tracing::error!(path = %self.path.display(), ?err, "failed to roll back partial record");
            }
            return Err(io_err("append to", &self.path, source));
        }
        state.len = before + line.len() as u64;

        if let Some(seen) = state.seen.as_mut()
            && !record.rpc.is_empty()
        {
            seen.insert(record.rpc.clone());
        }
        Ok(AppendOutcome::Written)
    }
}

fn io_err(action: &'static str, path: &Path, source: std::io::Error) -> SinkError {
    SinkError::Io {
        action,
        path: path.display().to_string(),
        source,
    }
}

/// Returns the length of the file after dropping any bytes past the last newline.
fn truncate_partial_tail(file: &mut File) -> std::io::Result<u64> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(0);
    }

    let mut last = [0_u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(len);
    }

    let mut contents = Vec::with_capacity(len as usize);
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut contents)?;
    let keep = contents
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |pos| pos as u64 + 1);
    tracing::warn!(dropped_bytes = len - keep, "truncating partial trailing record");
    file.set_len(keep)?;
    Ok(keep)
}

fn load_rpcs(file: &mut File) -> std::io::Result<HashSet<String>> {
    file.seek(SeekFrom::Start(0))?;
    let mut seen = HashSet::new();
    for line in BufReader::new(&*file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RpcOnly>(&line) {
            Ok(RpcOnly { rpc }) if !rpc.is_empty() => {
                seen.insert(rpc);
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(?err, "skipping unreadable line in record log"),
        }
    }
    Ok(seen)
}
