use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clue_core::ClueError;
use parking_lot::Mutex;
use time::macros::format_description;
use time::OffsetDateTime;

pub const UPLOAD_FIELD: &str = "uploadfile";
pub const MSG_MISSING_UPLOAD_FIELD: &str = "can not found `uploadfile` field";

/// Issues timestamp stems (`YYYYMMDDhhmmss.fffffffff`, trailing zeros trimmed).
///
/// Stems are strictly increasing: a clock reading at or before the last issued one is
/// bumped by one nanosecond.
#[derive(Debug)]
pub struct BlobNamer {
    last_nanos: Mutex<i128>,
}

impl Default for BlobNamer {
    fn default() -> Self {
        Self { last_nanos: Mutex::new(i128::MIN) }
    }
}

impl BlobNamer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// Returns [`ClueError::Io`] when the clock reading cannot be rendered.
    pub fn next_stem(&self) -> Result<String, ClueError> {
        let now = OffsetDateTime::now_utc().unix_timestamp_nanos();
        let nanos = {
            let mut last = self.last_nanos.lock();
            let next = if now > *last { now } else { last.saturating_add(1) };
            *last = next;
            next
        };
        let stamp = OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .map_err(|err| ClueError::io("upload clock", std::io::Error::other(err)))?;
        render_stem(stamp)
    }

    /// Stored name for `original_name`: a fresh stem plus the original extension.
    ///
    /// # Errors
    /// Returns [`ClueError::Io`] when the clock reading cannot be rendered.
    pub fn stored_name(&self, original_name: &str) -> Result<String, ClueError> {
        Ok(format!("{}{}", self.next_stem()?, extension(original_name)))
    }
}

fn render_stem(stamp: OffsetDateTime) -> Result<String, ClueError> {
    let seconds = stamp
        .format(format_description!("[year][month][day][hour][minute][second]"))
        .map_err(|err| ClueError::io("upload clock", std::io::Error::other(err)))?;
    let fraction = format!("{:09}", stamp.nanosecond());
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        Ok(seconds)
    } else {
        Ok(format!("{seconds}.{fraction}"))
    }
}

/// Final path component of a client-supplied file name.
#[must_use]
pub fn base_name(file_name: &str) -> &str {
    file_name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(file_name)
}

/// Extension of the final path component, dot included; empty when there is none.
#[must_use]
pub fn extension(file_name: &str) -> &str {
    let base = base_name(file_name);
    base.rfind('.').map_or("", |dot| &base[dot..])
}

/// Shared upload destination.
#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: PathBuf,
    namer: Arc<BlobNamer>,
}

impl BlobStore {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir, namer: Arc::new(BlobNamer::new()) }
    }

    #[must_use]
    pub fn begin(&self) -> BlobUpload {
        BlobUpload {
            store: self.clone(),
            written: Vec::new(),
            files: BTreeMap::new(),
            committed: false,
        }
    }
}

/// One upload request's batch of files.
///
/// Dropping a batch without [`BlobUpload::finish`] removes every file it created, so a
/// request that fails partway leaves nothing behind.
#[derive(Debug)]
pub struct BlobUpload {
    store: BlobStore,
    written: Vec<PathBuf>,
    files: BTreeMap<String, String>,
    committed: bool,
}

impl BlobUpload {
    /// Create the local file for one uploaded part, keyed by the final component of
    /// `original_name`.
    ///
    /// # Errors
    /// Returns [`ClueError::Io`] when the name cannot be generated or the file cannot be
    /// created.
    pub fn create(&mut self, original_name: &str) -> Result<BlobWriter, ClueError> {
        let stored = self.store.namer.stored_name(original_name)?;
        let path = self.store.dir.join(&stored);
        let file = open_new(&path).map_err(|err| ClueError::io(format!("create {stored}"), err))?;
        self.written.push(path);
        Ok(BlobWriter { original: base_name(original_name).to_string(), stored, file })
    }

    /// Flush `writer` and record its name mapping.
    ///
    /// # Errors
    /// Returns [`ClueError::Io`] when the final flush fails.
    pub fn complete(&mut self, mut writer: BlobWriter) -> Result<(), ClueError> {
        writer.file.flush().map_err(|err| ClueError::io(format!("write {}", writer.stored), err))?;
        self.files.insert(writer.original, writer.stored);
        Ok(())
    }

    /// Keep the written files and return the original-to-stored name mapping.
    ///
    /// # Errors
    /// Returns [`ClueError::InvalidInput`] when the request carried no upload part.
    pub fn finish(mut self) -> Result<BTreeMap<String, String>, ClueError> {
        if self.written.is_empty() {
            return Err(ClueError::invalid(MSG_MISSING_UPLOAD_FIELD));
        }
        self.committed = true;
        tracing::info!(files = self.files.len(), dir = %self.store.dir.display(), "stored upload batch");
        Ok(std::mem::take(&mut self.files))
    }
}

impl Drop for BlobUpload {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for path in &self.written {
            if let Err(err) = std::fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove partial upload");
            }
        }
        if !self.written.is_empty() {
            tracing::warn!(files = self.written.len(), "rolled back failed upload batch");
        }
    }
}

/// Open destination for one uploaded file. The handle closes on drop.
#[derive(Debug)]
pub struct BlobWriter {
    original: String,
    stored: String,
    file: File,
}

impl BlobWriter {
    #[must_use]
    pub fn stored_name(&self) -> &str {
        &self.stored
    }

    /// # Errors
    /// Returns [`ClueError::Io`] when the write fails.
    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), ClueError> {
        self.file.write_all(chunk).map_err(|err| ClueError::io(format!("write {}", self.stored), err))
    }
}

fn open_new(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o660);
    }
    options.open(path)
}
