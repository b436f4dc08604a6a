use crate::trace::buffer::TraceBuffer;
use crate::trace::format;
use std::fs::{File, OpenOptions};
use std::io::{Error, ErrorKind, Result};
use std::path::{Path, PathBuf};

pub const DEFAULT_FILE_PREFIX: &str = "wrk-thread";
pub const TRACE_FILE_EXTENSION: &str = "trace";

/// Result of a dump attempt that did not hit an I/O error while writing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpOutcome {
    Written {
        path: PathBuf,
        records: usize,
        /// Events the buffer refused because it was full.
        dropped: u64,
    },
    /// The file could not be opened; nothing was created or written.
    Skipped { path: PathBuf },
    /// Opened, but writing failed. The file may hold a partial dump.
    Failed { path: PathBuf },
}

impl DumpOutcome {
    pub fn path(&self) -> &Path {
        match self {
            DumpOutcome::Written { path, .. }
            | DumpOutcome::Skipped { path }
            | DumpOutcome::Failed { path } => path,
        }
    }

    pub fn is_written(&self) -> bool {
        matches!(self, DumpOutcome::Written { .. })
    }
}

/// `<prefix><thread_id>.trace`, e.g. `wrk-thread3.trace`.
pub fn trace_file_name(prefix: &str, thread_id: u8) -> String {
    format!("{prefix}{thread_id}.{TRACE_FILE_EXTENSION}")
}

pub fn trace_path(dir: &Path, prefix: &str, thread_id: u8) -> PathBuf {
    dir.join(trace_file_name(prefix, thread_id))
}

/// Create `path` exclusively, or reopen it read/write if it already exists.
///
/// The reopen neither truncates nor appends: the next write lands at offset
/// 0 and whatever lies past the new dump stays in the file. Any other open
/// error is returned as is.
pub fn open_trace_file(path: &Path) -> Result<File> {
    let mut create = OpenOptions::new();
    create.read(true).write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        create.mode(0o666);
    }
    match create.open(path) {
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            OpenOptions::new().read(true).write(true).open(path)
        }
        other => other,
    }
}

/// Write the header and every recorded event of `buffer` to `w`.
///
/// Two writes, no intermediate buffering: the header, then the whole record
/// slice.
pub fn write_trace(w: &mut impl std::io::Write, buffer: &TraceBuffer) -> Result<()> {
    let records = buffer.records();
    let count = u32::try_from(records.len()).map_err(|_| {
        Error::new(
            ErrorKind::InvalidInput,
            format!("{} records do not fit the trace header", records.len()),
        )
    })?;
    format::write_header(w, count)?;
    format::write_records(w, records)
}

/// Dump `buffer` to `path`.
///
/// Returns `Ok(Skipped)` when the file cannot be opened; the failure is
/// logged and nothing is created. Errors while writing an opened file are
/// returned.
pub fn dump(buffer: &TraceBuffer, path: &Path) -> Result<DumpOutcome> {
    let mut file = match open_trace_file(path) {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "cannot open trace file, skipping dump"
            );
            return Ok(DumpOutcome::Skipped {
                path: path.to_path_buf(),
            });
        }
    };
    write_trace(&mut file, buffer)?;
    Ok(DumpOutcome::Written {
        path: path.to_path_buf(),
        records: buffer.len(),
        dropped: buffer.dropped(),
    })
}
