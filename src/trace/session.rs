use crate::trace::buffer::{DEFAULT_BUFFER_BYTES, TraceBuffer};
use crate::trace::clock;
use crate::trace::writer::{self, DEFAULT_FILE_PREFIX, DumpOutcome};
use std::fs;
use std::path::{Path, PathBuf};

/// One traced run: the shared epoch and where the per-thread dumps go.
///
/// Worker threads get their buffer from [`open_thread`](Self::open_thread)
/// and keep it to themselves while recording. At shutdown each buffer is
/// handed back to [`finish`](Self::finish), which normalizes it against the
/// run start and dumps it. `finish` consumes the buffer and skips buffers
/// that were already normalized, so each dump is normalized exactly once.
#[derive(Debug, Clone)]
pub struct TraceSession {
    output_dir: PathBuf,
    file_prefix: String,
    buffer_bytes: usize,
    start_us: u64,
}

impl TraceSession {
    pub fn builder() -> TraceSessionBuilder {
        TraceSessionBuilder {
            output_dir: PathBuf::from("."),
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            buffer_bytes: DEFAULT_BUFFER_BYTES,
            start_us: None,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn file_prefix(&self) -> &str {
        &self.file_prefix
    }

    pub fn buffer_bytes(&self) -> usize {
        self.buffer_bytes
    }

    /// Run start in absolute microseconds. Dumped timestamps are relative to it.
    pub fn start_us(&self) -> u64 {
        self.start_us
    }

    pub fn path_for(&self, thread_id: u8) -> PathBuf {
        writer::trace_path(&self.output_dir, &self.file_prefix, thread_id)
    }

    /// Allocate the buffer for one worker thread.
    ///
    /// # Panics
    /// If the buffer cannot be allocated.
    pub fn open_thread(&self, thread_id: u8) -> TraceBuffer {
        TraceBuffer::with_budget(thread_id, self.buffer_bytes)
    }

    /// Normalize `buffer` against the run start and dump it.
    ///
    /// A buffer the caller already normalized is dumped as is.
    ///
    /// Never panics and never returns an error: open failures come back as
    /// `Skipped`, write failures as `Failed`, both logged.
    pub fn finish(&self, mut buffer: TraceBuffer) -> DumpOutcome {
        let path = self.path_for(buffer.thread_id());
        if buffer.is_normalized() {
            tracing::warn!(
                path = %path.display(),
                "trace buffer already normalized, dumping without rebasing"
            );
        } else {
            buffer.normalize(self.start_us);
        }
        match writer::dump(&buffer, &path) {
            Ok(outcome) => {
                if let DumpOutcome::Written {
                    records, dropped, ..
                } = &outcome
                {
                    tracing::debug!(
                        path = %path.display(),
                        records,
                        dropped,
                        "trace dumped"
                    );
                }
                outcome
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to write trace");
                DumpOutcome::Failed { path }
            }
        }
    }

    /// Finish every buffer. A failed dump does not stop the rest.
    pub fn finish_all(&self, buffers: impl IntoIterator<Item = TraceBuffer>) -> Vec<DumpOutcome> {
        buffers
            .into_iter()
            .map(|buffer| self.finish(buffer))
            .collect()
    }
}

pub struct TraceSessionBuilder {
    output_dir: PathBuf,
    file_prefix: String,
    buffer_bytes: usize,
    start_us: Option<u64>,
}

impl TraceSessionBuilder {
    /// Directory for the dumps. Created by [`build`](Self::build) if missing.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }

    /// Per-thread buffer budget in bytes. Capacity is `bytes / 8` records.
    pub fn with_buffer_bytes(mut self, bytes: usize) -> Self {
        self.buffer_bytes = bytes;
        self
    }

    /// Fix the run start instead of reading the clock at `build`.
    pub fn with_start_us(mut self, start_us: u64) -> Self {
        self.start_us = Some(start_us);
        self
    }

    pub fn build(self) -> std::io::Result<TraceSession> {
        fs::create_dir_all(&self.output_dir)?;
        Ok(TraceSession {
            output_dir: self.output_dir,
            file_prefix: self.file_prefix,
            buffer_bytes: self.buffer_bytes,
            start_us: self.start_us.unwrap_or_else(clock::now_us),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::analysis::{LoadLimits, TraceReader};
    use crate::trace::events::{TraceEvent, TraceRecord};
    use tempfile::TempDir;

    fn session(dir: &Path, start_us: u64) -> TraceSession {
        TraceSession::builder()
            .with_output_dir(dir)
            .with_buffer_bytes(5 * 8)
            .with_start_us(start_us)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_defaults() {
        let session = TraceSession::builder().build().unwrap();
        assert_eq!(session.output_dir(), Path::new("."));
        assert_eq!(session.file_prefix(), "wrk-thread");
        assert_eq!(session.buffer_bytes(), 16 * 1024 * 1024);
        assert!(session.start_us() > 0);
        assert_eq!(session.path_for(4), PathBuf::from("./wrk-thread4.trace"));
    }

    #[test]
    fn test_build_creates_output_dir() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("a").join("b");
        let session = TraceSession::builder().with_output_dir(&out).build().unwrap();
        assert!(out.is_dir());
        assert_eq!(session.output_dir(), out);
    }

    #[test]
    fn test_open_thread_uses_budget() {
        let dir = TempDir::new().unwrap();
        let buffer = session(dir.path(), 0).open_thread(3);
        assert_eq!(buffer.thread_id(), 3);
        assert_eq!(buffer.capacity(), 5);
    }

    #[test]
    fn test_finish_normalizes_once_and_dumps() {
        let dir = TempDir::new().unwrap();
        let session = session(dir.path(), 900);
        let mut buffer = session.open_thread(2);
        buffer.request_sent(42, 1000);
        buffer.response_received(42, 1500);

        let outcome = session.finish(buffer);
        assert!(outcome.is_written());
        assert_eq!(outcome.path(), session.path_for(2));

        let mut reader = TraceReader::open(outcome.path()).unwrap();
        let records = reader.read_records(LoadLimits::all()).unwrap();
        assert_eq!(
            records,
            vec![
                TraceRecord::new(2, TraceEvent::RequestSent, 42, 100),
                TraceRecord::new(2, TraceEvent::ResponseReceived, 42, 600),
            ]
        );
    }

    #[test]
    fn test_finish_keeps_prenormalized_buffer() {
        let dir = TempDir::new().unwrap();
        let session = session(dir.path(), 900);
        let mut buffer = session.open_thread(1);
        buffer.request_sent(42, 1000);
        buffer.normalize(session.start_us());
        assert!(buffer.is_normalized());

        let outcome = session.finish(buffer);
        let records = TraceReader::open(outcome.path())
            .unwrap()
            .read_records(LoadLimits::all())
            .unwrap();
        assert_eq!(
            records,
            vec![TraceRecord::new(1, TraceEvent::RequestSent, 42, 100)]
        );
    }

    #[test]
    fn test_custom_prefix() {
        let dir = TempDir::new().unwrap();
        let session = TraceSession::builder()
            .with_output_dir(dir.path())
            .with_file_prefix("bench-")
            .with_buffer_bytes(64)
            .build()
            .unwrap();
        let outcome = session.finish(session.open_thread(11));
        assert_eq!(outcome.path(), dir.path().join("bench-11.trace"));
        assert!(outcome.path().exists());
    }

    #[test]
    fn test_finish_all_isolates_failures() {
        let dir = TempDir::new().unwrap();
        let session = session(dir.path(), 0);
        // A directory squatting on thread 1's file name makes its open fail.
        fs::create_dir(session.path_for(1)).unwrap();

        let buffers = (0..3).map(|tid| {
            let mut b = session.open_thread(tid);
            b.loop_start(10);
            b
        });
        let outcomes = session.finish_all(buffers.collect::<Vec<_>>());

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_written());
        assert!(!outcomes[1].is_written());
        assert!(outcomes[2].is_written());
        assert!(session.path_for(0).is_file());
        assert!(session.path_for(2).is_file());
    }

    #[test]
    fn test_session_is_shareable_across_threads() {
        let dir = TempDir::new().unwrap();
        let session = session(dir.path(), 0);
        let handles: Vec<_> = (0..4u8)
            .map(|tid| {
                let session = session.clone();
                std::thread::spawn(move || {
                    let mut buffer = session.open_thread(tid);
                    buffer.connection_start(tid as usize, 1);
                    buffer.connected(tid as usize, 2);
                    session.finish(buffer)
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap().is_written());
        }
    }
}
