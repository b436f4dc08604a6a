use crate::trace::events::{TraceEvent, TraceRecord};
use crate::trace::format::RECORD_SIZE;

/// Default per-thread budget: 16 MiB of records.
pub const DEFAULT_BUFFER_BYTES: usize = 4096 * 4096;

/// Fixed-capacity, append-only event buffer owned by one worker thread.
///
/// All storage is allocated and zeroed up front by [`TraceBuffer::open`];
/// recording never allocates, locks or fails. Once the buffer is full,
/// further events are dropped and only counted.
///
/// The buffer is `Send` so it can be handed to whatever finishes the run,
/// but recording takes `&mut self`: there is exactly one writer, the thread
/// that holds it.
#[derive(Debug)]
pub struct TraceBuffer {
    thread_id: u8,
    records: Box<[TraceRecord]>,
    count: usize,
    dropped: u64,
    normalized: bool,
}

fn capacity_for(budget_bytes: usize) -> usize {
    (budget_bytes / RECORD_SIZE).min(u32::MAX as usize)
}

impl TraceBuffer {
    /// Allocate a buffer with the default 16 MiB budget.
    ///
    /// # Panics
    /// If the allocation fails.
    pub fn open(thread_id: u8) -> Self {
        Self::with_budget(thread_id, DEFAULT_BUFFER_BYTES)
    }

    /// Allocate a buffer holding `budget_bytes / RECORD_SIZE` records, at
    /// most `u32::MAX` since the dump header counts records in 32 bits.
    ///
    /// # Panics
    /// If the allocation fails.
    pub fn with_budget(thread_id: u8, budget_bytes: usize) -> Self {
        let capacity = capacity_for(budget_bytes);
        let records = match bytemuck::allocation::try_zeroed_slice_box::<TraceRecord>(capacity) {
            Ok(records) => records,
            Err(()) => panic!(
                "failed to allocate {budget_bytes} byte trace buffer for thread {thread_id}"
            ),
        };
        Self {
            thread_id,
            records,
            count: 0,
            dropped: 0,
            normalized: false,
        }
    }

    pub fn thread_id(&self) -> u8 {
        self.thread_id
    }

    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count >= self.records.len()
    }

    /// Events refused because the buffer was full. Not persisted.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    /// The recorded events, in append order.
    pub fn records(&self) -> &[TraceRecord] {
        &self.records[..self.count]
    }

    /// Record one event. `timestamp_us` is truncated to 32 bits.
    ///
    /// Drops the event when the buffer is full.
    #[inline]
    pub fn append(&mut self, event: TraceEvent, correlation_id: u16, timestamp_us: u64) {
        if let Some(slot) = self.records.get_mut(self.count) {
            *slot = TraceRecord::new(self.thread_id, event, correlation_id, timestamp_us as u32);
            self.count += 1;
        } else {
            self.dropped += 1;
        }
    }

    #[inline]
    pub fn request_sent(&mut self, connection: usize, timestamp_us: u64) {
        self.append(TraceEvent::RequestSent, connection as u16, timestamp_us);
    }

    #[inline]
    pub fn response_received(&mut self, connection: usize, timestamp_us: u64) {
        self.append(TraceEvent::ResponseReceived, connection as u16, timestamp_us);
    }

    #[inline]
    pub fn connection_start(&mut self, connection: usize, timestamp_us: u64) {
        self.append(TraceEvent::ConnectionStart, connection as u16, timestamp_us);
    }

    #[inline]
    pub fn connected(&mut self, connection: usize, timestamp_us: u64) {
        self.append(TraceEvent::Connected, connection as u16, timestamp_us);
    }

    #[inline]
    pub fn loop_start(&mut self, timestamp_us: u64) {
        self.append(TraceEvent::LoopStart, 0, timestamp_us);
    }

    /// `timeout` is the poll timeout passed to the readiness wait, in ms.
    /// Negative values (wait forever) are stored as their low 16 bits.
    #[inline]
    pub fn poll_wait(&mut self, timeout: i32, timestamp_us: u64) {
        self.append(TraceEvent::PollWait, timeout as u16, timestamp_us);
    }

    /// `ret` is the readiness wait's return value (ready count, or -1).
    #[inline]
    pub fn poll_wake(&mut self, ret: i32, timestamp_us: u64) {
        self.append(TraceEvent::PollWake, ret as u16, timestamp_us);
    }

    #[inline]
    pub fn delay_request_front_end(&mut self, connection: usize, timestamp_us: u64) {
        self.append(TraceEvent::DelayRequestFrontEnd, connection as u16, timestamp_us);
    }

    #[inline]
    pub fn delay_request_tail_end(&mut self, connection: usize, timestamp_us: u64) {
        self.append(TraceEvent::DelayRequestTailEnd, connection as u16, timestamp_us);
    }

    #[inline]
    pub fn expect_request_front_end(&mut self, connection: usize, timestamp_us: u64) {
        self.append(TraceEvent::ExpectRequestFrontEnd, connection as u16, timestamp_us);
    }

    #[inline]
    pub fn expect_request_tail_end(&mut self, connection: usize, timestamp_us: u64) {
        self.append(TraceEvent::ExpectRequestTailEnd, connection as u16, timestamp_us);
    }

    /// Rewrite every recorded timestamp relative to `start_us` (truncated to
    /// 32 bits, like the recorded values).
    ///
    /// Subtraction wraps: a record older than `start_us` ends up near
    /// `u32::MAX` rather than being clamped. This is a one-shot operation;
    /// calling it again subtracts `start_us` a second time.
    pub fn normalize(&mut self, start_us: u64) {
        let start_us = start_us as u32;
        for rec in &mut self.records[..self.count] {
            rec.timestamp_us = rec.timestamp_us.wrapping_sub(start_us);
        }
        self.normalized = true;
    }
}
