use bytemuck::{Pod, Zeroable};
use serde::Serialize;

/// Kinds of events recorded by a worker thread.
///
/// The discriminants are the on-disk ordinals. They are part of the dump
/// format: never renumber or reuse one, append new kinds at the end.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceEvent {
    RequestSent = 0,
    ResponseReceived = 1,
    ConnectionStart = 2,
    Connected = 3,
    LoopStart = 4,
    PollWait = 5,
    PollWake = 6,
    DelayRequestFrontEnd = 7,
    DelayRequestTailEnd = 8,
    ExpectRequestFrontEnd = 9,
    /// Reserved. No call site emits it, but the ordinal stays taken.
    ExpectRequestTailEnd = 10,
}

impl TraceEvent {
    pub const ALL: [TraceEvent; 11] = [
        TraceEvent::RequestSent,
        TraceEvent::ResponseReceived,
        TraceEvent::ConnectionStart,
        TraceEvent::Connected,
        TraceEvent::LoopStart,
        TraceEvent::PollWait,
        TraceEvent::PollWake,
        TraceEvent::DelayRequestFrontEnd,
        TraceEvent::DelayRequestTailEnd,
        TraceEvent::ExpectRequestFrontEnd,
        TraceEvent::ExpectRequestTailEnd,
    ];

    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// Name used by the text renderings (CSV, summaries).
    pub const fn name(self) -> &'static str {
        match self {
            TraceEvent::RequestSent => "REQUEST_SENT",
            TraceEvent::ResponseReceived => "RESPONSE_RECEIVED",
            TraceEvent::ConnectionStart => "CONNECTION_START",
            TraceEvent::Connected => "CONNECTED",
            TraceEvent::LoopStart => "LOOP_START",
            TraceEvent::PollWait => "POLL_WAIT",
            TraceEvent::PollWake => "POLL_WAKE",
            TraceEvent::DelayRequestFrontEnd => "DELAY_REQUEST_FRONT_END",
            TraceEvent::DelayRequestTailEnd => "DELAY_REQUEST_TAIL_END",
            TraceEvent::ExpectRequestFrontEnd => "EXPECT_REQUEST_FRONT_END",
            TraceEvent::ExpectRequestTailEnd => "EXPECT_REQUEST_TAIL_END",
        }
    }
}

impl TryFrom<u8> for TraceEvent {
    type Error = u8;

    /// Unknown ordinals are handed back as the error value.
    fn try_from(ordinal: u8) -> Result<Self, Self::Error> {
        TraceEvent::ALL
            .get(ordinal as usize)
            .copied()
            .ok_or(ordinal)
    }
}

impl std::fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One recorded event. 8 bytes, no padding, same layout in memory and on disk.
///
/// `correlation_id` depends on the event: the connection slot for connection
/// and request events, the poll timeout for `PollWait`, the poll return value
/// for `PollWake`, and 0 for `LoopStart`.
///
/// `timestamp_us` holds absolute microseconds truncated to 32 bits until the
/// buffer is normalized, after which it is relative to the run start. The
/// absolute value wraps every ~71.6 minutes; normalization subtracts with
/// wrapping arithmetic, so relative values stay correct for runs shorter
/// than that.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable, Serialize)]
pub struct TraceRecord {
    #[serde(rename = "tid")]
    pub thread_id: u8,
    pub event: u8,
    #[serde(rename = "cid")]
    pub correlation_id: u16,
    #[serde(rename = "us")]
    pub timestamp_us: u32,
}

const _: () = assert!(std::mem::size_of::<TraceRecord>() == 8);

impl TraceRecord {
    #[inline]
    pub const fn new(
        thread_id: u8,
        event: TraceEvent,
        correlation_id: u16,
        timestamp_us: u32,
    ) -> Self {
        Self {
            thread_id,
            event: event as u8,
            correlation_id,
            timestamp_us,
        }
    }

    /// The event kind, or `None` if the ordinal is not one this build knows.
    pub fn event(&self) -> Option<TraceEvent> {
        TraceEvent::try_from(self.event).ok()
    }
}
