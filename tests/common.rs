use std::path::Path;
use wrk_trace::{TraceBuffer, TraceEvent, TraceSession};

/// A session writing into `dir` with a fixed start and a small buffer.
pub fn session_in(dir: &Path, start_us: u64, buffer_bytes: usize) -> TraceSession {
    TraceSession::builder()
        .with_output_dir(dir)
        .with_start_us(start_us)
        .with_buffer_bytes(buffer_bytes)
        .build()
        .unwrap()
}

/// Record `requests` request/response pairs on `connection`, one every
/// `step_us`, with responses arriving `latency_us` after each request.
#[allow(dead_code)]
pub fn record_exchanges(
    trace: &mut TraceBuffer,
    connection: usize,
    base_us: u64,
    requests: usize,
    step_us: u64,
    latency_us: u64,
) {
    for i in 0..requests as u64 {
        let sent = base_us + i * step_us;
        trace.request_sent(connection, sent);
        trace.response_received(connection, sent + latency_us);
    }
}

/// Raw bytes of a dumped file, decoded as `(version, count)` plus each
/// record's `(tid, event, cid, us)`.
#[allow(dead_code)]
pub fn decode_file(path: &Path) -> (i32, u32, Vec<(u8, u8, u16, u32)>) {
    let bytes = std::fs::read(path).unwrap();
    let version = i32::from_ne_bytes(bytes[0..4].try_into().unwrap());
    let count = u32::from_ne_bytes(bytes[4..8].try_into().unwrap());
    let records = bytes[8..]
        .chunks_exact(8)
        .take(count as usize)
        .map(|r| {
            (
                r[0],
                r[1],
                u16::from_ne_bytes([r[2], r[3]]),
                u32::from_ne_bytes(r[4..8].try_into().unwrap()),
            )
        })
        .collect();
    (version, count, records)
}

#[allow(dead_code)]
pub fn ordinal(event: TraceEvent) -> u8 {
    event.ordinal()
}
