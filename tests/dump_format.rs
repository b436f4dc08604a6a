mod common;

use assert2::{check, let_assert};
use common::{decode_file, ordinal, session_in};
use wrk_trace::{DumpOutcome, LoadLimits, TraceEvent, TraceReader};

#[test]
fn request_and_response_dump_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let session = session_in(dir.path(), 1_000_000, 4096);

    let mut trace = session.open_thread(7);
    trace.request_sent(42, 1_000_100);
    trace.response_received(42, 1_000_600);
    let outcome = session.finish(trace);

    let_assert!(DumpOutcome::Written { path, records, dropped } = outcome);
    check!(records == 2);
    check!(dropped == 0);
    check!(path == dir.path().join("wrk-thread7.trace"));

    let (version, count, body) = decode_file(&path);
    check!(version == 2);
    check!(count == 2);
    check!(
        body == vec![
            (7, ordinal(TraceEvent::RequestSent), 42, 100),
            (7, ordinal(TraceEvent::ResponseReceived), 42, 600),
        ]
    );
    check!(std::fs::metadata(&path).unwrap().len() == 8 + 2 * 8);
}

#[test]
fn second_dump_overwrites_without_truncating() {
    let dir = tempfile::tempdir().unwrap();
    let session = session_in(dir.path(), 0, 4096);

    let mut first = session.open_thread(1);
    for i in 0..5 {
        first.loop_start(10 + i);
    }
    check!(session.finish(first).is_written());

    let mut second = session.open_thread(1);
    second.connection_start(3, 500);
    second.connected(3, 700);
    let outcome = session.finish(second);
    check!(outcome.is_written());

    // The header and the first two records come from the second run; the
    // stale tail of the first run is still on disk.
    let path = outcome.path();
    check!(std::fs::metadata(path).unwrap().len() == 8 + 5 * 8);
    let (_, count, body) = decode_file(path);
    check!(count == 2);
    check!(body[0] == (1, ordinal(TraceEvent::ConnectionStart), 3, 500));
    check!(body[1] == (1, ordinal(TraceEvent::Connected), 3, 700));

    // Readers go by the header.
    let records = TraceReader::open(path)
        .unwrap()
        .read_records(LoadLimits::all())
        .unwrap();
    check!(records.len() == 2);
}

#[test]
fn full_buffer_drops_extra_events() {
    let dir = tempfile::tempdir().unwrap();
    // Room for exactly four records.
    let session = session_in(dir.path(), 0, 32);

    let mut trace = session.open_thread(2);
    check!(trace.capacity() == 4);
    for i in 0..10 {
        trace.request_sent(1, i);
    }
    check!(trace.len() == 4);
    check!(trace.dropped() == 6);

    let_assert!(DumpOutcome::Written { path, records, dropped } = session.finish(trace));
    check!(records == 4);
    check!(dropped == 6);
    let (_, count, body) = decode_file(&path);
    check!(count == 4);
    let stamps: Vec<u32> = body.iter().map(|r| r.3).collect();
    check!(stamps == vec![0, 1, 2, 3]);
}

#[test]
fn empty_thread_writes_header_only() {
    let dir = tempfile::tempdir().unwrap();
    let session = session_in(dir.path(), 0, 4096);

    let outcome = session.finish(session.open_thread(0));
    check!(outcome.is_written());
    check!(std::fs::metadata(outcome.path()).unwrap().len() == 8);
    let (version, count, body) = decode_file(outcome.path());
    check!(version == 2);
    check!(count == 0);
    check!(body.is_empty());
}

#[test]
fn unopenable_path_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let session = session_in(dir.path(), 0, 4096);
    // A directory where the trace file should go makes the open fail.
    std::fs::create_dir(session.path_for(4)).unwrap();

    let mut trace = session.open_thread(4);
    trace.loop_start(1);
    let outcome = session.finish(trace);
    let_assert!(DumpOutcome::Skipped { .. } = outcome);
}

#[test]
fn small_timestamps_wrap_when_normalized() {
    let dir = tempfile::tempdir().unwrap();
    let session = session_in(dir.path(), 1000, 4096);

    let mut trace = session.open_thread(0);
    trace.loop_start(999);
    let outcome = session.finish(trace);
    let (_, _, body) = decode_file(outcome.path());
    check!(body[0].3 == u32::MAX);
}
