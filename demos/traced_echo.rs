//! A small wrk-style load generator with tracing enabled.
//!
//! An echo server runs on its own thread. Each worker thread owns a
//! current-thread runtime, a set of connections and its own `TraceBuffer`;
//! nothing is shared between workers. Every round the worker records a loop
//! start, then each connection sends a request and waits for the echo. At
//! the end the buffers are handed to the session, which writes
//! `wrk-thread<N>.trace` per worker.
//!
//! Usage:
//!   cargo run --example traced_echo -- [--threads 2] [--connections 8] [--duration-secs 3]
//!   cargo run --example trace_report -- --format summary traces/wrk-thread*.trace

use clap::Parser;
use std::cell::RefCell;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wrk_trace::trace::clock;
use wrk_trace::{DumpOutcome, TraceBuffer, TraceSession};

const REQUEST: &[u8] = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
const READ_TIMEOUT_MS: i32 = 1000;

#[derive(Parser)]
#[command(about = "Traced echo load generator")]
struct Args {
    #[arg(long, default_value = "2", help = "Worker threads")]
    threads: u8,

    #[arg(long, default_value = "8", help = "Connections per worker")]
    connections: usize,

    #[arg(long, default_value = "3", help = "Run duration in seconds")]
    duration_secs: u64,

    #[arg(
        long,
        default_value = "0",
        help = "Delay before each request in microseconds (0 = send immediately)"
    )]
    request_delay_us: u64,

    #[arg(long, default_value = "traces", help = "Directory for the trace dumps")]
    out_dir: PathBuf,

    #[arg(long, default_value = "16", help = "Trace buffer per worker, in MiB")]
    buffer_mib: usize,
}

#[derive(Clone, Copy)]
struct WorkerConfig {
    addr: SocketAddr,
    connections: usize,
    deadline: Instant,
    request_delay: Option<Duration>,
}

type SharedTrace = Rc<RefCell<TraceBuffer>>;

fn start_echo_server() -> io::Result<SocketAddr> {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::Builder::new()
        .name("echo-server".into())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            };
            rt.block_on(async move {
                let listener = match TcpListener::bind("127.0.0.1:0").await {
                    Ok(l) => l,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                };
                let _ = tx.send(listener.local_addr());
                loop {
                    let (mut sock, _) = match listener.accept().await {
                        Ok(c) => c,
                        Err(_) => break,
                    };
                    tokio::spawn(async move {
                        let mut buf = [0u8; 256];
                        loop {
                            let n = match sock.read(&mut buf).await {
                                Ok(0) | Err(_) => break,
                                Ok(n) => n,
                            };
                            if sock.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    });
                }
            });
        })?;
    rx.recv().map_err(io::Error::other)?
}

/// One request/response exchange on connection `cid`.
async fn exchange(
    cid: usize,
    mut stream: TcpStream,
    trace: SharedTrace,
    request_delay: Option<Duration>,
) -> io::Result<TcpStream> {
    if let Some(delay) = request_delay {
        trace.borrow_mut().delay_request_front_end(cid, clock::now_us());
        tokio::time::sleep(delay).await;
        trace.borrow_mut().delay_request_tail_end(cid, clock::now_us());
    }

    stream.write_all(REQUEST).await?;
    trace.borrow_mut().request_sent(cid, clock::now_us());

    let mut buf = [0u8; 256];
    let mut received = 0;
    while received < REQUEST.len() {
        trace
            .borrow_mut()
            .poll_wait(READ_TIMEOUT_MS, clock::now_us());
        let read = tokio::time::timeout(
            Duration::from_millis(READ_TIMEOUT_MS as u64),
            stream.read(&mut buf),
        )
        .await;
        let ret = match &read {
            Ok(Ok(_)) => 1,
            Ok(Err(_)) => -1,
            Err(_) => 0,
        };
        trace.borrow_mut().poll_wake(ret, clock::now_us());
        match read {
            Ok(Ok(0)) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(Ok(n)) => received += n,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(io::ErrorKind::TimedOut.into()),
        }
    }
    trace.borrow_mut().response_received(cid, clock::now_us());
    Ok(stream)
}

async fn drive(config: WorkerConfig, trace: SharedTrace) -> io::Result<usize> {
    let mut conns = Vec::with_capacity(config.connections);
    for cid in 0..config.connections {
        trace.borrow_mut().connection_start(cid, clock::now_us());
        let stream = TcpStream::connect(config.addr).await?;
        stream.set_nodelay(true)?;
        trace.borrow_mut().connected(cid, clock::now_us());
        conns.push(stream);
    }

    let mut requests = 0;
    while Instant::now() < config.deadline {
        trace.borrow_mut().loop_start(clock::now_us());
        let tasks: Vec<_> = conns
            .drain(..)
            .enumerate()
            .map(|(cid, stream)| {
                tokio::task::spawn_local(exchange(
                    cid,
                    stream,
                    trace.clone(),
                    config.request_delay,
                ))
            })
            .collect();
        for task in tasks {
            conns.push(task.await.map_err(io::Error::other)??);
            requests += 1;
        }
    }
    Ok(requests)
}

/// Run one worker to completion and hand back its trace.
///
/// The buffer is returned even when the worker fails, so its events up to
/// the failure still get dumped.
fn run_worker(thread_id: u8, trace: TraceBuffer, config: WorkerConfig) -> TraceBuffer {
    let trace: SharedTrace = Rc::new(RefCell::new(trace));
    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .and_then(|rt| {
            let local = tokio::task::LocalSet::new();
            local.block_on(&rt, drive(config, trace.clone()))
        });
    match result {
        Ok(requests) => eprintln!("worker {thread_id}: {requests} requests"),
        Err(e) => eprintln!("worker {thread_id} failed: {e}"),
    }

    match Rc::try_unwrap(trace) {
        Ok(cell) => cell.into_inner(),
        // A task still holds a clone; take the recorded buffer out of it.
        Err(shared) => shared.replace(TraceBuffer::with_budget(thread_id, 0)),
    }
}

fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let addr = start_echo_server()?;

    let session = TraceSession::builder()
        .with_output_dir(&args.out_dir)
        .with_buffer_bytes(args.buffer_mib * 1024 * 1024)
        .build()?;

    let config = WorkerConfig {
        addr,
        connections: args.connections,
        deadline: Instant::now() + Duration::from_secs(args.duration_secs),
        request_delay: (args.request_delay_us > 0)
            .then(|| Duration::from_micros(args.request_delay_us)),
    };

    let workers = (0..args.threads)
        .map(|thread_id| {
            let session = session.clone();
            std::thread::Builder::new()
                .name(format!("wrk-worker-{thread_id}"))
                .spawn(move || {
                    let trace = session.open_thread(thread_id);
                    run_worker(thread_id, trace, config)
                })
        })
        .collect::<io::Result<Vec<_>>>()?;

    let mut buffers = Vec::new();
    for (thread_id, worker) in workers.into_iter().enumerate() {
        match worker.join() {
            Ok(buffer) => buffers.push(buffer),
            Err(_) => eprintln!("worker {thread_id} panicked"),
        }
    }

    for outcome in session.finish_all(buffers) {
        match outcome {
            DumpOutcome::Written {
                path,
                records,
                dropped,
            } => println!("{}: {records} records, {dropped} dropped", path.display()),
            DumpOutcome::Skipped { path } | DumpOutcome::Failed { path } => {
                println!("{}: not written", path.display())
            }
        }
    }
    Ok(())
}
