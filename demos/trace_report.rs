//! Render or summarize per-thread trace dumps.
//!
//! Usage:
//!   cargo run --example trace_report -- [--format FORMAT] [--max-load N] [--offset N] <files...>
//!
//! Formats:
//!   echarts  – JSON array with one scatter series per file (default)
//!   csv      – tid,event,cid,us
//!   ms-csv   – tid,event,cid,ms,us
//!   jsonl    – one JSON record per line
//!   summary  – latency and per-thread statistics over all files

use clap::{Parser, ValueEnum};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use wrk_trace::trace::analysis::{
    self, DEFAULT_MAX_LOAD, LoadLimits, TraceReader, echarts_series,
};

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Echarts,
    Csv,
    MsCsv,
    Jsonl,
    Summary,
}

#[derive(Parser)]
#[command(about = "Render wrk-thread<N>.trace dumps")]
struct Args {
    #[arg(long, value_enum, default_value = "echarts")]
    format: Format,

    #[arg(long, default_value_t = DEFAULT_MAX_LOAD, help = "Records to load per file (0 = all)")]
    max_load: usize,

    #[arg(long, default_value_t = 0, help = "Records to skip at the start of each file")]
    offset: usize,

    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let limits = if args.max_load == 0 {
        LoadLimits {
            max_records: None,
            offset: args.offset,
        }
    } else {
        LoadLimits::new(args.max_load, args.offset)
    };

    let mut out = BufWriter::new(std::io::stdout().lock());
    let mut series = Vec::new();
    let mut all = Vec::new();

    for file in &args.files {
        let mut reader = match TraceReader::open(file) {
            Ok(reader) => reader,
            Err(e) => {
                eprintln!("{}: {e}", file.display());
                std::process::exit(1);
            }
        };
        let header = reader.header();
        eprintln!(
            "{}: v{}, {} records",
            file.display(),
            header.version,
            header.record_count
        );
        let records = reader.read_records(limits)?;

        match args.format {
            Format::Echarts => {
                let name = file.display().to_string();
                series.push(echarts_series(&records, Some(&name)));
            }
            Format::Csv => analysis::write_csv(&mut out, &records)?,
            Format::MsCsv => analysis::write_ms_csv(&mut out, &records)?,
            Format::Jsonl => analysis::write_jsonl(&mut out, &records)?,
            Format::Summary => all.extend(records),
        }
    }

    match args.format {
        Format::Echarts => {
            serde_json::to_writer(&mut out, &series).map_err(std::io::Error::other)?;
            out.write_all(b"\n")?;
        }
        Format::Summary => {
            drop(out);
            analysis::print_analysis(&analysis::analyze(&all));
            return Ok(());
        }
        Format::Csv | Format::MsCsv | Format::Jsonl => {}
    }
    out.flush()
}
