#![doc = include_str!("../README.md")]

pub mod trace;

pub use trace::{
    DumpOutcome, LoadLimits, TraceAnalysis, TraceBuffer, TraceEvent, TraceReader, TraceRecord,
    TraceSession, TraceSessionBuilder, analyze, dump, load_traces, print_analysis,
    trace_file_name,
};
