pub mod analysis;
pub mod buffer;
pub mod clock;
pub mod events;
pub mod format;
pub mod session;
pub mod writer;

pub use analysis::{
    LatencyStats, LoadLimits, ThreadStats, TraceAnalysis, TraceReader, analyze, load_traces,
    print_analysis,
};
pub use buffer::{DEFAULT_BUFFER_BYTES, TraceBuffer};
pub use events::{TraceEvent, TraceRecord};
pub use session::{TraceSession, TraceSessionBuilder};
pub use writer::{DumpOutcome, dump, trace_file_name, trace_path};
