pub mod orchestrator;
pub mod progress;
pub mod suite;

pub use orchestrator::{classify, BenchOptions, BenchmarkOutcome, JobSummary, Orchestrator};
pub use progress::{format_progress_line, ProgressEvent, ProgressSink};
pub use suite::{BenchmarkSuite, SuitePrompt};
