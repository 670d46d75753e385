pub mod adapters;
pub mod bench;
pub mod config;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod redaction;
pub mod report;
pub mod routing;
pub mod storage;

pub use adapters::{Adapter, AdapterRegistry};
pub use bench::{BenchOptions, BenchmarkSuite, Orchestrator};
pub use config::MrbenchConfig;
pub use error::{MrbenchError, Result};
pub use routing::{Router, RoutingConstraints, RoutingPolicy};
pub use storage::Store;
