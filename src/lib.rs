// Schema sync engine - core library module.
//
// A read-only drift observer between a SQL Server database and a local
// folder of `.sql` project files. See `sync::engine` for the top-level
// wiring of workers, orchestrator, and realtime publisher.

pub mod error;
pub mod sync;

pub use error::{Result, SyncError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
