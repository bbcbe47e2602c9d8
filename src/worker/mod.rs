//! Worker-side execution.
//!
//! The scheduler launches `farm-dispatch exec --id <id> ...` on a farm host.
//! That process:
//!
//! 1. Writes the `started` marker
//! 2. Re-checks dependents' markers with a short bounded wait
//! 3. Runs `sh -c <payload>` with stdout/stderr captured to the job log
//! 4. Writes `passed` or `failed`
//!
//! The only channel back to the orchestrator is the marker directory.

pub mod harness;

pub use harness::{ExecutionResult, RemoteHarness};
