pub mod classifier;
pub mod command;
pub mod config;
pub mod error;
pub mod logs;
pub mod markers;
pub mod registry;
pub mod scheduler;
pub mod shutdown;
pub mod waiter;
pub mod worker;
