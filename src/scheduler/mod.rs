pub mod adapter;
pub mod lsf;
pub mod throttle;

pub use adapter::{ExternalId, QueueSnapshot, SchedulerAdapter};
pub use lsf::LsfAdapter;
pub use throttle::SubmissionThrottle;
