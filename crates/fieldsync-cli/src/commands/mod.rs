pub mod common;
pub mod completions;
pub mod customer;
pub mod job;
pub mod queue;
pub mod sync;
pub mod watch;
pub mod worker;
