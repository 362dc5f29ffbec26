//! Alert detection and delivery pipeline.
//!
//! The [`scheduler::Scheduler`] drives one cycle at a time:
//! analyzer → cooldown → preferences → dispatcher → history.

pub mod analyzer;
pub mod cooldown;
pub mod devices;
pub mod dispatcher;
pub mod history;
pub mod pg_store;
pub mod preferences;
pub mod scheduler;
pub mod store;

#[cfg(test)]
mod testing;
