//! Shared configuration, storage bootstrap, error and domain types for Nimbus.

pub mod config;
pub mod db;
pub mod error;
pub mod redis_pool;
pub mod types;
