//! Integration tests for conductor
//!
//! These tests drive the public API end to end: planning a request against
//! a scripted model backend, executing plans through the coordinator with
//! real or traced workers, and checking locks, blocking and timeouts.
//!
//! Run with: cargo test --test integration

mod fixtures;
mod planning;
mod scheduling;
mod timeouts;
