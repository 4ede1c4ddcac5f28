// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Unit tests for the operator deployer
//!
//! This module contains unit tests for:
//! - The wait-for-condition primitive
//! - Manifest set construction, ordering and scope mutation
//! - Both installation strategies against an in-memory cluster
//! - Lifecycle state machine transitions
//! - The deployment registry, configuration loading and CLI parsing

#[path = "../common/mod.rs"]
mod common;

mod cli;
mod manifest_set;
mod wait;
