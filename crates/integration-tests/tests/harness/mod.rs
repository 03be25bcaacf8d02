//! Shared fixtures for integration tests
//!
//! Each test binary compiles this module on its own and uses a subset of it.

#![allow(dead_code)]

pub mod config;
pub mod mock_provider;
