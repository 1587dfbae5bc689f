//! Consolidated test utilities for the Thames Water to InfluxDB2 forwarder.
//!
//! This module provides shared configuration builders, payload fixtures
//! and a mock portal server used across the test suite.

#![cfg(test)]

pub mod config;
pub mod fixtures;
pub mod portal;
