//! Scenario tests
//!
//! - Adapter behaviour against a scripted engine (`adapter`)
//! - End-to-end conversion through libswresample (`e2e`)

pub mod fixtures;
