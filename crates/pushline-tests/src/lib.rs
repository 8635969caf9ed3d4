//! Integration tests for the pushline client
//!
//! End-to-end tests that exercise the full client against the scripted
//! in-process push server from `pushline_client::testing`:
//! - session handshake, rebind and teardown
//! - subscription control flow and data routing
//!
//! # Test Structure
//!
//! - `session_lifecycle_test.rs` - connect/bind/disconnect and terminal
//!   stream outcomes
//! - `subscription_flow_test.rs` - control requests, key assignment, update
//!   decode and listener delivery

// This crate only contains tests, no library code
