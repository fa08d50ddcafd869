//! Gatehouse - Multi-Tier Request Admission Control
//!
//! This crate decides, for every inbound request, whether it may proceed.
//! A process-wide fixed-window ceiling is checked first, then a per-caller
//! policy (token bucket or fixed window) selected by route. Requests over
//! capacity wait in a bounded FIFO queue or are refused with a structured
//! 429 response. The `gatehouse` binary hosts the pipeline as an HTTP
//! gateway in front of a downstream service.

pub mod admission;
pub mod config;
pub mod error;
pub mod gateway;
