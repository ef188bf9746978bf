//! Domain types and pure logic for the yeepay generation pipeline.
//!
//! Nothing in this crate performs I/O. The store, the engine client and the
//! HTTP surface all build on the types defined here.

#[macro_use]
mod macros;

pub mod error;
pub mod model;
pub mod request;
pub mod resolution;
pub mod seed;
pub mod task;
pub mod types;
pub mod urls;
pub mod workflow;
