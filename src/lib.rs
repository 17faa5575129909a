// SPDX-License-Identifier: MIT OR Apache-2.0

//! jobmatch - Resume to job-posting matching library
//!
//! Shared modules for the jobmatch CLI and HTTP server.

pub mod config;
pub mod drive;
pub mod embedding;
pub mod errors;
pub mod generation;
pub mod ingest;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod server;
pub mod services;
pub mod warehouse;
pub mod webhook;
