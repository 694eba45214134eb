//! Agent that records which application holds the focus during configured work shifts and
//! delivers the usage records to a remote ingestion endpoint. Records are persisted locally
//! first, so nothing is lost while the endpoint is unreachable.
//!

pub mod cli;
pub mod daemon;
pub mod utils;
pub mod window_api;
