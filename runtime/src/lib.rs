//! HTTP front end for the job engine: job definitions, run records and the
//! dispatcher that owns background executions.

pub mod config;
pub mod server;
