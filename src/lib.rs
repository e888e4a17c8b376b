//! Birding query server: turns loosely specified birding questions into
//! validated eBird API calls and ranked text summaries, served over MCP.

pub mod config;
pub mod constants;
pub mod error;
pub mod formatters;
pub mod gateway;
pub mod geocoder;
pub mod models;
pub mod orchestrator;
pub mod params;
pub mod rate_limit;
pub mod ranking;
pub mod resolver;
pub mod retry;
pub mod service;

pub use config::Config;
pub use error::{BirdingError, ErrorKind, Result};
pub use orchestrator::{Orchestrator, QueryOutcome, QueryRequest};
pub use service::BirdingService;
