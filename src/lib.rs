#![forbid(unsafe_code)]

pub mod book;
pub mod cli;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod script;
pub mod session;
