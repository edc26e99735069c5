pub mod app;
pub mod batch;
pub mod config;
pub mod dedup;
pub mod domain;
pub mod error;
pub mod matcher;
pub mod orchestrator;
pub mod output;
pub mod pool;
pub mod prompt;
pub mod providers;
pub mod record;
pub mod region;
pub mod resolver;
pub mod search;
pub mod store;
pub mod table;
pub mod transfer;
pub mod warning;
