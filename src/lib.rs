pub mod config;
pub mod db;
pub mod domain;
pub mod dryrun;
pub mod engine;
pub mod error;
pub mod flags;
pub mod ingest;
pub mod jobs;
pub mod models;
pub mod parser;
pub mod populations;
pub mod preverify;
pub mod routes;
pub mod schema;
pub mod state;
pub mod storage;
pub mod store;
pub mod utils;
pub mod workers;

pub use workers::{default_handlers, Worker, WorkerContext};
