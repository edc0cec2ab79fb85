pub mod client;
pub mod config;
pub mod error;
pub mod hub;
pub mod insights;
pub mod jobs;
pub mod llm;
pub mod models;
pub mod routes;
pub mod schema;
pub mod state;
pub mod store;
pub mod utils;
pub mod wire;
pub mod workers;

pub use workers::{default_handlers, Worker};
