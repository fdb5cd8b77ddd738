pub mod clients;
pub mod codegen;
pub mod config;
pub mod driver;
pub mod errors;
pub mod executor;
pub mod models;
pub mod pr;
pub mod relevance;
pub mod review;
pub mod stream;
pub mod workflow;
