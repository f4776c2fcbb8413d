pub mod config;
pub mod error;
pub mod feed;
pub mod pipeline;
pub mod scoring;
pub mod server;
pub mod staging;
