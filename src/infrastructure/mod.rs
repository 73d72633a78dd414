pub mod alerts;
pub mod config;
pub mod core;
pub mod feeds;
pub mod news;
pub mod observability;
pub mod persistence;
pub mod symbols;
