pub mod cli;
pub mod config;
pub mod stats;
pub mod store;
pub mod view;
