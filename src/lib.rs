pub mod app;
pub mod error;
pub mod manager;
pub mod models;
pub mod worker;
