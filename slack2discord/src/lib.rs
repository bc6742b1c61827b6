pub mod api;
pub mod cli;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod models;
pub mod services;
pub mod settings;
pub mod transform;
