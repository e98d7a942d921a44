// Library interface for testing

// Declare all modules
pub mod archive;
pub mod cache;
pub mod config;
pub mod constants;
pub mod crawler;
pub mod db;
pub mod fetcher;
pub mod listing;
pub mod media;
pub mod models;
pub mod queries;
pub mod schema;
pub mod serve;
pub mod shuffle;

// Re-export the expected database version for convenience
pub use constants::EXPECTED_DB_VERSION;
