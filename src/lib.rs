pub mod config;
pub mod context;
pub mod core;
pub mod daemon;
pub mod db;
pub mod logging;
