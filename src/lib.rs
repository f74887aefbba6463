pub mod ai;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
