pub mod api;
pub mod blockchain;
pub mod config;
pub mod db;
pub mod error;
pub mod logger;
pub mod models;
pub mod queue;
pub mod sync;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
