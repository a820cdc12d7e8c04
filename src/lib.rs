pub mod api;
pub mod config;
pub mod database;
pub mod logging;
pub mod orders;
pub mod providers;
pub mod services;
pub mod workers;

#[cfg(test)]
pub mod testutil;
