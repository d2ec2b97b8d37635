pub mod config;
pub mod error;
#[macro_use]
pub mod logging;
pub mod setup;
