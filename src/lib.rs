#[macro_use]
extern crate tracing;

pub mod clients;
pub mod cmd;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod errors;
pub mod executor;
pub mod io_models;
pub mod jobs;
pub mod license;
pub mod logging;
pub mod models;
pub mod object_storage;
pub mod persistence;
pub mod policy;
pub mod reports;
pub mod runtime;
pub mod scan;
pub mod secrets;
pub mod services;
pub mod sharding;
pub mod siem;
