#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate serde;

pub mod cloud;
pub mod config;
pub mod connector;
pub mod constants;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod host_id;
pub mod model;
pub mod mount;
pub mod provider;
pub mod state_monitor;
