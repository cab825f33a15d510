#![allow(dead_code)]

pub mod cli;
pub mod cluster;

pub use cli::CliEnv;
pub use cluster::{Cluster, fast_client_config, unique_human};
