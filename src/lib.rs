#![cfg_attr(not(test), forbid(unsafe_code))]
#![cfg_attr(test, deny(unsafe_code))]

//! Global Data Plane: signed append-only logs.
//!
//! - [`core`]: names, keys, records, metadata, limits and the status taxonomy
//! - [`proto`]: framing and the CBOR message envelope
//! - [`client`]: connection pool, event queue, log handles, forwarded appends
//! - [`server`]: log storage, subscriptions, directory and the accept loop
//! - [`apps`]: mirror, clone, delete, read, append and name tools

pub mod apps;
#[cfg(feature = "cli")]
pub mod cli;
pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod paths;
pub mod proto;
pub mod server;
pub mod telemetry;

pub use error::{Effect, Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

pub use crate::client::{
    ClientConfig, ClientError, Context, Event, EventKind, EventQueue, GdpClient, Gin, GinState,
    OpenOptions, forward_append,
};
pub use crate::core::{
    Datum, ErrorKind, InternalName, LogInfo, LogMetadata, OpenMode, PublicKey, RecordHash,
    ServerAddr, SigningKeyPair, Status, parse_name,
};
pub use crate::server::{LogServer, ServerConfig, ServerHandle};
