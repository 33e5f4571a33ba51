//! shutterfeed: camera-to-server photo sync
//!
//! The pusher hashes photos on a camera and uploads whatever the server does
//! not already hold. The server stores each upload under its content id,
//! processes it in the background and serves the catalog back out.

pub mod config;
pub mod error;
pub mod ingest;
pub mod pusher;
pub mod server;
pub mod state;
pub mod wire;

#[doc(hidden)]
pub mod testing;

pub use error::{Error, Result};
