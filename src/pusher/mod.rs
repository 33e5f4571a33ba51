//! Camera-side sync
//!
//! The pusher watches a device, hashes what it finds and sends the server
//! whatever the server does not already have.

pub mod device;
pub mod planner;
pub mod remote;

pub use device::{DeviceSource, DirectoryDevice};
pub use planner::{CycleReport, IdCache, SyncPlanner};
pub use remote::{HttpCatalog, RemoteCatalog, UploadOutcome};
