//! Photo ingestion
//!
//! This module handles:
//! - Content addressing (SHA-256 ids)
//! - JPEG signature validation
//! - The fan-out pipeline: original, thumbnail, EXIF

pub mod addresser;
pub mod metadata;
pub mod pipeline;
pub mod thumbnail;

pub use addresser::{digest, digest_reader, ContentId};
pub use pipeline::{process, Processed};
