//! Filesystem primitives: media discovery, hashing, free space.

pub mod checksum;
pub mod space;
pub mod walker;

pub use checksum::hash_file;
pub use walker::{scan_media, MediaFile};
