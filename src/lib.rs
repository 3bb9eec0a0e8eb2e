//! A disk-resident extendible hashing index: a directory file that maps a
//! key's hash sequence to a bucket offset, and a hash file holding
//! fixed-size bucket blocks keyed by (key, record_ref) pairs.
//!
//! See [`EhashIndex`] for the facade most callers want; the submodules are
//! public so a caller that needs to drive the directory or bucket store
//! directly (building a custom layout, inspecting a corrupt file) still can.

pub mod bucket;
pub mod config;
pub mod directory;
pub mod error;
pub mod hashing;
pub mod index;
pub mod store;

pub use config::EhashConfig;
pub use error::{EhashError, Result};
pub use hashing::{ByteKeyEq, HighwayKeyHasher, KeyEq, KeyHasher};
pub use index::EhashIndex;
