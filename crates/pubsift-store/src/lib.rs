//! Record Store and Inventory Store for harvested PubMed notices
//!
//! - [`blob`]: blob storage contract with filesystem and in-memory backends
//! - [`objects`]: gzip-JSON object codec, storage paths, [`RawNotice`]
//! - [`inventory`]: per-partition "last synced" metadata and tombstones
//! - [`tombstones`]: identifiers removed by the bulk source

pub mod blob;
pub mod inventory;
pub mod objects;
pub mod tombstones;

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore, RetryingStore, StoreError, list_all};
pub use inventory::{Inventory, InventoryEntry};
pub use objects::{RawNotice, get_objects, put_objects};
pub use tombstones::Tombstones;
