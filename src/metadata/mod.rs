//! Metadata index.
//!
//! The index mirrors object attributes keyed by `(bucket, key)` and
//! supports resumable bucket scans.  The [`store::MetadataStore`] trait
//! defines the interface; [`sqlite::SqliteMetadataStore`] is the default
//! implementation and [`memory::MemoryMetadataStore`] the ephemeral one.

pub mod cursor;
pub mod memory;
pub mod sqlite;
pub mod store;
pub mod transfer;
