//! Object store backends.
//!
//! The [`backend::ObjectStore`] trait abstracts over where bytes
//! physically live.  [`s3::S3ObjectStore`] talks to any S3-compatible
//! service; [`memory::MemoryObjectStore`] keeps everything in process and
//! serves its own signed URLs.

pub mod backend;
pub mod memory;
pub mod s3;
pub mod signing;
