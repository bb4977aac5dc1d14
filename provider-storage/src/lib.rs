//! # Storage Provider
//!
//! Typed client for the bucket and file endpoints of the storage service.
//!
//! ## Overview
//!
//! This module provides:
//! - Bucket listing, creation, update and deletion
//! - Multipart file upload with a client-side size limit
//! - File download, deletion and moves between buckets
//! - Display helpers (`format_bytes`, `filter_files`)
//!
//! Every call goes through [`core_auth::AuthenticatedClient`], so an expired
//! access token is refreshed and the call replayed transparently.

pub mod connector;
pub mod error;
pub mod types;

pub use connector::StorageApi;
pub use error::{Result, StorageError};
pub use types::{
    filter_files, format_bytes, total_size, Bucket, CreateBucket, DownloadedFile, StoredFile,
    UpdateBucket,
};
