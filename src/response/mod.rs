//! Response handling module - Base64 decoding and image storage

pub mod base64;
pub mod file;

pub use file::ImageStore;
