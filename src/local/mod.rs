//! Local side: dumps on a mounted volume, no console involved.

pub mod error;
pub mod scanner;
pub mod uploader;
pub mod volumes;

pub use error::LocalError;
pub use scanner::LocalScanner;
pub use uploader::LocalUploader;
pub use volumes::{available_volumes, VolumeInfo};
