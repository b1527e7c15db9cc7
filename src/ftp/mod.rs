//! Remote side: one FTP session to the console, and the scanner and
//! uploader that borrow it.

pub mod connection;
pub mod error;
pub mod listing;
pub mod prober;
pub mod scanner;
pub mod transport;
pub mod uploader;

#[cfg(test)]
pub(crate) mod mock;

pub use connection::{ActiveSession, ConnectionConfig, ConnectionManager, ConnectionState};
pub use error::FtpError;
pub use prober::{DirectoryProber, ProbeError, RetryPolicy};
pub use scanner::DumpScanner;
pub use transport::{Connector, FtpTransport, TransportError};
pub use uploader::FtpUploader;
