//! Finds game dumps on a PS5 (over FTP) or on a mounted drive and installs
//! the `dump_runner.elf` / `homebrew.js` payload pair into them.

pub mod api;
pub mod dump;
pub mod error;
pub mod ftp;
pub mod installer;
pub mod local;
pub mod utils;
pub mod web;

pub use error::{Error, Result};
