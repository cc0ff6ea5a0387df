//! SQLite pool initialization

pub mod init;

pub use init::*;
