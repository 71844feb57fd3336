//! Database access shared by pipeline crates

pub mod init;

pub use init::{init_database, init_memory_database};
