//! Object storage for raw batch files and output partitions

pub mod object_store;

pub use object_store::{fingerprint, FsObjectStore, InMemoryObjectStore, ObjectInfo, ObjectStore, StoredObject};
