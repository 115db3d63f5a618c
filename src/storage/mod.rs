// Storage module - PERSISTENCE
// File-backed transaction store, one JSON file per node

mod file_store;

pub use file_store::FileStore;
