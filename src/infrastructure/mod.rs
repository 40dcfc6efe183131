pub mod in_memory;
pub mod memory_cache;
pub mod notifier;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod sandbox;
