mod block;
mod cache;
mod diskemu;

pub use block::BlockStorage;
pub use cache::BlockCache;
pub use diskemu::{FileBlockEmulator, FileBlockEmulatorBuilder};
