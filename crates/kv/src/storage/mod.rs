//! Storage layer: values, version chains, locks, and the ordered index

pub mod index;
pub mod lock;
pub mod registry;
pub mod value;
pub mod version;

pub use index::{SkipList, RESERVED_KEY};
pub use lock::{LockRegistry, LockSnapshot, RwLock};
pub use registry::{IndexRegistry, ValueRegistry};
pub use value::Value;
pub use version::{Version, VersionChain};
