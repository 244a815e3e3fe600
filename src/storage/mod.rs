//! Credential storage traits and the in-memory reference implementation.

pub mod inmemory;
pub mod traits;

pub use inmemory::MemoryCredentialStore;
pub use traits::*;
