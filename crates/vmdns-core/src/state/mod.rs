// # State Store Implementations
//
// This module provides in-process implementations of the StateStore trait.
// The production store lives in `vmdns-source-cloudstack`, next to the
// event-source queries it shares a database with.

pub mod memory;

pub use memory::MemoryStateStore;
