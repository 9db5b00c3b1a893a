pub mod store;
pub mod subspace;
pub mod tuple;

pub use store::{KvPair, MemoryStore, Store, Transaction};
pub use subspace::Subspace;
