pub mod cache;
pub mod connection;
pub mod listener;
pub mod prepared;
pub mod session;
pub mod shared;
pub mod wire;

pub use listener::serve;
pub use shared::Shared;
