//! Authentication and the permission lattice (§4.6): the `_meta_.user`
//! table, password hashing, and per-request scope resolution.

pub mod perm;
pub mod store;
pub mod user;

pub use perm::Perm;
pub use store::{bootstrap, UserStore, META_DB, USER_TABLE};
pub use user::{hash_password, User};
