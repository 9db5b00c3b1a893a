//! The `user` record (§3, §4.6) and its password hashing.

use std::collections::HashMap;

use sha1::{Digest, Sha1};

use crate::perm::{self, Perm};

#[derive(Debug, Clone)]
pub struct User {
    pub name: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub perm: HashMap<String, Perm>,
}

/// Hex-encoded SHA-1 of `password` -- the one hashing path every
/// password comparison and every `chgpasswd` write funnels through.
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

impl User {
    pub fn check_password(&self, password: &str) -> bool {
        self.password_hash == hash_password(password)
    }

    pub fn effective_perm(&self, db: &str, table: &str) -> Perm {
        if self.is_admin {
            return Perm::Write;
        }
        perm::resolve(&self.perm, db, table)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn check_password_matches_the_stored_hash() {
        let user = User {
            name: "alice".to_string(),
            password_hash: hash_password("hunter2"),
            is_admin: false,
            perm: HashMap::new(),
        };
        assert!(user.check_password("hunter2"));
        assert!(!user.check_password("wrong"));
    }

    #[test]
    fn admin_always_resolves_to_write() {
        let user = User {
            name: "root".to_string(),
            password_hash: hash_password("x"),
            is_admin: true,
            perm: HashMap::new(),
        };
        assert_eq!(user.effective_perm("anything", "anything"), Perm::Write);
    }
}
