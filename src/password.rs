//! Salted password hashing, in the same `sha2`/`hex` idiom the teacher
//! stack already uses for device-token hashing (see the original
//! `auth.rs`'s `Sha256::digest` + `hex` usage).

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Hashes `password` with a fresh random salt, returning `salt:hash` (both
/// hex-encoded) for storage in `users.password`.
pub fn hash_password(password: &str) -> String {
    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = hex::encode(salt_bytes);
    let hash = hex::encode(Sha256::digest(format!("{salt}{password}").as_bytes()));
    format!("{salt}:{hash}")
}

/// Verifies `password` against a `salt:hash` string produced by
/// [`hash_password`].
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt, expected)) = stored.split_once(':') else {
        return false;
    };
    let actual = hex::encode(Sha256::digest(format!("{salt}{password}").as_bytes()));
    actual == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_round_trips() {
        let stored = hash_password("hunter2");
        assert!(verify_password("hunter2", &stored));
        assert!(!verify_password("wrong", &stored));
    }

    #[test]
    fn two_hashes_of_the_same_password_differ() {
        assert_ne!(hash_password("hunter2"), hash_password("hunter2"));
    }
}
