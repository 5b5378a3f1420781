/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/ext_stores/src/hashing.rs
*
* Token value generation and salted SHA-256 hashing. Hashes are stored as
* `$2:<base64 salt>:<base64 digest>` where the digest covers the salt followed
* by the secret.
*
* SPDX-License-Identifier: Apache-2.0
*/

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

const TOKEN_CHARS: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";
pub const TOKEN_LENGTH: usize = 54;
const SALT_LENGTH: usize = 8;
const HASH_VERSION: &str = "2";

/// Random token value drawn from a vowel-free alphabet.
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LENGTH)
        .map(|_| TOKEN_CHARS[rng.gen_range(0..TOKEN_CHARS.len())] as char)
        .collect()
}

fn digest(salt: &[u8], secret: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(secret.as_bytes());
    hasher.finalize().to_vec()
}

pub fn create_hash(secret: &str) -> String {
    let salt: [u8; SALT_LENGTH] = rand::thread_rng().gen();
    format!(
        "${HASH_VERSION}:{}:{}",
        STANDARD.encode(salt),
        STANDARD.encode(digest(&salt, secret))
    )
}

/// Checks `secret` against a hash produced by [`create_hash`]. Malformed
/// hashes never verify.
pub fn verify_hash(hash: &str, secret: &str) -> bool {
    let mut parts = hash.splitn(3, ':');
    let (Some(version), Some(salt), Some(expected)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    if version.strip_prefix('$') != Some(HASH_VERSION) {
        return false;
    }
    let (Ok(salt), Ok(expected)) = (STANDARD.decode(salt), STANDARD.decode(expected)) else {
        return false;
    };
    digest(&salt, secret) == expected
}
