#![forbid(unsafe_code)]

pub(crate) fn sha256_hex(input: &str) -> String {
    use sha2::Digest as _;

    let mut hasher = sha2::Sha256::new();
    hasher.update(input.as_bytes());
    hex_string(&hasher.finalize())
}

// Stored password hashes are sha256 over "salt:password"; the salt is per-user.
pub(crate) fn password_hash(salt: &str, password: &str) -> String {
    sha256_hex(&format!("{salt}:{password}"))
}

// 32 random bytes from the OS generator, hex-encoded. Used for session tokens
// and password salts; panics if the OS cannot supply entropy.
pub(crate) fn random_hex32() -> String {
    use rand::RngCore as _;

    let mut buf = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    hex_string(&buf)
}

fn hex_string(bytes: &[u8]) -> String {
    use std::fmt::Write as _;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{password_hash, random_hex32, sha256_hex};

    #[test]
    fn minted_tokens_are_distinct_lowercase_hex() {
        let a = random_hex32();
        let b = random_hex32();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| matches!(ch, '0'..='9' | 'a'..='f')));
        assert_ne!(a, b);
    }

    #[test]
    fn password_hash_depends_on_the_salt() {
        assert_eq!(password_hash("salt", "pw"), sha256_hex("salt:pw"));
        assert_ne!(password_hash("salt-a", "pw"), password_hash("salt-b", "pw"));
    }
}
