use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// hashes a secret and converts it to a comparable string, the way it is
/// stored on disk
pub fn hash(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret);

    BASE64_STANDARD.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash("hunter2"), hash("hunter2"));
    }

    #[test]
    fn hash_differs_per_input() {
        assert_ne!(hash("hunter2"), hash("hunter3"));
    }
}
