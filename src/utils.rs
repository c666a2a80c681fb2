use sha2::{Digest, Sha256};

/// SHA-256 of the input, rendered as a lowercase hex string.
pub fn sha256_hex(input: &[u8]) -> String {
    hex::encode(Sha256::digest(input))
}

pub fn sha256_bytes(input: &[u8]) -> Vec<u8> {
    Sha256::digest(input).to_vec()
}

/// Draws a random 64-bit seed and hashes it into a 64-char hex candidate
/// nonce.
pub fn random_hex_64bit() -> String {
    let seed: [u8; 8] = rand::random();
    sha256_hex(&seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn random_nonce_is_64_lowercase_hex_chars() {
        let nonce = random_hex_64bit();
        assert_eq!(nonce.len(), 64);
        assert!(nonce.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }
}
