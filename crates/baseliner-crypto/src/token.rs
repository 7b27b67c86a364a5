use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use baseliner_domain::MintedToken;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_BYTES: usize = 32;
const PREFIX_CHARS: usize = 8;

/// Mint a 32-byte cryptographically random token and transport-encode it as
/// unpadded base32. The plaintext is returned once and must never be stored.
pub fn mint_token(pepper: &[u8]) -> MintedToken {
    let mut raw_bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut raw_bytes);
    let raw = data_encoding::BASE32_NOPAD.encode(&raw_bytes);
    let hash = hash_token(pepper, raw.as_bytes());
    let prefix = raw.chars().take(PREFIX_CHARS).collect();
    MintedToken { raw, hash, prefix }
}

/// `HMAC-SHA256(pepper, raw_token_bytes)`. Lookup is by hash equality, never
/// by comparing plaintext.
pub fn hash_token(pepper: &[u8], raw: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(pepper).expect("HMAC accepts any key length");
    mac.update(raw);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_token_hash_matches_recomputed_hash() {
        let pepper = b"test-pepper";
        let minted = mint_token(pepper);
        assert_eq!(minted.hash, hash_token(pepper, minted.raw.as_bytes()));
    }

    #[test]
    fn two_mints_are_never_equal() {
        let pepper = b"test-pepper";
        let a = mint_token(pepper);
        let b = mint_token(pepper);
        assert_ne!(a.raw, b.raw);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn different_pepper_yields_different_hash() {
        let minted = mint_token(b"pepper-a");
        let hash_b = hash_token(b"pepper-b", minted.raw.as_bytes());
        assert_ne!(minted.hash, hash_b);
    }

    #[test]
    fn prefix_is_not_enough_to_recover_token() {
        let minted = mint_token(b"test-pepper");
        assert_eq!(minted.prefix.len(), PREFIX_CHARS);
        assert!(minted.raw.starts_with(&minted.prefix));
        assert!(minted.prefix.len() < minted.raw.len());
    }
}
