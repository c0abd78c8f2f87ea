use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// A freshly minted one-time token: `raw` goes into the email, `hash` into the store.
pub struct MintedToken {
    pub raw: String,
    pub hash: String,
}

pub fn mint() -> MintedToken {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    let raw = hex::encode(bytes);
    let hash = digest(&raw);
    MintedToken { raw, hash }
}

pub fn digest(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.trim().as_bytes()))
}
