use bitcoin::hashes::{sha256, Hash};
use rand::RngCore;

/// Fresh 32 byte payment preimage.
pub fn make_preimage() -> [u8; 32] {
    let mut preimage = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut preimage);
    preimage
}

pub fn payment_hash(preimage: &[u8]) -> [u8; 32] {
    sha256::Hash::hash(preimage).to_byte_array()
}
