use rand::seq::SliceRandom;
use rand::Rng;

use crate::util::names::{ADJECTIVES, ANIMALS};

/// Length of a container/pod ID in hex characters (spec §3: 12 lowercase hex).
const ID_LEN: usize = 12;

/// Generate a random hex ID (12 hex chars = 6 random bytes).
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..ID_LEN / 2).map(|_| rng.gen()).collect();
    hex_encode(&bytes)
}

/// Encode bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Generate a default `<adjective>-<animal>` name from the curated word lists.
pub fn generate_name() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).expect("non-empty word list");
    let animal = ANIMALS.choose(&mut rng).expect("non-empty word list");
    format!("{adjective}-{animal}")
}

/// Validate that a string looks like a valid container/pod ID prefix.
/// Must be non-empty, lowercase hex, and at most `ID_LEN` characters.
pub fn validate_id_prefix(prefix: &str) -> bool {
    !prefix.is_empty()
        && prefix.len() <= ID_LEN
        && prefix
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}
