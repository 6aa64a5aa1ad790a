//! Base-62 identifier synthesis
//
// Remote tracks may arrive without an id or stream label. The listener
// fills the gap with a random identifier that is safe to embed in SDP.

use uuid::Uuid;

const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Generate a fresh random identifier: a v4 UUID encoded in base 62.
#[must_use]
pub fn new_base62_id() -> String {
    encode_base62(Uuid::new_v4().as_u128())
}

fn encode_base62(mut value: u128) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut out = String::with_capacity(22);
    while value > 0 {
        out.push(ALPHABET[(value % 62) as usize] as char);
        value /= 62;
    }
    out.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_zero() {
        assert_eq!(encode_base62(0), "0");
    }

    #[test]
    fn encodes_known_values() {
        assert_eq!(encode_base62(61), "z");
        assert_eq!(encode_base62(62), "10");
        assert_eq!(encode_base62(62 * 62 + 1), "101");
    }

    #[test]
    fn generated_ids_are_base62_and_unique() {
        let a = new_base62_id();
        let b = new_base62_id();
        assert!(!a.is_empty());
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }
}
