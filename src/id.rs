//! Identifier generation for sessions and access tokens.

/// Number of random bytes behind every generated id.
pub const ID_BYTES: usize = 32;

/// Returns a fresh 64-character hex id drawn from 256 bits of the thread-local CSPRNG.
///
/// Session ids and access tokens are used verbatim as store keys and double as bearer
/// credentials, so they must be unguessable rather than merely unique.
pub fn generate_id() -> String {
    let bytes: [u8; ID_BYTES] = rand::random();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_hex_and_distinct() {
        let first = generate_id();
        let second = generate_id();

        assert_eq!(first.len(), ID_BYTES * 2);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, second);
    }
}
