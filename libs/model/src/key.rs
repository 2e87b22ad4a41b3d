use base64::Engine as _;

/// Re-exported from `boringtun` so every crate in the workspace that
/// needs to talk about a WireGuard-style key agrees on the same type,
/// even though the actual noise handshake is an external collaborator.
pub use boringtun::x25519::{PublicKey, StaticSecret};

/// Length of a base64-encoded (standard, padded) curve25519 key.
pub const ENCODED_KEY_LEN: usize = 44;

/// Encodes a public key the same way the wire format expects: standard
/// base64, always 44 characters.
pub fn encode_public_key(key: &PublicKey) -> String {
    base64::engine::general_purpose::STANDARD.encode(key.as_bytes())
}

/// General-purpose standard base64 encode, used by the identity store for
/// the private key half of the keypair (which has no wire-format length
/// constraint the way the public key does).
pub fn base64_encode(bytes: impl AsRef<[u8]>) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn base64_decode(s: &str) -> crate::Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| crate::Error::validation(format!("invalid base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encoding() {
        let secret = StaticSecret::from([7u8; 32]);
        let public = PublicKey::from(&secret);

        let encoded = encode_public_key(&public);
        assert_eq!(encoded.len(), ENCODED_KEY_LEN);

        let decoded = base64_decode(&encoded).unwrap();
        assert_eq!(decoded.as_slice(), public.as_bytes());
    }

    #[test]
    fn base64_decode_rejects_garbage() {
        let err = base64_decode("not base64!!").unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Validation);
    }
}
