//! HMAC-SHA256 frame signing.
//!
//! The signature frame of a multipart message is the hex-encoded
//! HMAC-SHA256 of the four JSON section frames, keyed by the kernel
//! session key. An empty key disables signing and yields an empty
//! signature, matching the Jupyter `signature_scheme` convention.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Sign the four JSON section frames with the session key.
///
/// Returns the lowercase hex digest, or an empty string when the key is
/// empty.
pub fn sign_frames(key: &[u8], sections: &[&[u8]; 4]) -> String {
    if key.is_empty() {
        return String::new();
    }
    // HMAC accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    for section in sections {
        mac.update(section);
    }
    hex::encode(mac.finalize().into_bytes())
}

/// Whether a received signature matches the expected digest for these
/// frames. With an empty key every signature is accepted.
pub fn verify_frames(key: &[u8], sections: &[&[u8]; 4], signature: &[u8]) -> bool {
    if key.is_empty() {
        return true;
    }
    sign_frames(key, sections).as_bytes() == signature
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECTIONS: [&[u8]; 4] = [br#"{"msg_type":"status"}"#, b"{}", b"{}", b"{}"];

    #[test]
    fn empty_key_yields_empty_signature() {
        assert_eq!(sign_frames(b"", &SECTIONS), "");
    }

    #[test]
    fn signature_is_hex_sha256_length() {
        let sig = sign_frames(b"secret", &SECTIONS);
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_is_deterministic() {
        assert_eq!(sign_frames(b"k", &SECTIONS), sign_frames(b"k", &SECTIONS));
    }

    #[test]
    fn different_keys_differ() {
        assert_ne!(sign_frames(b"k1", &SECTIONS), sign_frames(b"k2", &SECTIONS));
    }

    #[test]
    fn different_content_differs() {
        let other: [&[u8]; 4] = [br#"{"msg_type":"stream"}"#, b"{}", b"{}", b"{}"];
        assert_ne!(sign_frames(b"k", &SECTIONS), sign_frames(b"k", &other));
    }

    #[test]
    fn verify_accepts_own_signature() {
        let sig = sign_frames(b"k", &SECTIONS);
        assert!(verify_frames(b"k", &SECTIONS, sig.as_bytes()));
    }

    #[test]
    fn verify_rejects_tampered_signature() {
        assert!(!verify_frames(b"k", &SECTIONS, b"deadbeef"));
    }

    #[test]
    fn verify_with_empty_key_accepts_anything() {
        assert!(verify_frames(b"", &SECTIONS, b"whatever"));
    }
}
