// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Detached signature schemes.
//!
//! `ed25519` signatures are hex-encoded and cover the artifact digest.
//! `minisign` signatures are the full signature file and cover the artifact.

use ed25519_dalek::{Signature, VerifyingKey};

/// Decode a hex Ed25519 public key.
pub fn parse_public_key(hex_key: &str) -> Result<VerifyingKey, String> {
    let bytes = hex::decode(hex_key.trim()).map_err(|e| format!("public key is not hex: {e}"))?;
    let bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| format!("public key must be 32 bytes, got {}", bytes.len()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| format!("invalid public key: {e}"))
}

/// Verify a hex Ed25519 signature over `message`.
pub fn verify_ed25519(
    key: &VerifyingKey,
    message: &[u8],
    hex_signature: &str,
) -> Result<(), String> {
    let bytes =
        hex::decode(hex_signature.trim()).map_err(|e| format!("signature is not hex: {e}"))?;
    let signature =
        Signature::from_slice(&bytes).map_err(|e| format!("malformed signature: {e}"))?;
    key.verify_strict(message, &signature)
        .map_err(|_| "signature does not verify".to_string())
}

/// Verify a minisign signature file over `artifact`.
///
/// `public_key` is either the base64 key line or a full `.pub` file.
pub fn verify_minisign(public_key: &str, artifact: &[u8], signature: &str) -> Result<(), String> {
    let key = if public_key.contains('\n') {
        minisign_verify::PublicKey::decode(public_key)
    } else {
        minisign_verify::PublicKey::from_base64(public_key.trim())
    }
    .map_err(|e| format!("invalid minisign public key: {e}"))?;
    let signature = minisign_verify::Signature::decode(signature)
        .map_err(|e| format!("invalid minisign signature: {e}"))?;
    key.verify(artifact, &signature, false)
        .map_err(|e| format!("minisign signature does not verify: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    #[test]
    fn ed25519_round() {
        let sk = SigningKey::generate(&mut OsRng);
        let key = parse_public_key(&hex::encode(sk.verifying_key().to_bytes())).unwrap();
        let sig = hex::encode(sk.sign(b"digest").to_bytes());
        assert!(verify_ed25519(&key, b"digest", &sig).is_ok());
        assert!(verify_ed25519(&key, b"tampered", &sig).is_err());
        assert!(verify_ed25519(&key, b"digest", "zz").is_err());
    }

    #[test]
    fn short_key_rejected() {
        assert!(parse_public_key("abcd").is_err());
        assert!(parse_public_key("not hex").is_err());
    }

    #[test]
    fn malformed_minisign_rejected() {
        let key = "RWQf6LRCGA9i53mlYecO4IzT51TGPpvWucNSCh1CBM0QTaLn73Y7GFO3";
        assert!(verify_minisign(key, b"x", "garbage").is_err());
    }
}
