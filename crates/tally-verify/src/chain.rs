// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Certificate chain validation.
//!
//! The chain is ordered leaf first. Certificate `i` is signed by the key of
//! certificate `i + 1`; the last certificate is signed by a trust anchor.

use ed25519_dalek::VerifyingKey;
use tally_plugin::Certificate;

use crate::signature::{parse_public_key, verify_ed25519};

/// Validate `chain` against `anchors`. `leaf_key` is the manifest's public key
/// and must be the key certified by the first link.
pub fn validate_chain(
    chain: &[Certificate],
    leaf_key: &str,
    anchors: &[VerifyingKey],
) -> Result<(), (usize, String)> {
    let Some(leaf) = chain.first() else {
        return Ok(());
    };
    if !leaf.public_key.trim().eq_ignore_ascii_case(leaf_key.trim()) {
        return Err((0, "leaf certificate does not certify the manifest key".to_string()));
    }
    if anchors.is_empty() {
        return Err((chain.len() - 1, "no trust anchors are configured".to_string()));
    }

    for (i, cert) in chain.iter().enumerate() {
        match chain.get(i + 1) {
            Some(issuer) => {
                if cert.issuer != issuer.subject {
                    return Err((
                        i,
                        format!(
                            "issuer `{}` does not match next subject `{}`",
                            cert.issuer, issuer.subject
                        ),
                    ));
                }
                let issuer_key = parse_public_key(&issuer.public_key).map_err(|e| (i + 1, e))?;
                verify_ed25519(&issuer_key, &cert.signed_payload(), &cert.signature)
                    .map_err(|e| (i, e))?;
            }
            None => {
                let anchored = anchors.iter().any(|anchor| {
                    verify_ed25519(anchor, &cert.signed_payload(), &cert.signature).is_ok()
                });
                if !anchored {
                    return Err((i, "chain does not end at a configured trust anchor".to_string()));
                }
            }
        }
    }
    Ok(())
}
