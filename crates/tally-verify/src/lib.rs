// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Security verification gating plugin installation.
//!
//! [`verify`] runs, in order: the checksum gate, signature verification,
//! certificate chain validation, and the trust policy. The first failure
//! produces a [`Verdict::Rejected`]; nothing here is ever downgraded to a
//! warning. Verification works on in-memory bytes and never touches disk.

pub mod chain;
pub mod checksum;
pub mod signature;

use ed25519_dalek::VerifyingKey;
use serde::Serialize;
use tally_core::{InstallMode, TallyError, TrustLevel};
use tally_plugin::PluginManifest;
use thiserror::Error;
use tracing::{debug, warn};

pub use checksum::ChecksumAlgorithm;

/// Installation trust policy.
#[derive(Debug, Clone)]
pub struct TrustPolicy {
    pub min_trust_level: TrustLevel,
    pub trust_anchors: Vec<VerifyingKey>,
    pub require_signature: bool,
    /// Whether interactive installs may lower `min_trust_level`.
    pub allow_interactive_override: bool,
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self {
            min_trust_level: TrustLevel::Community,
            trust_anchors: Vec::new(),
            require_signature: false,
            allow_interactive_override: true,
        }
    }
}

impl TrustPolicy {
    /// Build a policy from hex-encoded anchor keys.
    pub fn from_hex_anchors(
        min_trust_level: TrustLevel,
        anchors: &[String],
        require_signature: bool,
        allow_interactive_override: bool,
    ) -> Result<Self, TallyError> {
        let trust_anchors = anchors
            .iter()
            .map(|a| signature::parse_public_key(a))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TallyError::Config(format!("security.trust_anchors: {e}")))?;
        Ok(Self {
            min_trust_level,
            trust_anchors,
            require_signature,
            allow_interactive_override,
        })
    }
}

/// Per-installation inputs to the policy check.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyContext {
    pub mode: InstallMode,
    /// Requested minimum trust level for this installation only.
    pub trust_override: Option<TrustLevel>,
}

/// Why an artifact was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("checksum mismatch ({algorithm}): expected {expected}, got {actual}")]
    ChecksumMismatch {
        algorithm: String,
        expected: String,
        actual: String,
    },

    #[error("unsupported checksum algorithm `{algorithm}`")]
    UnsupportedChecksum { algorithm: String },

    #[error("manifest declares no checksum")]
    MissingChecksum,

    #[error("signature required by policy but manifest is unsigned")]
    SignatureMissing,

    #[error("signature verification failed: {detail}")]
    SignatureInvalid { detail: String },

    #[error("certificate chain invalid at link {index}: {detail}")]
    ChainInvalid { index: usize, detail: String },

    #[error("unknown trust level `{declared}`")]
    UnknownTrustLevel { declared: String },

    #[error("trust level {declared} is below required {required}")]
    TrustLevelTooLow {
        declared: TrustLevel,
        required: TrustLevel,
    },
}

/// Outcome of [`verify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Trusted {
        trust_level: TrustLevel,
        signed: bool,
        /// Whether a certificate chain was validated to an anchor.
        anchored: bool,
    },
    Rejected(RejectReason),
}

impl Verdict {
    pub fn is_trusted(&self) -> bool {
        matches!(self, Verdict::Trusted { .. })
    }

    /// Convert into a result, mapping rejection onto [`TallyError::Security`].
    pub fn into_result(self, plugin: &str) -> Result<TrustLevel, TallyError> {
        match self {
            Verdict::Trusted { trust_level, .. } => Ok(trust_level),
            Verdict::Rejected(reason) => Err(TallyError::Security {
                plugin: plugin.to_string(),
                reason: reason.to_string(),
            }),
        }
    }
}

/// Verify `artifact` against `manifest` under `policy`.
pub fn verify(
    manifest: &PluginManifest,
    artifact: &[u8],
    policy: &TrustPolicy,
    ctx: VerifyContext,
) -> Verdict {
    match check(manifest, artifact, policy, ctx) {
        Ok(verdict) => {
            debug!(plugin = %manifest.id(), ?verdict, "artifact verified");
            verdict
        }
        Err(reason) => {
            warn!(plugin = %manifest.id(), %reason, "artifact rejected");
            Verdict::Rejected(reason)
        }
    }
}

fn check(
    manifest: &PluginManifest,
    artifact: &[u8],
    policy: &TrustPolicy,
    ctx: VerifyContext,
) -> Result<Verdict, RejectReason> {
    // Checksum gate runs first; a mismatch rejects regardless of signatures.
    if manifest.installation.checksum.trim().is_empty() {
        return Err(RejectReason::MissingChecksum);
    }
    let (algo_name, expected) = manifest.installation.checksum_parts();
    let algorithm = ChecksumAlgorithm::parse(&algo_name).ok_or_else(|| {
        RejectReason::UnsupportedChecksum {
            algorithm: algo_name.clone(),
        }
    })?;
    let digest = algorithm.digest(artifact);
    let actual = hex::encode(&digest);
    if actual != expected {
        return Err(RejectReason::ChecksumMismatch {
            algorithm: algorithm.name().to_string(),
            expected,
            actual,
        });
    }

    let sec = &manifest.security;
    let signed = match (&sec.signature, &sec.public_key) {
        (Some(sig), Some(key)) => {
            let scheme = sec.signature_algorithm.as_deref().unwrap_or("ed25519");
            let result = if scheme.eq_ignore_ascii_case("minisign") {
                signature::verify_minisign(key, artifact, sig)
            } else {
                signature::parse_public_key(key)
                    .and_then(|vk| signature::verify_ed25519(&vk, &digest, sig))
            };
            result.map_err(|detail| RejectReason::SignatureInvalid { detail })?;
            true
        }
        (Some(_), None) => {
            return Err(RejectReason::SignatureInvalid {
                detail: "signature present without a public key".to_string(),
            });
        }
        _ => false,
    };
    if !signed && policy.require_signature {
        return Err(RejectReason::SignatureMissing);
    }

    let anchored = if sec.certificate_chain.is_empty() {
        false
    } else {
        let leaf_key = sec.public_key.as_deref().unwrap_or_default();
        chain::validate_chain(&sec.certificate_chain, leaf_key, &policy.trust_anchors)
            .map_err(|(index, detail)| RejectReason::ChainInvalid { index, detail })?;
        true
    };

    let declared = manifest
        .trust_level()
        .ok_or_else(|| RejectReason::UnknownTrustLevel {
            declared: sec.trust_level.clone(),
        })?;
    let required = effective_minimum(manifest, policy, ctx);
    if declared < required {
        return Err(RejectReason::TrustLevelTooLow { declared, required });
    }

    Ok(Verdict::Trusted {
        trust_level: declared,
        signed,
        anchored,
    })
}

fn effective_minimum(
    manifest: &PluginManifest,
    policy: &TrustPolicy,
    ctx: VerifyContext,
) -> TrustLevel {
    let Some(requested) = ctx.trust_override else {
        return policy.min_trust_level;
    };
    if ctx.mode == InstallMode::Interactive && policy.allow_interactive_override {
        debug!(plugin = %manifest.name, %requested, "interactive trust override applied");
        requested
    } else {
        warn!(
            plugin = %manifest.name,
            mode = %ctx.mode,
            "trust override ignored outside interactive installs"
        );
        policy.min_trust_level
    }
}
