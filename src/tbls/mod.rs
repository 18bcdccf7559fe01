//!  Threshold BLS signatures
//!
//!  A group key is shared among `n` nodes with Shamir's scheme so that any `t` of them can jointly
//!  produce a signature, while no node ever holds the whole private key.
//!  The signatures live in G1 and the keys in G2 of the BLS12-381 pairing-friendly curve.
//!
//!  The module implements following operations, see [`CryptoProvider`]:
//! * computing a partial signature (share) over a message
//! * verifying a share of any node against the public commitment
//! * combining `t` shares into a signature of the group
//! * verifying a group signature
//!
//!  Key material is produced outside of the provider, for example by the [`dealer`] and handed over
//!  as [`PrivateShare`] and [`PublicCommitment`].
//!
//! [`CryptoProvider`]: trait.CryptoProvider.html
//! [`dealer`]: dealer/index.html
//! [`PrivateShare`]: keys/struct.PrivateShare.html
//! [`PublicCommitment`]: keys/struct.PublicCommitment.html
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use thiserror::Error;

pub mod dealer;
pub mod keys;
pub mod provider;

pub use crate::algorithms::hash::Suite;
pub use keys::{PrivateShare, PrivateShareRecord, PublicCommitment, PublicShare, PublicShareRecord};
pub use provider::TblsProvider;

/// Length of a compressed G1 point, which is a signature
pub const SIGNATURE_LENGTH: usize = 48;
/// Length of the big endian index prefix of a partial signature
pub const INDEX_LENGTH: usize = 2;
/// Length of a partial signature
pub const PARTIAL_SIGNATURE_LENGTH: usize = INDEX_LENGTH + SIGNATURE_LENGTH;

/// Enumerates errors raised by the threshold scheme
///
/// Negative outcomes of verification are not errors, they are reported as `false`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("incorrect threshold parameters: {0}")]
    IncorrectParameters(String),
    #[error("internal crypto error: {0}")]
    Internal(String),
    #[error("insufficient shares: {got} distinct shares supplied, {required} required")]
    InsufficientShares { got: usize, required: usize },
    #[error("cannot combine shares: {0}")]
    Combination(String),
    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

/// Selects the quorum size relative to the Byzantine bound `f`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum ThresholdKind {
    /// `t = f + 1`, at least one honest node contributed
    #[serde(rename = "f+1")]
    #[strum(serialize = "f+1")]
    Low,
    /// `t = 2f + 1`, honest nodes form a majority of the contributors
    #[serde(rename = "2f+1")]
    #[strum(serialize = "2f+1")]
    High,
}

/// Parameters of the shared key
///
/// # Key Attributes
///
/// * `share_count` - number of nodes `n`, each holds one share of the key
/// * `faulty` - Byzantine bound $` f = \lfloor (n-1)/3 \rfloor `$
/// * `threshold` - quorum size `t`, which is either `f+1` or `2f+1`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ThresholdConfig", into = "ThresholdConfig")]
pub struct ThresholdParams {
    share_count: usize, //n
    threshold: usize,   //t
    faulty: usize,      //f
    kind: ThresholdKind,
}

impl ThresholdParams {
    /// Derives `f` and `t` from the number of nodes
    pub fn new(share_count: usize, kind: ThresholdKind) -> Result<Self, CryptoError> {
        if share_count == 0 {
            return Err(CryptoError::IncorrectParameters(
                "Number of shares must be positive".to_owned(),
            ));
        }
        if share_count > usize::from(u16::MAX) {
            return Err(CryptoError::IncorrectParameters(format!(
                "Number of shares {} exceeds {}",
                share_count,
                u16::MAX
            )));
        }

        let faulty = (share_count - 1) / 3;
        let threshold = match kind {
            ThresholdKind::Low => faulty + 1,
            ThresholdKind::High => 2 * faulty + 1,
        };

        Ok(ThresholdParams {
            share_count,
            threshold,
            faulty,
            kind,
        })
    }

    /// Validates an explicit quorum size against the selection rule
    pub fn with_quorum(share_count: usize, threshold: usize) -> Result<Self, CryptoError> {
        let low = Self::new(share_count, ThresholdKind::Low)?;
        if threshold == low.threshold {
            return Ok(low);
        }
        let high = Self::new(share_count, ThresholdKind::High)?;
        if threshold == high.threshold {
            return Ok(high);
        }
        Err(CryptoError::IncorrectParameters(format!(
            "Threshold {} is neither f+1 = {} nor 2f+1 = {} for {} shares",
            threshold, low.threshold, high.threshold, share_count
        )))
    }

    pub fn share_count(&self) -> usize {
        self.share_count
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn faulty(&self) -> usize {
        self.faulty
    }

    pub fn kind(&self) -> ThresholdKind {
        self.kind
    }
}

impl fmt::Display for ThresholdParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{share_count: {}, threshold: {} ({}), faulty: {}}}",
            self.share_count, self.threshold, self.kind, self.faulty
        )
    }
}

/// Serialized form of [`ThresholdParams`]
///
/// [`ThresholdParams`]: struct.ThresholdParams.html
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub share_count: usize,
    pub kind: ThresholdKind,
}

impl TryFrom<ThresholdConfig> for ThresholdParams {
    type Error = CryptoError;

    fn try_from(config: ThresholdConfig) -> Result<Self, Self::Error> {
        ThresholdParams::new(config.share_count, config.kind)
    }
}

impl From<ThresholdParams> for ThresholdConfig {
    fn from(params: ThresholdParams) -> Self {
        ThresholdConfig {
            share_count: params.share_count,
            kind: params.kind,
        }
    }
}

/// Partial signature of one node
///
/// Opaque bytes: the big endian index of the signer followed by a compressed point of G1.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartialSignature(#[serde(with = "keys::hex_bytes")] Vec<u8>);

/// Signature of the group, indistinguishable from a plain BLS signature
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CombinedSignature(#[serde(with = "keys::hex_bytes")] Vec<u8>);

macro_rules! impl_signature_bytes {
    ($t:ident) => {
        impl $t {
            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            pub fn into_bytes(self) -> Vec<u8> {
                self.0
            }
        }

        impl From<Vec<u8>> for $t {
            fn from(bytes: Vec<u8>) -> Self {
                $t(bytes)
            }
        }

        impl AsRef<[u8]> for $t {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl AsMut<[u8]> for $t {
            fn as_mut(&mut self) -> &mut [u8] {
                &mut self.0
            }
        }

        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(&self.0))
            }
        }

        impl fmt::Debug for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($t), hex::encode(&self.0))
            }
        }
    };
}

impl_signature_bytes!(PartialSignature);
impl_signature_bytes!(CombinedSignature);

/// Threshold signing interface consumed by a consensus protocol
///
/// All operations treat the message as opaque bytes.
/// Verification never fails with an error: tampered, truncated, or mismatched input is expected
/// from Byzantine nodes and yields `false`.
pub trait CryptoProvider {
    /// Computes the partial signature of this node over the message
    fn compute_share(&self, message: &[u8]) -> Result<PartialSignature, CryptoError>;

    /// Verifies the partial signature of any node against its public share
    fn verify_share(&self, message: &[u8], share: &[u8]) -> bool;

    /// Combines partial signatures into the signature of the group
    ///
    /// # Precondition
    /// Every share must have passed [`verify_share`] for the same message.
    /// Shares are not verified here, a single invalid share produces a signature which fails [`verify_signature`].
    ///
    /// [`verify_share`]: #tymethod.verify_share
    /// [`verify_signature`]: #tymethod.verify_signature
    fn combine(
        &self,
        message: &[u8],
        shares: &[PartialSignature],
    ) -> Result<CombinedSignature, CryptoError>;

    /// Verifies the signature against the public key of the group
    fn verify_signature(&self, message: &[u8], signature: &[u8]) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_follow_node_count() -> anyhow::Result<()> {
        for (n, f, low, high) in vec![(1, 0, 1, 1), (4, 1, 2, 3), (7, 2, 3, 5), (10, 3, 4, 7), (12, 3, 4, 7)] {
            let p = ThresholdParams::new(n, ThresholdKind::Low)?;
            assert_eq!((p.faulty(), p.threshold()), (f, low));
            let p = ThresholdParams::new(n, ThresholdKind::High)?;
            assert_eq!((p.faulty(), p.threshold()), (f, high));
        }
        Ok(())
    }

    #[test]
    fn quorum_outside_rule_is_rejected() -> anyhow::Result<()> {
        assert_eq!(ThresholdParams::with_quorum(4, 3)?.kind(), ThresholdKind::High);
        assert_eq!(ThresholdParams::with_quorum(4, 2)?.kind(), ThresholdKind::Low);
        assert!(matches!(
            ThresholdParams::with_quorum(4, 4),
            Err(CryptoError::IncorrectParameters(_))
        ));
        assert!(ThresholdParams::new(0, ThresholdKind::Low).is_err());
        assert!(ThresholdParams::new(70_000, ThresholdKind::Low).is_err());
        Ok(())
    }

    #[test]
    fn kind_names() -> anyhow::Result<()> {
        assert_eq!(ThresholdKind::Low.to_string(), "f+1");
        assert_eq!("2f+1".parse::<ThresholdKind>()?, ThresholdKind::High);
        assert!("3f+1".parse::<ThresholdKind>().is_err());
        Ok(())
    }

    #[test]
    fn serde() -> anyhow::Result<()> {
        let params = ThresholdParams::new(7, ThresholdKind::High)?;
        let json = serde_json::to_string(&params)?;
        assert_eq!(json, r#"{"share_count":7,"kind":"2f+1"}"#);

        let result: ThresholdParams = serde_json::from_str(&json)?;
        assert_eq!(result, params);
        assert_eq!(result.threshold(), 5);

        assert!(serde_json::from_str::<ThresholdParams>(r#"{"share_count":0,"kind":"f+1"}"#).is_err());
        Ok(())
    }
}
