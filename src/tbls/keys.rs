//! Key material of the threshold scheme
//!
//! The private side is the share of a single node, the public side is the commitment to the
//! sharing polynomial, which is common to all nodes.
//! Both are handed over to the provider by an external key distribution step in form of records with hex encoded bytes.
use crate::algorithms::{evaluate_in_g2, interpolate_coefficients_in_g2, share_point};
use crate::tbls::{CryptoError, ThresholdParams};
use bls12_381::{G2Affine, G2Projective, Scalar};
use ff::Field;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::TryInto;
use std::fmt;
use zeroize::Zeroize;

/// Length of a compressed G2 point
pub const PUBLIC_SHARE_LENGTH: usize = 96;
/// Length of a serialized scalar
pub const PRIVATE_SHARE_LENGTH: usize = 32;

/// Serializes byte vectors as hex strings
pub(crate) mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(|e| de::Error::custom(format!("invalid hex string: {}", e)))
    }
}

/// Share of the group private key owned by a single node
///
/// `scalar` is the evaluation of the sharing polynomial at $` x = index + 1 `$.
#[derive(Clone)]
pub struct PrivateShare {
    index: usize,
    scalar: Scalar,
}

impl PrivateShare {
    pub fn new(index: usize, scalar: Scalar) -> Self {
        PrivateShare { index, scalar }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn scalar(&self) -> &Scalar {
        &self.scalar
    }

    /// Public counterpart of the share
    pub fn public_share(&self) -> PublicShare {
        PublicShare {
            index: self.index,
            point: G2Affine::from(G2Affine::generator() * self.scalar),
        }
    }

    pub fn to_record(&self) -> PrivateShareRecord {
        PrivateShareRecord {
            index: self.index,
            scalar: self.scalar.to_bytes().to_vec(),
        }
    }

    pub fn from_record(record: &PrivateShareRecord) -> Result<Self, CryptoError> {
        let bytes: [u8; PRIVATE_SHARE_LENGTH] =
            record.scalar.as_slice().try_into().map_err(|_| {
                CryptoError::InvalidKey(format!(
                    "private share {} must be {} bytes long, got {}",
                    record.index,
                    PRIVATE_SHARE_LENGTH,
                    record.scalar.len()
                ))
            })?;
        let scalar = Option::<Scalar>::from(Scalar::from_bytes(&bytes)).ok_or_else(|| {
            CryptoError::InvalidKey(format!("private share {} is not a canonical scalar", record.index))
        })?;
        Ok(PrivateShare::new(record.index, scalar))
    }
}

impl Zeroize for PrivateShare {
    fn zeroize(&mut self) {
        self.scalar = Scalar::ZERO;
        self.index.zeroize();
    }
}

impl Drop for PrivateShare {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl fmt::Debug for PrivateShare {
    /// hides the scalar
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateShare")
            .field("index", &self.index)
            .field("scalar", &"[***]".to_owned())
            .finish()
    }
}

/// Public share of a node, allows to verify its partial signatures
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PublicShare {
    pub index: usize,
    pub point: G2Affine,
}

impl PublicShare {
    pub fn to_record(&self) -> PublicShareRecord {
        PublicShareRecord {
            index: self.index,
            point: self.point.to_compressed().to_vec(),
        }
    }

    pub fn from_record(record: &PublicShareRecord) -> Result<Self, CryptoError> {
        let bytes: [u8; PUBLIC_SHARE_LENGTH] =
            record.point.as_slice().try_into().map_err(|_| {
                CryptoError::InvalidKey(format!(
                    "public share {} must be {} bytes long, got {}",
                    record.index,
                    PUBLIC_SHARE_LENGTH,
                    record.point.len()
                ))
            })?;
        let point = Option::<G2Affine>::from(G2Affine::from_compressed(&bytes)).ok_or_else(|| {
            CryptoError::InvalidKey(format!("public share {} is not a point of G2", record.index))
        })?;
        Ok(PublicShare {
            index: record.index,
            point,
        })
    }
}

/// Commitment to the sharing polynomial
///
/// Coefficients $` c_k = a_k \cdot g_2 `$ of the private polynomial $` \sum a_k x^k `$ lifted to G2.
/// Evaluating it at $` x = index + 1 `$ yields the public share of a node, evaluating at zero yields the public key of the group.
#[derive(Clone, Debug, PartialEq)]
pub struct PublicCommitment {
    pub(crate) coefficients: Vec<G2Projective>,
}

impl PublicCommitment {
    pub fn new(coefficients: Vec<G2Projective>) -> Result<Self, CryptoError> {
        if coefficients.is_empty() {
            return Err(CryptoError::InvalidKey(
                "commitment has no coefficients".to_owned(),
            ));
        }
        Ok(PublicCommitment { coefficients })
    }

    /// Number of coefficients, which is the quorum size `t`
    pub fn threshold(&self) -> usize {
        self.coefficients.len()
    }

    pub fn coefficients(&self) -> &[G2Projective] {
        &self.coefficients
    }

    pub fn public_share(&self, index: usize) -> PublicShare {
        PublicShare {
            index,
            point: G2Affine::from(evaluate_in_g2(&self.coefficients, &share_point(index))),
        }
    }

    /// Public shares of nodes `0..share_count`
    pub fn public_shares(&self, share_count: usize) -> Vec<PublicShare> {
        (0..share_count).map(|i| self.public_share(i)).collect()
    }

    pub fn group_public_key(&self) -> G2Affine {
        G2Affine::from(self.coefficients[0])
    }

    /// Rebuilds the commitment from public shares of the nodes
    ///
    /// Interpolates the coefficients from the first `t` shares with distinct indices,
    /// then checks that every supplied share lies on the rebuilt polynomial.
    pub fn from_public_shares(
        shares: &[PublicShare],
        params: &ThresholdParams,
    ) -> Result<Self, CryptoError> {
        let mut distinct = BTreeMap::new();
        for share in shares {
            if share.index >= params.share_count() {
                return Err(CryptoError::InvalidKey(format!(
                    "public share index {} is out of range 0..{}",
                    share.index,
                    params.share_count()
                )));
            }
            distinct.entry(share.index).or_insert(share.point);
        }

        if distinct.len() < params.threshold() {
            return Err(CryptoError::InvalidKey(format!(
                "{} public shares cannot define a polynomial of degree {}",
                distinct.len(),
                params.threshold() - 1
            )));
        }

        let points = distinct
            .iter()
            .take(params.threshold())
            .map(|(&index, point)| (share_point(index), G2Projective::from(point)))
            .collect::<Vec<_>>();

        let coefficients = interpolate_coefficients_in_g2(&points).ok_or_else(|| {
            CryptoError::InvalidKey("cannot interpolate public shares".to_owned())
        })?;
        let commitment = PublicCommitment::new(coefficients)?;

        if let Some(share) = shares
            .iter()
            .find(|s| commitment.public_share(s.index).point != s.point)
        {
            return Err(CryptoError::InvalidKey(format!(
                "public share {} is inconsistent with other shares",
                share.index
            )));
        }

        Ok(commitment)
    }

    /// Rebuilds the commitment from the handoff records
    pub fn from_records(
        records: &[PublicShareRecord],
        params: &ThresholdParams,
    ) -> Result<Self, CryptoError> {
        let shares = records
            .iter()
            .map(PublicShare::from_record)
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_public_shares(&shares, params)
    }

    pub fn to_records(&self, share_count: usize) -> Vec<PublicShareRecord> {
        self.public_shares(share_count)
            .iter()
            .map(PublicShare::to_record)
            .collect()
    }
}

/// Handoff record of a private share
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
#[zeroize(drop)]
pub struct PrivateShareRecord {
    pub index: usize,
    #[serde(with = "hex_bytes")]
    pub scalar: Vec<u8>,
}

impl fmt::Debug for PrivateShareRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateShareRecord")
            .field("index", &self.index)
            .field("scalar", &"[***]".to_owned())
            .finish()
    }
}

/// Handoff record of a public share
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicShareRecord {
    pub index: usize,
    #[serde(with = "hex_bytes")]
    pub point: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tbls::dealer::Dealer;
    use crate::tbls::ThresholdKind;
    use rand::thread_rng;

    #[test]
    fn commitment_recovered_from_records() -> anyhow::Result<()> {
        let params = ThresholdParams::new(7, ThresholdKind::High)?;
        let (_, commitment) = Dealer::new(params).deal(&mut thread_rng());

        let json = serde_json::to_string(&commitment.to_records(params.share_count()))?;
        let records: Vec<PublicShareRecord> = serde_json::from_str(&json)?;
        let recovered = PublicCommitment::from_records(&records, &params)?;

        assert_eq!(recovered, commitment);
        assert_eq!(recovered.group_public_key(), commitment.group_public_key());
        Ok(())
    }

    #[test]
    fn inconsistent_public_share_is_rejected() -> anyhow::Result<()> {
        let params = ThresholdParams::new(4, ThresholdKind::Low)?;
        let (_, commitment) = Dealer::new(params).deal(&mut thread_rng());

        let mut shares = commitment.public_shares(params.share_count());
        shares[3].point = shares[0].point;

        assert!(matches!(
            PublicCommitment::from_public_shares(&shares, &params),
            Err(CryptoError::InvalidKey(_))
        ));
        assert!(PublicCommitment::from_public_shares(&shares[..1], &params).is_err());
        Ok(())
    }

    #[test]
    fn private_share_record() -> anyhow::Result<()> {
        let params = ThresholdParams::new(4, ThresholdKind::Low)?;
        let (private_shares, commitment) = Dealer::new(params).deal(&mut thread_rng());

        let json = serde_json::to_string(&private_shares[2].to_record())?;
        let record: PrivateShareRecord = serde_json::from_str(&json)?;
        let share = PrivateShare::from_record(&record)?;

        assert_eq!(share.index(), 2);
        assert_eq!(share.public_share(), commitment.public_share(2));
        assert!(!format!("{:?}", share).contains(&hex::encode(share.scalar().to_bytes())));

        let truncated = PrivateShareRecord {
            index: 2,
            scalar: record.scalar[1..].to_vec(),
        };
        assert!(PrivateShare::from_record(&truncated).is_err());
        Ok(())
    }

    #[test]
    fn malformed_public_record() {
        let record = PublicShareRecord {
            index: 0,
            point: vec![0xff; PUBLIC_SHARE_LENGTH],
        };
        assert!(PublicShare::from_record(&record).is_err());
    }
}
