//! Threshold BLS provider of a single node
//!
//! Partial signature of node `i` over message `m` is $` \sigma_i = s_i \cdot H(m) `$ where $` s_i `$ is the private share of the node.
//! It is checked with the pairing equation $` e(\sigma_i, g_2) = e(H(m), P_i) `$ against the public share $` P_i `$
//! derived from the commitment. Any `t` partial signatures interpolate at zero into $` \sigma = s \cdot H(m) `$,
//! an ordinary BLS signature under the group public key.
use crate::algorithms::hash::Suite;
use crate::algorithms::{interpolate_at_zero_in_g1, share_point};
use crate::tbls::keys::{PrivateShare, PrivateShareRecord, PublicCommitment, PublicShareRecord};
use crate::tbls::{
    CombinedSignature, CryptoError, CryptoProvider, PartialSignature, ThresholdParams,
    INDEX_LENGTH, PARTIAL_SIGNATURE_LENGTH, SIGNATURE_LENGTH,
};
use bls12_381::{pairing, G1Affine, G1Projective, G2Affine};
use std::convert::{TryFrom, TryInto};

/// Implements [`CryptoProvider`] for one node
///
/// The provider is immutable: the suite, the parameters and the key material are fixed at construction.
///
/// [`CryptoProvider`]: ../trait.CryptoProvider.html
#[derive(Debug)]
pub struct TblsProvider {
    suite: Suite,
    params: ThresholdParams,
    private_share: PrivateShare,
    commitment: PublicCommitment,
    public_shares: Vec<G2Affine>,
    group_public_key: G2Affine,
}

impl TblsProvider {
    /// Creates the provider conditioned the key material is consistent with the parameters
    ///
    /// The commitment must have exactly `t` coefficients, the share index must be less than `n`,
    /// and the private share must match its public share.
    pub fn new(
        suite: Suite,
        params: ThresholdParams,
        private_share: PrivateShare,
        commitment: PublicCommitment,
    ) -> Result<Self, CryptoError> {
        if commitment.threshold() != params.threshold() {
            return Err(CryptoError::InvalidKey(format!(
                "commitment of degree {} does not match threshold {}",
                commitment.threshold() - 1,
                params.threshold()
            )));
        }
        if private_share.index() >= params.share_count() {
            return Err(CryptoError::InvalidKey(format!(
                "share index {} is out of range 0..{}",
                private_share.index(),
                params.share_count()
            )));
        }

        let public_shares = commitment
            .public_shares(params.share_count())
            .into_iter()
            .map(|s| s.point)
            .collect::<Vec<_>>();
        if private_share.public_share().point != public_shares[private_share.index()] {
            return Err(CryptoError::InvalidKey(format!(
                "private share {} does not match the commitment",
                private_share.index()
            )));
        }
        let group_public_key = commitment.group_public_key();

        log::debug!(
            "threshold provider of node {} created, {}",
            private_share.index(),
            params
        );

        Ok(TblsProvider {
            suite,
            params,
            private_share,
            commitment,
            public_shares,
            group_public_key,
        })
    }

    /// Creates the provider from the handoff records of the key distribution
    pub fn from_records(
        suite: Suite,
        params: ThresholdParams,
        private_share: &PrivateShareRecord,
        public_shares: &[PublicShareRecord],
    ) -> Result<Self, CryptoError> {
        let commitment = PublicCommitment::from_records(public_shares, &params)?;
        let private_share = PrivateShare::from_record(private_share)?;
        Self::new(suite, params, private_share, commitment)
    }

    pub fn params(&self) -> &ThresholdParams {
        &self.params
    }

    pub fn index(&self) -> usize {
        self.private_share.index()
    }

    pub fn suite(&self) -> &Suite {
        &self.suite
    }

    pub fn commitment(&self) -> &PublicCommitment {
        &self.commitment
    }

    pub fn group_public_key(&self) -> &G2Affine {
        &self.group_public_key
    }

    fn verify_pairing(&self, message: &[u8], signature: &G1Affine, key: &G2Affine) -> bool {
        let hash = self.suite.hash_to_g1(message);
        pairing(signature, &G2Affine::generator()) == pairing(&hash, key)
    }
}

/// Decodes a compressed point of G1, rejecting the identity
fn decode_signature(bytes: &[u8]) -> Option<G1Affine> {
    let bytes: [u8; SIGNATURE_LENGTH] = bytes.try_into().ok()?;
    Option::<G1Affine>::from(G1Affine::from_compressed(&bytes))
        .filter(|point| !bool::from(point.is_identity()))
}

/// Splits the partial signature into the index of the signer and the signature point
fn decode_share(share: &[u8]) -> Option<(usize, G1Affine)> {
    if share.len() != PARTIAL_SIGNATURE_LENGTH {
        return None;
    }
    let (index, point) = share.split_at(INDEX_LENGTH);
    let index = usize::from(u16::from_be_bytes([index[0], index[1]]));
    decode_signature(point).map(|point| (index, point))
}

impl CryptoProvider for TblsProvider {
    fn compute_share(&self, message: &[u8]) -> Result<PartialSignature, CryptoError> {
        let index = u16::try_from(self.private_share.index()).map_err(|_| {
            CryptoError::Internal(format!(
                "share index {} cannot be encoded",
                self.private_share.index()
            ))
        })?;

        let hash = self.suite.hash_to_g1(message);
        let signature = G1Affine::from(hash * self.private_share.scalar());
        if bool::from(signature.is_identity()) {
            return Err(CryptoError::Internal(format!(
                "degenerate partial signature of node {}",
                index
            )));
        }

        let mut bytes = Vec::with_capacity(PARTIAL_SIGNATURE_LENGTH);
        bytes.extend_from_slice(&index.to_be_bytes());
        bytes.extend_from_slice(&signature.to_compressed());
        Ok(PartialSignature::from(bytes))
    }

    fn verify_share(&self, message: &[u8], share: &[u8]) -> bool {
        let (index, signature) = match decode_share(share) {
            Some(decoded) => decoded,
            None => {
                log::trace!("node {}: malformed partial signature", self.index());
                return false;
            }
        };
        match self.public_shares.get(index) {
            Some(key) => self.verify_pairing(message, &signature, key),
            None => {
                log::trace!(
                    "node {}: partial signature of unknown node {}",
                    self.index(),
                    index
                );
                false
            }
        }
    }

    fn combine(
        &self,
        message: &[u8],
        shares: &[PartialSignature],
    ) -> Result<CombinedSignature, CryptoError> {
        let threshold = self.params.threshold();
        let mut distinct: Vec<(usize, G1Affine)> = Vec::with_capacity(threshold);

        for share in shares {
            let (index, point) = decode_share(share.as_bytes()).ok_or_else(|| {
                CryptoError::Combination(format!("malformed partial signature {}", share))
            })?;
            if index >= self.params.share_count() {
                return Err(CryptoError::Combination(format!(
                    "partial signature index {} is out of range 0..{}",
                    index,
                    self.params.share_count()
                )));
            }
            if distinct.iter().any(|(i, _)| *i == index) {
                continue;
            }
            distinct.push((index, point));
            if distinct.len() == threshold {
                break;
            }
        }

        if distinct.len() < threshold {
            return Err(CryptoError::InsufficientShares {
                got: distinct.len(),
                required: threshold,
            });
        }

        let points = distinct
            .iter()
            .map(|(index, point)| (share_point(*index), G1Projective::from(point)))
            .collect::<Vec<_>>();
        let signature = interpolate_at_zero_in_g1(&points).ok_or_else(|| {
            CryptoError::Combination("cannot interpolate partial signatures".to_owned())
        })?;

        log::trace!(
            "node {}: combined {} partial signatures over {} bytes",
            self.index(),
            threshold,
            message.len()
        );
        Ok(CombinedSignature::from(
            G1Affine::from(signature).to_compressed().to_vec(),
        ))
    }

    fn verify_signature(&self, message: &[u8], signature: &[u8]) -> bool {
        match decode_signature(signature) {
            Some(signature) => self.verify_pairing(message, &signature, &self.group_public_key),
            None => false,
        }
    }
}
