//! Trusted dealer
//!
//! Generates the key material of a group in one place: samples the secret polynomial of degree `t-1`,
//! computes the private share of every node and commits to the polynomial in G2.
//! The dealer has to be trusted not to keep the secret, it is meant for test networks and for
//! one-off setups where the shares are distributed to the nodes afterwards.
use crate::algorithms::{evaluate, share_point};
use crate::tbls::keys::{PrivateShare, PrivateShareRecord, PublicCommitment, PublicShareRecord};
use crate::tbls::ThresholdParams;
use bls12_381::{G2Affine, Scalar};
use ff::Field;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroize;

/// Secret polynomial, erased on drop
struct SecretPolynomial(Vec<Scalar>);

impl Zeroize for SecretPolynomial {
    fn zeroize(&mut self) {
        self.0.iter_mut().for_each(|c| *c = Scalar::ZERO);
    }
}

impl Drop for SecretPolynomial {
    fn drop(&mut self) {
        self.zeroize();
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Dealer {
    params: ThresholdParams,
}

impl Dealer {
    pub fn new(params: ThresholdParams) -> Self {
        Dealer { params }
    }

    pub fn params(&self) -> &ThresholdParams {
        &self.params
    }

    /// Samples a fresh group key and shares it among `n` nodes
    pub fn deal<R: RngCore + CryptoRng>(&self, rng: &mut R) -> (Vec<PrivateShare>, PublicCommitment) {
        let poly = SecretPolynomial(
            (0..self.params.threshold())
                .map(|_| Scalar::random(&mut *rng))
                .collect(),
        );

        let shares = (0..self.params.share_count())
            .map(|i| PrivateShare::new(i, evaluate(&poly.0, &share_point(i))))
            .collect();

        let commitment = PublicCommitment {
            coefficients: poly.0.iter().map(|a| G2Affine::generator() * a).collect(),
        };

        log::debug!("dealt key shares for {}", self.params);
        (shares, commitment)
    }

    /// Same as [`deal`], with the output in form of handoff records
    ///
    /// [`deal`]: #method.deal
    pub fn deal_records<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
    ) -> (Vec<PrivateShareRecord>, Vec<PublicShareRecord>) {
        let (shares, commitment) = self.deal(rng);
        (
            shares.iter().map(PrivateShare::to_record).collect(),
            commitment.to_records(self.params.share_count()),
        )
    }
}
