//! Hashing messages onto G1
//!
//! Implements `BLS12381G1_XMD:SHA-256_SSWU_RO_` from the hash-to-curve draft, parameterized by a domain separation tag.
use bls12_381::hash_to_curve::{ExpandMsgXmd, HashToCurve};
use bls12_381::{G1Affine, G1Projective};
use sha2::Sha256;

/// Cipher suite of the threshold scheme
///
/// Holds the domain separation tag which is mixed into every message hash.
/// Each provider receives its own suite at construction, so providers configured with different tags
/// never accept each other's signatures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Suite {
    dst: Vec<u8>,
}

impl Suite {
    /// Tag of the basic BLS signature scheme with signatures in G1
    pub const DEFAULT_DST: &'static [u8] = b"BLS_SIG_BLS12381G1_XMD:SHA-256_SSWU_RO_NUL_";

    pub fn new(dst: impl Into<Vec<u8>>) -> Self {
        Suite { dst: dst.into() }
    }

    pub fn dst(&self) -> &[u8] {
        &self.dst
    }

    /// Maps the message to a point of G1
    pub fn hash_to_g1(&self, message: &[u8]) -> G1Affine {
        let point = <G1Projective as HashToCurve<ExpandMsgXmd<Sha256>>>::hash_to_curve(
            message,
            &self.dst,
        );
        G1Affine::from(point)
    }
}

impl Default for Suite {
    fn default() -> Self {
        Suite::new(Self::DEFAULT_DST)
    }
}

#[cfg(test)]
mod tests {
    use super::Suite;

    #[test]
    fn hashing_is_deterministic() {
        let suite = Suite::default();
        assert_eq!(suite.hash_to_g1(b"Hello world"), suite.hash_to_g1(b"Hello world"));
        assert_ne!(suite.hash_to_g1(b"Hello world"), suite.hash_to_g1(b"Hello World"));
    }

    #[test]
    fn tag_separates_domains() {
        let one = Suite::default();
        let other = Suite::new(&b"BFT_SUBSTRATE_TEST_DST_"[..]);
        assert_ne!(one, other);
        assert_ne!(one.hash_to_g1(b"msg"), other.hash_to_g1(b"msg"));
        assert!(!bool::from(one.hash_to_g1(b"").is_identity()));
    }
}
