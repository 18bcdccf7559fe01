//! Polynomial arithmetic over the scalar field of BLS12-381 and hashing onto the curve
//!
//! Shares are points on a polynomial evaluated at $` x = index + 1 `$, so that no share ever sits at
//! $` x = 0 `$ where the shared secret lives. The helpers below evaluate such polynomials, both with
//! scalar coefficients (private side) and with coefficients in the groups (public side),
//! and interpolate them back.
pub mod hash;

use bls12_381::{G1Projective, G2Projective, Scalar};
use ff::Field;

/// x coordinate of the share with zero-based `index`
pub fn share_point(index: usize) -> Scalar {
    Scalar::from(index as u64 + 1)
}

/// Evaluates the polynomial with `coefficients` (lowest degree first) at `x` using Horner's rule
pub fn evaluate(coefficients: &[Scalar], x: &Scalar) -> Scalar {
    coefficients
        .iter()
        .rev()
        .fold(Scalar::ZERO, |acc, c| acc * x + c)
}

/// Evaluates the polynomial whose coefficients are points of G2
pub fn evaluate_in_g2(coefficients: &[G2Projective], x: &Scalar) -> G2Projective {
    coefficients
        .iter()
        .rev()
        .fold(G2Projective::identity(), |acc, c| acc * x + c)
}

/// Computes Lagrange coefficients for interpolation at zero
///
/// For distinct x coordinates $` x_0 \ldots x_{k-1} `$ returns
/// $` \lambda_i = \prod_{j \ne i} \frac{x_j}{x_j - x_i} `$.
/// Returns `None` if two coordinates coincide.
pub fn lagrange_coefficients_at_zero(xs: &[Scalar]) -> Option<Vec<Scalar>> {
    xs.iter()
        .enumerate()
        .map(|(i, x_i)| {
            let (numerator, denominator) = xs
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .fold((Scalar::ONE, Scalar::ONE), |(num, den), (_, x_j)| {
                    (num * x_j, den * (x_j - x_i))
                });
            Option::<Scalar>::from(denominator.invert()).map(|inverse| numerator * inverse)
        })
        .collect()
}

/// Interpolates the value at zero of the polynomial in G1 passing through `points`
pub fn interpolate_at_zero_in_g1(points: &[(Scalar, G1Projective)]) -> Option<G1Projective> {
    let xs = points.iter().map(|(x, _)| *x).collect::<Vec<_>>();
    let lambdas = lagrange_coefficients_at_zero(&xs)?;

    Some(
        points
            .iter()
            .zip(lambdas.iter())
            .fold(G1Projective::identity(), |acc, ((_, y), lambda)| {
                acc + y * lambda
            }),
    )
}

/// Recovers all coefficients of the polynomial in G2 passing through `points`
///
/// The polynomial has degree `points.len() - 1`. Each Lagrange basis polynomial
/// $` L_i(x) = \prod_{j \ne i} \frac{x - x_j}{x_i - x_j} `$ is expanded into scalar coefficients,
/// which then weight the point $` y_i `$.
pub fn interpolate_coefficients_in_g2(points: &[(Scalar, G2Projective)]) -> Option<Vec<G2Projective>> {
    let mut coefficients = vec![G2Projective::identity(); points.len()];

    for (i, (x_i, y_i)) in points.iter().enumerate() {
        let mut basis = vec![Scalar::ONE];
        let mut denominator = Scalar::ONE;
        for (j, (x_j, _)) in points.iter().enumerate() {
            if i == j {
                continue;
            }
            basis = multiply_by_monic_linear(&basis, x_j);
            denominator *= x_i - x_j;
        }
        let inverse = Option::<Scalar>::from(denominator.invert())?;
        for (k, b) in basis.iter().enumerate() {
            coefficients[k] += y_i * (b * inverse);
        }
    }

    Some(coefficients)
}

/// Multiplies the polynomial by $` (x - root) `$
fn multiply_by_monic_linear(poly: &[Scalar], root: &Scalar) -> Vec<Scalar> {
    let mut result = vec![Scalar::ZERO; poly.len() + 1];
    for (k, c) in poly.iter().enumerate() {
        result[k + 1] += c;
        result[k] -= c * root;
    }
    result
}
