//! Confidence matrix over network parameters.
//!
//! ```text
//!   U_0 = λ·I
//!   U_t = U_{t-1} + g gᵀ / m      (g = ∇θ f(x_t; θ))
//!   σ²(x) = λ · gᵀ U⁻¹ g / m
//! ```
//!
//! Only rank-1 positive semi-definite terms are ever added, so `U` stays
//! symmetric positive-definite for λ > 0 and its trace never decreases.

use nalgebra::{Cholesky, DMatrix, DVector, SymmetricEigen};

use crate::errors::{Error, Result};

#[derive(Debug, Clone)]
pub struct ConfidenceMatrix {
    u: DMatrix<f64>,
    lambda: f64,
    width: usize,
    updates: u64,
}

impl ConfidenceMatrix {
    /// `U = λ·I` of size `dimension × dimension`. `width` is the network width m.
    pub fn new(dimension: usize, lambda: f64, width: usize) -> Self {
        Self {
            u: DMatrix::identity(dimension, dimension) * lambda,
            lambda,
            width,
            updates: 0,
        }
    }

    pub fn dimension(&self) -> usize {
        self.u.nrows()
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.u
    }

    /// Number of rank-1 updates folded in so far.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn trace(&self) -> f64 {
        self.u.trace()
    }

    /// Dense inverse `U⁻¹` through a Cholesky factorization.
    ///
    /// Fails with [`Error::SingularMatrix`] when `U` is not numerically
    /// positive-definite or the inverse contains non-finite entries.
    pub fn inverse(&self) -> Result<DMatrix<f64>> {
        let singular = Error::SingularMatrix {
            dimension: self.dimension(),
        };
        let inverse = Cholesky::new(self.u.clone())
            .map(|c| c.inverse())
            .ok_or_else(|| singular.clone())?;
        if inverse.iter().all(|v| v.is_finite()) {
            Ok(inverse)
        } else {
            Err(singular)
        }
    }

    /// Exploration variance `λ·gᵀU⁻¹g/m` for a flattened gradient.
    pub fn variance(&self, gradient: &DVector<f64>, inverse: &DMatrix<f64>) -> Result<f64> {
        if gradient.len() != self.dimension() {
            return Err(Error::dimension("gradient length", self.dimension(), gradient.len()));
        }
        let quad = gradient.dot(&(inverse * gradient));
        let variance = self.lambda * quad / self.width as f64;
        if !variance.is_finite() {
            return Err(Error::SingularMatrix {
                dimension: self.dimension(),
            });
        }
        // Rounding can push a tiny quadratic form below zero.
        Ok(variance.max(0.0))
    }

    /// `U ← U + g gᵀ / m`.
    pub fn rank_one_update(&mut self, gradient: &DVector<f64>) -> Result<()> {
        if gradient.len() != self.dimension() {
            return Err(Error::dimension("gradient length", self.dimension(), gradient.len()));
        }
        let outer = gradient * gradient.transpose();
        self.u += outer / self.width as f64;
        self.updates += 1;
        Ok(())
    }

    /// Smallest eigenvalue of `U`.
    pub fn min_eigenvalue(&self) -> f64 {
        SymmetricEigen::new(self.u.clone())
            .eigenvalues
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min)
    }

    /// Whether `U` equals its transpose within `tolerance` entry-wise.
    pub fn is_symmetric(&self, tolerance: f64) -> bool {
        let n = self.dimension();
        (0..n).all(|i| (i + 1..n).all(|j| (self.u[(i, j)] - self.u[(j, i)]).abs() <= tolerance))
    }
}
