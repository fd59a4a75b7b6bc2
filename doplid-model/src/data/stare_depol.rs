use crate::data::{check_shape, Stare};
use crate::result::Result;
use ndarray::Array2;
use std::fmt::Debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A stare product extended with the depolarisation ratio derived from a co-polarised and a
/// cross-polarised stare. The cross-polarised backscatter is aligned onto the co-polarised time
/// grid; rows without an acceptable cross match are NaN and masked.
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StareDepol {
    stare: Stare,
    beta_cross: Array2<f64>,
    depolarisation: Array2<f64>,
    mask_beta_cross: Array2<bool>,
    mask_depolarisation: Array2<bool>,
    polariser_bleed_through: f64,
}

impl StareDepol {
    /// Create a new depolarisation product from a co-polarised stare and the aligned
    /// cross-polarised fields. Masks are widened so that every non-finite cell is masked.
    pub fn new(
        stare: Stare,
        beta_cross: Array2<f64>,
        depolarisation: Array2<f64>,
        mut mask_beta_cross: Array2<bool>,
        mut mask_depolarisation: Array2<bool>,
        polariser_bleed_through: f64,
    ) -> Result<Self> {
        let shape = (stare.ntime(), stare.ngates());
        check_shape("beta_cross", shape, beta_cross.dim())?;
        check_shape("depolarisation", shape, depolarisation.dim())?;
        check_shape("mask_beta_cross", shape, mask_beta_cross.dim())?;
        check_shape("mask_depolarisation", shape, mask_depolarisation.dim())?;

        ndarray::Zip::from(&mut mask_beta_cross)
            .and(&beta_cross)
            .for_each(|masked, value| *masked |= !value.is_finite());
        ndarray::Zip::from(&mut mask_depolarisation)
            .and(&depolarisation)
            .for_each(|masked, value| *masked |= !value.is_finite());

        Ok(Self {
            stare,
            beta_cross,
            depolarisation,
            mask_beta_cross,
            mask_depolarisation,
            polariser_bleed_through,
        })
    }

    /// The co-polarised stare this product extends.
    pub fn stare(&self) -> &Stare {
        &self.stare
    }

    /// Cross-polarised attenuated backscatter aligned onto the co-polarised time grid, in
    /// m⁻¹ sr⁻¹, shape (time, range).
    pub fn beta_cross(&self) -> &Array2<f64> {
        &self.beta_cross
    }

    /// Depolarisation ratio, shape (time, range).
    pub fn depolarisation(&self) -> &Array2<f64> {
        &self.depolarisation
    }

    /// Mask for the cross-polarised backscatter.
    pub fn mask_beta_cross(&self) -> &Array2<bool> {
        &self.mask_beta_cross
    }

    /// Mask for the depolarisation ratio.
    pub fn mask_depolarisation(&self) -> &Array2<bool> {
        &self.mask_depolarisation
    }

    /// Fraction of the co-polarised signal leaking into the cross-polarised channel.
    pub fn polariser_bleed_through(&self) -> f64 {
        self.polariser_bleed_through
    }
}

impl Debug for StareDepol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StareDepol")
            .field("stare", &self.stare)
            .field("polariser_bleed_through", &self.polariser_bleed_through)
            .finish()
    }
}
