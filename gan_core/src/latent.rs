//! Latent vectors and the categorical code that steers them.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SynthError};

/// Number of values in a latent vector.
pub const LATENT_DIM: usize = 100;
/// Number of binary values in a categorical code.
pub const CODE_LEN: usize = 16;

/// A validated 16-element binary code written over the latent prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CategoricalCode([u8; CODE_LEN]);

impl CategoricalCode {
    /// Validate a code received from a caller. Rejects wrong lengths and any
    /// value outside {0, 1}.
    pub fn from_values(values: &[i64]) -> Result<Self> {
        if values.len() != CODE_LEN {
            return Err(SynthError::InvalidInput(format!(
                "categorical code must have {} values, got {}",
                CODE_LEN,
                values.len()
            )));
        }
        let mut bits = [0u8; CODE_LEN];
        for (i, &v) in values.iter().enumerate() {
            bits[i] = match v {
                0 => 0,
                1 => 1,
                other => {
                    return Err(SynthError::InvalidInput(format!(
                        "categorical code value at position {} must be 0 or 1, got {}",
                        i, other
                    )))
                }
            };
        }
        Ok(Self(bits))
    }

    /// Draw a uniformly random code.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut bits = [0u8; CODE_LEN];
        for b in bits.iter_mut() {
            *b = rng.gen_range(0..=1);
        }
        Self(bits)
    }

    pub fn bits(&self) -> &[u8; CODE_LEN] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<i64> {
        self.0.iter().map(|&b| b as i64).collect()
    }
}

impl TryFrom<&[i64]> for CategoricalCode {
    type Error = SynthError;

    fn try_from(values: &[i64]) -> Result<Self> {
        Self::from_values(values)
    }
}

/// A 100-value generator input in [-1, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LatentVector(Vec<f32>);

impl LatentVector {
    /// Validate a caller-supplied latent.
    pub fn from_slice(values: &[f32]) -> Result<Self> {
        if values.len() != LATENT_DIM {
            return Err(SynthError::InvalidInput(format!(
                "latent vector must have {} values, got {}",
                LATENT_DIM,
                values.len()
            )));
        }
        if let Some(pos) = values
            .iter()
            .position(|v| !v.is_finite() || *v < -1.0 || *v > 1.0)
        {
            return Err(SynthError::InvalidInput(format!(
                "latent value at position {} is outside [-1, 1]: {}",
                pos, values[pos]
            )));
        }
        Ok(Self(values.to_vec()))
    }

    /// Sample every position uniformly from [-1, 1].
    pub fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self((0..LATENT_DIM).map(|_| rng.gen_range(-1.0f32..=1.0)).collect())
    }

    /// Sample a latent and write `code` over its prefix.
    pub fn from_code<R: Rng + ?Sized>(code: &CategoricalCode, rng: &mut R) -> Self {
        Self::sample(rng).with_code(code)
    }

    /// Like [`LatentVector::from_code`] with a dedicated RNG: seeded when a seed
    /// is given, otherwise from OS entropy.
    pub fn from_code_seeded(code: &CategoricalCode, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::from_code(code, &mut rng)
    }

    /// Draw a random code, then the latent it is written into, both from one
    /// RNG seeded by `seed` (entropy when `None`).
    pub fn random_with_code(seed: Option<u64>) -> (CategoricalCode, Self) {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let code = CategoricalCode::random(&mut rng);
        let latent = Self::from_code(&code, &mut rng);
        (code, latent)
    }

    /// Overwrite the first [`CODE_LEN`] positions with `code`.
    pub fn with_code(mut self, code: &CategoricalCode) -> Self {
        for (slot, &bit) in self.0.iter_mut().zip(code.bits().iter()) {
            *slot = bit as f32;
        }
        self
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.0
    }
}
