//! Chaos Image Pipeline - Key Material
//!
//! A key is the pair of logistic-map parameters `(x0, mu)`, kept in the
//! decimal-string form it was supplied or generated in.

use std::fmt;
use std::hash::{Hash, Hasher};

use rand::Rng;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{PipelineError, PipelineResult};

/// Lower bound of the chaotic regime of the logistic map
pub const MIN_MU: f64 = 3.57;

/// Upper bound (exclusive) of the logistic map parameter
pub const MAX_MU: f64 = 4.0;

/// Smallest digit allowed as the first generated decimal
const MIN_LEADING_DIGIT: u32 = 5;

/// Largest digit allowed as the first generated decimal
const MAX_LEADING_DIGIT: u32 = 9;

/// Fixed key used by batch runs unless a fresh key is requested
pub mod fixed {
    pub const X0: &str = "0.776129673739571545164782701951000816488709002838321334050408728659596467124659438412371823627863280e-1";
    pub const MU: &str = "3.669367621207023984299275643031978184898674105584480292875745487930315472819066461859774116271133194e0";
}

/// Immutable chaotic-map key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CryptoKey {
    x0: String,
    mu: String,
    x0_value: f64,
    mu_value: f64,
}

impl CryptoKey {
    /// Build a key from decimal strings, validating the map domain
    pub fn build(x0: &str, mu: &str) -> PipelineResult<Self> {
        let x0_value = parse_param("x0", x0)?;
        let mu_value = parse_param("mu", mu)?;

        if !(x0_value > 0.0 && x0_value < 1.0) {
            return Err(PipelineError::InvalidKeyParameter {
                name: "x0",
                value: x0.to_string(),
                reason: "must lie in (0, 1)".into(),
            });
        }

        if !(MIN_MU..MAX_MU).contains(&mu_value) {
            return Err(PipelineError::InvalidKeyParameter {
                name: "mu",
                value: mu.to_string(),
                reason: format!("must lie in [{}, {})", MIN_MU, MAX_MU),
            });
        }

        Ok(Self {
            x0: x0.trim().to_string(),
            mu: mu.trim().to_string(),
            x0_value,
            mu_value,
        })
    }

    /// The key every batch run uses by default
    pub fn fixed() -> PipelineResult<Self> {
        Self::build(fixed::X0, fixed::MU)
    }

    /// Generate a fresh key with the given number of decimal digits
    ///
    /// Strings follow the `0.<digits>e-1` / `3.<digits>e0` shape; candidates
    /// outside the map domain are drawn again.
    pub fn generate(precision_x: usize, precision_mu: usize) -> PipelineResult<Self> {
        if precision_x < 2 || precision_mu < 2 {
            return Err(PipelineError::InvalidKeyParameter {
                name: "precision",
                value: format!("{}/{}", precision_x, precision_mu),
                reason: "at least two digits are required".into(),
            });
        }

        let mut rng = rand::rngs::OsRng;
        loop {
            let x0 = format!("0.{}e-1", random_digits(&mut rng, precision_x));
            let mu = format!("3.{}e0", random_digits(&mut rng, precision_mu));

            match Self::build(&x0, &mu) {
                Ok(key) => return Ok(key),
                Err(_) => continue,
            }
        }
    }

    /// Initial condition as supplied
    pub fn x0(&self) -> &str {
        &self.x0
    }

    /// Map parameter as supplied
    pub fn mu(&self) -> &str {
        &self.mu
    }

    /// Initial condition as a float
    pub fn x0_value(&self) -> f64 {
        self.x0_value
    }

    /// Map parameter as a float
    pub fn mu_value(&self) -> f64 {
        self.mu_value
    }

    /// Short SHA-256 fingerprint, safe to log
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.x0.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.mu.as_bytes());
        hex::encode(&hasher.finalize()[..8])
    }
}

impl PartialEq for CryptoKey {
    fn eq(&self, other: &Self) -> bool {
        self.x0 == other.x0 && self.mu == other.mu
    }
}

impl Eq for CryptoKey {}

impl Hash for CryptoKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.x0.hash(state);
        self.mu.hash(state);
    }
}

impl fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoKey")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

fn parse_param(name: &'static str, value: &str) -> PipelineResult<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::InvalidKeyParameter {
            name,
            value: value.to_string(),
            reason: "cannot be empty".into(),
        });
    }

    let parsed: f64 = trimmed.parse().map_err(|e: std::num::ParseFloatError| {
        PipelineError::InvalidKeyParameter {
            name,
            value: value.to_string(),
            reason: e.to_string(),
        }
    })?;

    if !parsed.is_finite() {
        return Err(PipelineError::InvalidKeyParameter {
            name,
            value: value.to_string(),
            reason: "must be finite".into(),
        });
    }

    Ok(parsed)
}

fn random_digits<R: Rng>(rng: &mut R, precision: usize) -> String {
    (1..precision)
        .map(|i| {
            let digit = if i == 1 {
                rng.gen_range(MIN_LEADING_DIGIT..=MAX_LEADING_DIGIT)
            } else {
                rng.gen_range(0..10)
            };
            char::from_digit(digit, 10).unwrap_or('0')
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_accepts_scientific_notation() {
        let key = CryptoKey::build("5.55555555555555555556e-1", "3.577777777777777777e0").unwrap();
        assert!((key.x0_value() - 0.5555555555555556).abs() < 1e-12);
        assert!((key.mu_value() - 3.5777777777777778).abs() < 1e-12);
    }

    #[test]
    fn test_build_rejects_out_of_domain() {
        assert!(matches!(
            CryptoKey::build("1.5", "3.7"),
            Err(PipelineError::InvalidKeyParameter { name: "x0", .. })
        ));
        assert!(matches!(
            CryptoKey::build("0.5", "4.0"),
            Err(PipelineError::InvalidKeyParameter { name: "mu", .. })
        ));
        assert!(matches!(
            CryptoKey::build("0.5", "three"),
            Err(PipelineError::InvalidKeyParameter { name: "mu", .. })
        ));
        assert!(CryptoKey::build("", "3.7").is_err());
    }

    #[test]
    fn test_fixed_key_is_valid() {
        let key = CryptoKey::fixed().unwrap();
        assert!(key.x0_value() > 0.07 && key.x0_value() < 0.08);
        assert_eq!(key, CryptoKey::fixed().unwrap());
    }

    #[test]
    fn test_generate_respects_precision_and_domain() {
        let key = CryptoKey::generate(72, 72).unwrap();

        assert!(key.x0().starts_with("0."));
        assert!(key.x0().ends_with("e-1"));
        assert!(key.mu().starts_with("3."));
        // "0." + 71 digits + "e-1"
        assert_eq!(key.x0().len(), 2 + 71 + 3);
        assert!(key.mu_value() >= MIN_MU && key.mu_value() < MAX_MU);

        let other = CryptoKey::generate(72, 72).unwrap();
        assert_ne!(key, other);
    }

    #[test]
    fn test_fingerprint_is_stable_and_hides_values() {
        let key = CryptoKey::fixed().unwrap();
        assert_eq!(key.fingerprint(), CryptoKey::fixed().unwrap().fingerprint());
        assert_eq!(key.fingerprint().len(), 16);
        assert!(!format!("{:?}", key).contains("776129"));
    }
}
