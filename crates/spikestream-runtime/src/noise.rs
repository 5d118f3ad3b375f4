//! Random noise injection

use crate::error::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use spikestream_storage::{NoiseInjection, NoiseMode, NoiseParameters};

/// Chooses neurons to perturb
#[derive(Debug)]
pub struct NoiseGenerator {
    rng: StdRng,
    params: NoiseParameters,
}

impl NoiseGenerator {
    /// Create a generator; without a seed it draws from OS entropy
    pub fn new(params: NoiseParameters, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng, params }
    }

    /// Replace the configuration
    pub fn set_parameters(&mut self, params: NoiseParameters) {
        self.params = params;
    }

    /// Current configuration
    pub fn parameters(&self) -> &NoiseParameters {
        &self.params
    }

    /// Whether noise is injected every step
    pub fn enabled(&self) -> bool {
        self.params.enabled
    }

    /// What injected neurons receive
    pub fn injection(&self) -> NoiseInjection {
        self.params.injection
    }

    /// Check a mode before use
    pub fn validate(mode: NoiseMode) -> Result<()> {
        if let NoiseMode::Percentage(percent) = mode {
            if !(percent > 0.0 && percent <= 100.0) {
                return Err(RuntimeError::validation(format!(
                    "noise percentage {} outside (0, 100]",
                    percent
                )));
            }
        }
        Ok(())
    }

    /// Local indices selected from a population of `population` neurons
    pub fn select(&mut self, mode: NoiseMode, population: usize) -> Result<Vec<usize>> {
        Self::validate(mode)?;
        if population == 0 {
            return Ok(Vec::new());
        }
        let selected = match mode {
            NoiseMode::SingleNeuron => vec![self.rng.gen_range(0..population)],
            NoiseMode::Percentage(percent) => self.sample(percent / 100.0, population),
            NoiseMode::RandomPercentage => {
                let probability = self.random_probability();
                self.sample(probability, population)
            }
        };
        Ok(selected)
    }

    /// Selection for the configured per-step mode
    pub fn select_configured(&mut self, population: usize) -> Result<Vec<usize>> {
        let mode = self.params.mode;
        self.select(mode, population)
    }

    /// Uniform draw from (0, 1]
    fn random_probability(&mut self) -> f64 {
        1.0 - self.rng.gen::<f64>()
    }

    fn sample(&mut self, probability: f64, population: usize) -> Vec<usize> {
        (0..population)
            .filter(|_| self.rng.gen_bool(probability.clamp(0.0, 1.0)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn generator() -> NoiseGenerator {
        NoiseGenerator::new(NoiseParameters::default(), Some(7))
    }

    #[test]
    fn test_single_neuron() {
        let mut noise = generator();
        for _ in 0..20 {
            let picked = noise.select(NoiseMode::SingleNeuron, 10).unwrap();
            assert_eq!(picked.len(), 1);
            assert!(picked[0] < 10);
        }
    }

    #[test]
    fn test_full_percentage_selects_all() {
        let mut noise = generator();
        assert_eq!(noise.select(NoiseMode::Percentage(100.0), 50).unwrap().len(), 50);
    }

    #[test]
    fn test_percentage_is_roughly_proportional() {
        let mut noise = generator();
        let picked = noise.select(NoiseMode::Percentage(10.0), 10_000).unwrap();
        assert!(picked.len() > 800 && picked.len() < 1200, "picked {}", picked.len());
        assert!(picked.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_invalid_percentage_rejected() {
        let mut noise = generator();
        assert!(noise.select(NoiseMode::Percentage(0.0), 10).is_err());
        assert!(noise.select(NoiseMode::Percentage(150.0), 10).is_err());
        assert!(noise.select(NoiseMode::Percentage(f64::NAN), 10).is_err());
    }

    #[test]
    fn test_seed_reproducible() {
        let mut a = generator();
        let mut b = generator();
        assert_eq!(
            a.select(NoiseMode::RandomPercentage, 200).unwrap(),
            b.select(NoiseMode::RandomPercentage, 200).unwrap()
        );
    }

    #[test]
    fn test_random_percentage_never_zero() {
        let mut noise = generator();
        for _ in 0..100_000 {
            let probability = noise.random_probability();
            assert!(probability > 0.0 && probability <= 1.0, "drew {}", probability);
        }
    }

    proptest! {
        #[test]
        fn prop_random_probability_in_half_open_unit(seed in any::<u64>()) {
            let mut noise = NoiseGenerator::new(NoiseParameters::default(), Some(seed));
            for _ in 0..64 {
                let probability = noise.random_probability();
                prop_assert!(probability > 0.0 && probability <= 1.0);
            }
        }
    }

    #[test]
    fn test_empty_population() {
        let mut noise = generator();
        assert!(noise.select(NoiseMode::SingleNeuron, 0).unwrap().is_empty());
    }
}
