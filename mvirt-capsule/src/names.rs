//! Random suffixes for container names.

use rand::Rng;
use rand::seq::SliceRandom;

const LETTERS: &[&str] = &[
    "alpha", "beta", "gamma", "delta", "epsilon", "zeta", "eta", "theta", "iota", "kappa",
    "lambda", "mu", "nu", "xi", "omicron", "pi", "rho", "sigma", "tau", "upsilon", "phi", "chi",
    "psi", "omega",
];

/// Source of human-readable name suffixes.
pub trait NameGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Generates names like `zeta-22`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomNameGenerator;

impl NameGenerator for RandomNameGenerator {
    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        let letter = LETTERS.choose(&mut rng).copied().unwrap_or("alpha");
        let number: u32 = rng.gen_range(1..=99);
        format!("{}-{}", letter, number)
    }
}
