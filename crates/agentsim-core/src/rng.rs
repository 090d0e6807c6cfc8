//! Partitioned, reproducible sampling streams.
//!
//! Every draw the registry makes is addressed by a [`StreamKey`]. The key is
//! folded together with the global seed into a 64-bit stream seed using
//! FNV-1a over each component and splitmix64 between components, so the value
//! drawn for a key never depends on how many other draws happened before it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::distribution::Distribution;
use crate::traits::Sampler;
use crate::types::SessionId;

/// What a draw is used for. Part of the stream address so that the input and
/// output sizes of one work item come from different streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Draw {
    InputTokens,
    OutputTokens,
    ToolLatency,
    ToolOutput,
}

impl Draw {
    fn tag(self) -> u64 {
        match self {
            Draw::InputTokens => 1,
            Draw::OutputTokens => 2,
            Draw::ToolLatency => 3,
            Draw::ToolOutput => 4,
        }
    }
}

/// Address of one sampling stream.
#[derive(Debug, Clone, Copy)]
pub struct StreamKey<'a> {
    pub session: &'a SessionId,
    /// Canonical parent step ("" for the workflow root).
    pub parent: &'a str,
    pub child: &'a str,
    pub iteration: u32,
    pub branch: u32,
    pub draw: Draw,
}

impl StreamKey<'_> {
    /// Fold the key and the global seed into a stream seed.
    pub fn seed(&self, global_seed: u64) -> u64 {
        let mut h = splitmix64(global_seed);
        h = splitmix64(h ^ fnv1a(self.session.as_str().as_bytes()));
        h = splitmix64(h ^ fnv1a(self.parent.as_bytes()));
        h = splitmix64(h ^ fnv1a(self.child.as_bytes()));
        h = splitmix64(h ^ ((self.iteration as u64) << 32 | self.branch as u64));
        splitmix64(h ^ self.draw.tag())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325u64, |state, byte| {
        (state ^ *byte as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

fn splitmix64(mut value: u64) -> u64 {
    value = value.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = value;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Production sampler: one fresh `StdRng` per stream key.
#[derive(Debug, Clone, Copy)]
pub struct SeededSampler {
    seed: u64,
}

impl SeededSampler {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Sampler for SeededSampler {
    fn sample(&self, dist: &Distribution, key: &StreamKey<'_>) -> f64 {
        let mut rng = StdRng::seed_from_u64(key.seed(self.seed));
        let value = match *dist {
            Distribution::Constant { value } => value,
            Distribution::Uniform { min, max } => {
                if max > min {
                    rng.gen_range(min..=max)
                } else {
                    min
                }
            }
            Distribution::Normal {
                mean,
                std_dev,
                min,
                max,
            } => {
                // Box-Muller; u1 in (0, 1] keeps ln finite.
                let u1: f64 = 1.0 - rng.gen::<f64>();
                let u2: f64 = rng.gen();
                let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
                let v = (mean + std_dev * z).max(min.unwrap_or(0.0));
                max.map_or(v, |hi| v.min(hi))
            }
            Distribution::Exponential { mean, max } => {
                let u: f64 = 1.0 - rng.gen::<f64>();
                let v = -mean * u.ln();
                max.map_or(v, |hi| v.min(hi))
            }
        };
        value.max(0.0)
    }
}
