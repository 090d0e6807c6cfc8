use crate::distribution::Distribution;
use crate::rng::StreamKey;

/// Sampling capability used by the session registry.
///
/// Implementations must be pure in `(dist, key)`: the same descriptor and
/// stream key always produce the same value, and the result is never negative.
pub trait Sampler: Send + Sync {
    fn sample(&self, dist: &Distribution, key: &StreamKey<'_>) -> f64;
}
