use serde::{Deserialize, Serialize};

/// An opaque size/latency distribution descriptor.
///
/// The engine never looks inside a descriptor; it only hands it to a
/// [`Sampler`](crate::traits::Sampler). All variants have non-negative support.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Distribution {
    /// Always the same value.
    Constant { value: f64 },
    /// Uniform over `[min, max]`.
    Uniform { min: f64, max: f64 },
    /// Gaussian, clamped to `[min, max]` (min defaults to 0).
    Normal {
        mean: f64,
        std_dev: f64,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    /// Exponential with the given mean, optionally capped.
    Exponential {
        mean: f64,
        #[serde(default)]
        max: Option<f64>,
    },
}

impl Distribution {
    pub fn constant(value: f64) -> Self {
        Distribution::Constant { value }
    }

    /// Check the descriptor has non-negative support and sane bounds.
    pub fn check(&self) -> Result<(), String> {
        let finite = |name: &str, v: f64| {
            if v.is_finite() {
                Ok(())
            } else {
                Err(format!("{} must be finite", name))
            }
        };
        match *self {
            Distribution::Constant { value } => {
                finite("value", value)?;
                if value < 0.0 {
                    return Err(format!("constant value {} is negative", value));
                }
            }
            Distribution::Uniform { min, max } => {
                finite("min", min)?;
                finite("max", max)?;
                if min < 0.0 {
                    return Err(format!("uniform min {} is negative", min));
                }
                if max < min {
                    return Err(format!("uniform max {} is below min {}", max, min));
                }
            }
            Distribution::Normal {
                mean,
                std_dev,
                min,
                max,
            } => {
                finite("mean", mean)?;
                finite("std_dev", std_dev)?;
                if std_dev < 0.0 {
                    return Err(format!("std_dev {} is negative", std_dev));
                }
                let lo = min.unwrap_or(0.0);
                if lo < 0.0 {
                    return Err(format!("normal min {} is negative", lo));
                }
                if let Some(hi) = max {
                    if hi < lo {
                        return Err(format!("normal max {} is below min {}", hi, lo));
                    }
                }
            }
            Distribution::Exponential { mean, max } => {
                finite("mean", mean)?;
                if mean < 0.0 {
                    return Err(format!("exponential mean {} is negative", mean));
                }
                if let Some(hi) = max {
                    if hi < 0.0 {
                        return Err(format!("exponential max {} is negative", hi));
                    }
                }
            }
        }
        Ok(())
    }
}
