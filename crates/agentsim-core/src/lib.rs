pub mod config;
pub mod distribution;
pub mod error;
pub mod rng;
pub mod traits;
pub mod types;

pub use config::EngineConfig;
pub use distribution::Distribution;
pub use error::{AgentSimError, Result, ValidationError};
pub use rng::{Draw, SeededSampler, StreamKey};
pub use traits::Sampler;
pub use types::*;
