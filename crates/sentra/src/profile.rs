//! Named presets pairing output length with context window size.
//!
//! A [`Profile`] carries two bundles: [`TokenSettings`], swapped atomically by
//! [`Orchestrator::set_profile`](crate::orchestrator::Orchestrator::set_profile),
//! and [`SamplingParams`], consumed by the native runtime.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::SentraError;

/// One of the three built-in presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Fast,
    #[default]
    Balanced,
    Quality,
}

/// Reply length and context window, swapped together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSettings {
    pub max_tokens: usize,
    pub context_window_tokens: usize,
}

/// Sampler chain parameters for the native runtime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub top_k: i32,
    pub top_p: f32,
    pub temperature: f32,
    pub seed: u32,
}

impl Profile {
    pub const ALL: [Profile; 3] = [Profile::Fast, Profile::Balanced, Profile::Quality];

    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Fast => "fast",
            Profile::Balanced => "balanced",
            Profile::Quality => "quality",
        }
    }

    pub fn token_settings(self) -> TokenSettings {
        let (max_tokens, context_window_tokens) = match self {
            Profile::Fast => (128, 1024),
            Profile::Balanced => (256, 2048),
            Profile::Quality => (512, 4096),
        };
        TokenSettings {
            max_tokens,
            context_window_tokens,
        }
    }

    pub fn sampling(self) -> SamplingParams {
        let (top_k, top_p, temperature) = match self {
            Profile::Fast => (20, 0.95, 0.6),
            Profile::Balanced => (40, 0.95, 0.7),
            Profile::Quality => (60, 0.98, 0.8),
        };
        SamplingParams {
            top_k,
            top_p,
            temperature,
            seed: crate::DEFAULT_SEED,
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = SentraError;

    /// Case-insensitive; the error echoes the input as given.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(Profile::Fast),
            "balanced" => Ok(Profile::Balanced),
            "quality" => Ok(Profile::Quality),
            _ => Err(SentraError::UnknownProfile(s.to_string())),
        }
    }
}

impl Default for SamplingParams {
    fn default() -> Self {
        Profile::default().sampling()
    }
}
