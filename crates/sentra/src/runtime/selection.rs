//! Construction-time choice of the active backend.
//!
//! The policy is deterministic and order-sensitive:
//!
//! 1. The runtime named by the preference, if it reports available.
//! 2. Otherwise the first available runtime in list order, with a note
//!    explaining the substitution.
//! 3. Otherwise nothing, with a note saying why.
//!
//! Each runtime's availability is checked once.

use tracing::{info, warn};

use super::Runtime;

/// Outcome of runtime selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSelection {
    /// Index into the runtime list, if anything was selected.
    pub index: Option<usize>,
    /// Empty when the preferred runtime was chosen.
    pub note: String,
}

impl RuntimeSelection {
    /// Apply the selection policy to `runtimes`.
    pub fn pick(runtimes: &[Box<dyn Runtime>], preferred: &str) -> Self {
        if runtimes.is_empty() {
            warn!("no runtimes configured");
            return Self {
                index: None,
                note: "no runtimes configured".to_string(),
            };
        }

        let available: Vec<bool> = runtimes.iter().map(|r| r.is_available()).collect();

        if let Some(index) = runtimes
            .iter()
            .zip(&available)
            .position(|(r, ok)| *ok && r.name() == preferred)
        {
            info!("runtime: {preferred}");
            return Self {
                index: Some(index),
                note: String::new(),
            };
        }

        match available.iter().position(|ok| *ok) {
            Some(index) => {
                let note = format!(
                    "runtime '{preferred}' unavailable; using '{}'",
                    runtimes[index].name()
                );
                warn!("{note}");
                Self {
                    index: Some(index),
                    note,
                }
            }
            None => {
                warn!("no runtime is available");
                Self {
                    index: None,
                    note: "no runtime is available".to_string(),
                }
            }
        }
    }
}
