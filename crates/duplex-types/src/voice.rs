//! Agent profile definitions.
//!
//! An `AgentProfile` is the read-only configuration record fetched once when a
//! session starts: the system instruction that frames every LLM request and
//! the voice parameters used for synthesis.

use serde::{Deserialize, Serialize};

/// The persona a session talks to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentProfile {
    /// Fixed system instruction prepended to every completion request.
    pub system_prompt: String,
    /// Provider voice identifier.
    pub voice_id: String,
    /// Voice stability (0.0 - 1.0).
    #[serde(default = "default_stability")]
    pub stability: f32,
    /// Similarity boost (0.0 - 1.0).
    #[serde(default = "default_similarity_boost")]
    pub similarity_boost: f32,
}

fn default_stability() -> f32 {
    0.5
}

fn default_similarity_boost() -> f32 {
    0.75
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful, friendly AI voice assistant. Keep responses \
                            concise and natural for voice conversation. Respond in 1-2 \
                            sentences unless more detail is specifically requested."
                .to_string(),
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
            stability: default_stability(),
            similarity_boost: default_similarity_boost(),
        }
    }
}
