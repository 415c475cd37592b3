//! Agent profile lookup.
//!
//! Profiles are owned by an external configuration store. A session fetches
//! its profile once at start and treats it as read-only.

use duplex_types::AgentProfile;
use futures_util::future::BoxFuture;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile not found: {0}")]
    NotFound(String),
    #[error("profile store unavailable: {0}")]
    Unavailable(String),
}

/// Source of the persona a new session talks to.
pub trait ProfileSource: Send + Sync {
    fn load(&self) -> BoxFuture<'_, Result<AgentProfile, ProfileError>>;
}

/// Serves one fixed profile, taken from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticProfile {
    profile: AgentProfile,
}

impl StaticProfile {
    pub fn new(profile: AgentProfile) -> Self {
        Self { profile }
    }
}

impl ProfileSource for StaticProfile {
    fn load(&self) -> BoxFuture<'_, Result<AgentProfile, ProfileError>> {
        let profile = self.profile.clone();
        Box::pin(async move { Ok(profile) })
    }
}
