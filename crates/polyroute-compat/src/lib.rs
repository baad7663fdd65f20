//! Shape-level request/response sanitizing per provider family.
//!
//! One configurable filter, driven by a per-family [`CompatProfile`]. It
//! never changes semantics, only shapes: role vocabulary, tool-argument
//! encodings, usage field aliases, and provider quirks like GLM's rejection
//! of `strict` tool schemas.

mod glm;
mod profile;
mod request;
mod response;
mod rules;

pub use glm::{glm_coding_request, glm_coding_response, is_glm_coding_host};
pub use profile::{ArgsEncoding, CompatProfile};
pub use rules::{MessageRule, RuleAction, RuleWhen};

use polyroute_protocol::ProviderFamily;
use serde_json::Value;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CompatError {
    #[error("ERR_COMPAT_TOOL_TEXT_EMPTY: tool message {index} has empty content")]
    EmptyToolContent { index: usize },
    #[error("{code}: payload is not an object")]
    NotAnObject { code: &'static str },
}

impl CompatError {
    pub fn code(&self) -> &'static str {
        match self {
            CompatError::EmptyToolContent { .. } => "ERR_COMPAT_TOOL_TEXT_EMPTY",
            CompatError::NotAnObject { code } => code,
        }
    }
}

/// The compatibility stage for one provider family.
#[derive(Debug, Clone)]
pub struct CompatFilter {
    profile: CompatProfile,
}

impl CompatFilter {
    pub fn new(profile: CompatProfile) -> Self {
        Self { profile }
    }

    pub fn for_family(family: ProviderFamily) -> Self {
        Self::new(CompatProfile::for_family(family))
    }

    pub fn profile(&self) -> &CompatProfile {
        &self.profile
    }

    /// Sanitize an outbound provider-protocol request in place.
    pub fn apply_request(&self, payload: &mut Value) -> Result<(), CompatError> {
        if self.profile.bypass {
            return Ok(());
        }
        request::apply(&self.profile, payload)
    }

    /// Sanitize an upstream response in place.
    pub fn apply_response(&self, payload: &mut Value) -> Result<(), CompatError> {
        if self.profile.bypass {
            return Ok(());
        }
        response::apply(&self.profile, payload)
    }
}
