//! Model transport seam.
//!
//! Both pipeline roles (dispatcher and executor) speak through [`ModelClient`]
//! so tests can script replies and production can point either role at any
//! OpenAI-compatible endpoint.

use anyhow::Result;
use async_trait::async_trait;

/// Sampling parameters for one completion, usually taken from the current
/// style preset.
#[derive(Debug, Clone, Copy)]
pub struct GenParams {
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for GenParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 512,
        }
    }
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// One system+user completion, returning the reply text.
    async fn complete(&self, system: &str, prompt: &str, params: GenParams) -> Result<String>;
}
