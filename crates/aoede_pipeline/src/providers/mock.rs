//! Scripted model client for testing without a running endpoint.
//!
//! Responses are queued up front and popped one per call, so a test can
//! script the dispatcher and executor turns exactly and then inspect the
//! prompts that were sent.

use crate::llm::{GenParams, ModelClient};
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MockModelClient {
    responses: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue responses in the order calls will consume them.
    pub fn scripted(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_response(&self, response: &str) {
        self.responses
            .lock()
            .expect("response queue lock poisoned")
            .push_back(response.to_string());
    }

    /// Every (system, prompt) pair this client has seen, oldest first.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("call log lock poisoned").clone()
    }
}

#[async_trait::async_trait]
impl ModelClient for MockModelClient {
    async fn complete(&self, system: &str, prompt: &str, _params: GenParams) -> Result<String> {
        self.calls
            .lock()
            .expect("call log lock poisoned")
            .push((system.to_string(), prompt.to_string()));
        let next = self
            .responses
            .lock()
            .expect("response queue lock poisoned")
            .pop_front();
        match next {
            Some(text) => Ok(text),
            None => anyhow::bail!("mock script exhausted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_responses_in_order() {
        let client = MockModelClient::scripted(&["first", "second"]);
        let a = client
            .complete("sys", "one", GenParams::default())
            .await
            .unwrap();
        let b = client
            .complete("sys", "two", GenParams::default())
            .await
            .unwrap();
        assert_eq!(a, "first");
        assert_eq!(b, "second");
    }

    #[tokio::test]
    async fn test_exhausted_script_errors() {
        let client = MockModelClient::new();
        let result = client.complete("sys", "prompt", GenParams::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_calls_are_recorded() {
        let client = MockModelClient::scripted(&["ok"]);
        client
            .complete("system text", "prompt text", GenParams::default())
            .await
            .unwrap();
        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "system text");
        assert_eq!(calls[0].1, "prompt text");
    }
}
