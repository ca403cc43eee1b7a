//! Best-effort background-knowledge retrieval. The knowledge service is an
//! opaque, potentially slow text provider; every failure mode degrades to an
//! empty string so generation never blocks on it.

use tracing::warn;

#[derive(Clone, Default)]
pub struct KnowledgeClient {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl KnowledgeClient {
    /// `endpoint` is the base URL of the knowledge service; `None` disables
    /// retrieval entirely.
    pub fn new(endpoint: Option<String>) -> Self {
        KnowledgeClient {
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    pub fn disabled() -> Self {
        KnowledgeClient::new(None)
    }

    /// Fetch background text for `topic`. Unconfigured endpoint, network
    /// errors, and non-success responses all return `""`.
    pub async fn fetch(&self, topic: &str) -> String {
        let Some(endpoint) = &self.endpoint else {
            return String::new();
        };

        let response = self
            .client
            .get(endpoint)
            .query(&[("topic", topic)])
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(text) => text,
                Err(e) => {
                    warn!(topic, error = %e, "knowledge response body unreadable");
                    String::new()
                }
            },
            Ok(resp) => {
                warn!(topic, status = %resp.status(), "knowledge service returned non-success");
                String::new()
            }
            Err(e) => {
                warn!(topic, error = %e, "knowledge service unreachable");
                String::new()
            }
        }
    }
}
