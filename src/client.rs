//! HTTP probe client
//!
//! Synchronous request/response against a running node's base address.
//! No retries; any transport-level failure or unexpected status is
//! returned to the caller as-is.

use crate::error::ProbeError;
use crate::types::ClusterStatus;

/// A probe bound to one node's base URL
#[derive(Debug, Clone)]
pub struct ProbeClient {
    base_url: String,
    http: reqwest::Client,
}

impl ProbeClient {
    /// Create a probe for `base_url` (for example `http://127.0.0.1:10101`)
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    /// Submit a query against an index.
    ///
    /// Expects status 200 and returns the raw response body.
    pub async fn query(
        &self,
        index: &str,
        raw_query: &str,
        query: &str,
    ) -> Result<String, ProbeError> {
        let url = format!("{}/index/{}/query?{}", self.base_url, index, raw_query);
        let resp = self.http.post(&url).body(query.to_string()).send().await?;

        let status = resp.status().as_u16();
        let body = resp.text().await?;
        if status != 200 {
            return Err(ProbeError::UnexpectedStatus { status, body });
        }

        Ok(body)
    }

    /// Trigger a cache recalculation. Expects status 204.
    pub async fn recalculate_caches(&self) -> Result<(), ProbeError> {
        let url = format!("{}/recalculate-caches", self.base_url);
        let resp = self.http.post(&url).send().await?;

        let status = resp.status().as_u16();
        if status != 204 {
            let body = resp.text().await?;
            return Err(ProbeError::UnexpectedStatus { status, body });
        }

        Ok(())
    }

    /// Fetch the node's cluster view
    pub async fn status(&self) -> Result<ClusterStatus, ProbeError> {
        let url = format!("{}/status", self.base_url);
        let resp = self.http.get(&url).send().await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await?;
            return Err(ProbeError::UnexpectedStatus { status, body });
        }

        Ok(resp.json().await?)
    }

    /// The base URL this probe targets
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_stripped() {
        let client = ProbeClient::new("http://127.0.0.1:10101/");
        assert_eq!(client.base_url(), "http://127.0.0.1:10101");
    }

    #[tokio::test]
    async fn test_probe_against_dead_address_fails_fast() {
        // Bind-then-drop to get a port with nothing listening.
        let addr = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };

        let client = ProbeClient::new(format!("http://{}", addr));
        let result = client.query("foo", "", "Bitmap(frame=x, rowID=1)").await;
        assert!(matches!(result, Err(ProbeError::Request(_))));
    }
}
