//! WHIP-style signaling exchange
//!
//! One HTTP POST carrying the SDP offer; the 2xx response body is the SDP
//! answer. No envelope, no retries.

use crate::error::SignalingError;
use log::{debug, info};
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

/// Content type of offer and answer bodies
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// HTTP client posting offers to a signaling endpoint
#[derive(Debug, Clone)]
pub struct WhipClient {
    http: reqwest::Client,
    timeout: Option<Duration>,
}

impl Default for WhipClient {
    fn default() -> Self {
        Self::new(None)
    }
}

impl WhipClient {
    /// Create a client; `timeout` bounds the whole exchange, `None` waits forever
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// POST `offer_sdp` to `api_url` and return the answer SDP
    pub async fn exchange(&self, api_url: &str, offer_sdp: &str) -> Result<String, SignalingError> {
        debug!("POST {} ({} bytes of SDP)", api_url, offer_sdp.len());
        let request = self.post(api_url, offer_sdp);
        let answer = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, request).await.map_err(|_| {
                SignalingError::SignalingExchange(format!(
                    "No answer from {} within {}ms",
                    api_url,
                    limit.as_millis()
                ))
            })??,
            None => request.await?,
        };
        info!("Exchange SDP ok with {}, answer is {} bytes", api_url, answer.len());
        Ok(answer)
    }

    async fn post(&self, api_url: &str, offer_sdp: &str) -> Result<String, SignalingError> {
        let response = self
            .http
            .post(api_url)
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(|e| SignalingError::SignalingExchange(format!("POST {} failed: {}", api_url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SignalingError::SignalingExchange(format!(
                "POST {} returned {}",
                api_url, status
            )));
        }

        response
            .text()
            .await
            .map_err(|e| SignalingError::SignalingExchange(format!("Reading answer from {} failed: {}", api_url, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_refused_is_exchange_error() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = WhipClient::new(Some(Duration::from_secs(5)));
        let err = client
            .exchange(&format!("http://127.0.0.1:{}/rtc/v1/whip/", port), "v=0\r\n")
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::SignalingExchange(_)));
    }

    #[test]
    fn test_default_is_unbounded() {
        assert!(WhipClient::default().timeout().is_none());
    }
}
