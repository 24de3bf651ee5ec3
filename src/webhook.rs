//! Webhook Module
//!
//! Exports analyzed reports as JSON to an HTTP endpoint. Failed deliveries are
//! retried with exponential backoff.
use crate::config::Config;
use crate::pipeline::AnalyzedReport;
use anyhow::{Context, Result};
use reqwest::{Client, Url};
use serde::Serialize;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    reports: &'a [AnalyzedReport],
    timestamp: chrono::DateTime<chrono::Utc>,
    version: &'static str,
}

/// Posts analysis results to a webhook URL.
#[derive(Debug)]
pub struct WebhookHandler {
    client: Client,
    url: Url,
    max_retries: u32,
}

impl WebhookHandler {
    /// Creates a handler for `url` with a per-request timeout and retry count.
    pub fn new(url: impl AsRef<str>, timeout: Duration, max_retries: u32) -> Result<Self> {
        let url = Url::parse(url.as_ref()).context("Invalid webhook URL")?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            url,
            max_retries,
        })
    }
    /// Builds a handler from the webhook settings of `config`, if a URL is configured.
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        config
            .webhook_url
            .as_deref()
            .map(|url| {
                Self::new(
                    url,
                    Duration::from_secs(config.webhook_timeout),
                    config.webhook_max_retries,
                )
            })
            .transpose()
    }

    /// Sends the reports, retrying with backoff of 1s, 2s, 4s and so on.
    pub async fn send(&self, reports: &[AnalyzedReport]) -> Result<()> {
        let payload = WebhookPayload {
            reports,
            timestamp: chrono::Utc::now(),
            version: env!("CARGO_PKG_VERSION"),
        };
        let mut last_error = None;
        for retry in 0..=self.max_retries {
            if retry > 0 {
                let delay = Duration::from_secs(2u64.pow(retry - 1));
                log::info!("Retrying webhook send in {:?}...", delay);
                sleep(delay).await;
            }
            match self.client.post(self.url.clone())
                .json(&payload)
                .send()
                .await
            {
                Ok(response) => {
                    if response.status().is_success() {
                        log::info!(
                            "Sent {} report(s) to webhook (attempt {})",
                            reports.len(),
                            retry + 1
                        );
                        return Ok(());
                    } else {
                        let status = response.status();
                        let body = response
                            .text()
                            .await
                            .unwrap_or_else(|_| "Unable to read response body".to_string());
                        log::warn!(
                            "Webhook attempt {} failed: HTTP {} - Response: {}",
                            retry + 1,
                            status,
                            body
                        );
                        last_error = Some(format!("HTTP {} - {}", status, body));
                    }
                }
                Err(e) => {
                    log::warn!("Webhook attempt {} encountered error: {}", retry + 1, e);
                    if e.is_timeout() {
                        last_error = Some("timeout".to_string());
                    } else {
                        last_error = Some(e.to_string());
                    }
                }
            }
        }
        Err(anyhow::anyhow!(
            "Webhook failed after {} attempts: {:?}",
            self.max_retries + 1,
            last_error
        ))
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::analyze_report;
    use crate::xml_parser::parse_dmarc_xml;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::{MockServer, Mock, ResponseTemplate, Respond};
    use wiremock::matchers::*;
    use std::time::Duration;
    fn sample() -> Vec<AnalyzedReport> {
        let xml = "<feedback><policy_published><domain>example.com</domain></policy_published>\
            <record><row><source_ip>192.0.2.1</source_ip><count>2</count></row></record>\
            </feedback>";
        vec![analyze_report(parse_dmarc_xml(xml).unwrap())]
    }

    /// Fails the first request with a 500, then succeeds.
    struct CounterResponder {
        cc: Arc<AtomicUsize>,
    }
    impl Respond for CounterResponder {
        fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
            let count = self.cc.fetch_add(1, Ordering::SeqCst);
            if count == 0 {
                ResponseTemplate::new(500)
            } else {
                ResponseTemplate::new(200)
            }
        }
    }
    #[tokio::test]
    async fn test_webhook_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;
        let handler = WebhookHandler::new(
            mock_server.uri(),
            Duration::from_secs(5),
            3,
        ).unwrap();
        let result = handler.send(&sample()).await;
        assert!(result.is_ok());
    }
    #[tokio::test]
    async fn test_webhook_retry() {
        let mock_server = MockServer::start().await;
        let call_count = Arc::new(AtomicUsize::new(0));
        Mock::given(method("POST"))
            .respond_with(CounterResponder { cc: call_count.clone() })
            .mount(&mock_server)
            .await;
        let handler = WebhookHandler::new(
            mock_server.uri(),
            Duration::from_secs(5),
            3,
        ).unwrap();
        let result = handler.send(&sample()).await;
        assert!(result.is_ok());
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }
    #[tokio::test]
    async fn test_webhook_payload_shape() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "reports": [{
                    "report": { "policy": { "domain": "example.com" } },
                    "summary": { "total_messages": 2 },
                }],
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;
        let handler = WebhookHandler::new(mock_server.uri(), Duration::from_secs(5), 0).unwrap();
        assert!(handler.send(&sample()).await.is_ok());
    }
    #[test]
    fn test_from_config() {
        assert!(WebhookHandler::from_config(&Config::default()).unwrap().is_none());
        let config = Config {
            webhook_url: Some("https://hooks.example.com/dmarc".to_string()),
            ..Config::default()
        };
        let handler = WebhookHandler::from_config(&config).unwrap().unwrap();
        assert_eq!(handler.url.as_str(), "https://hooks.example.com/dmarc");
        assert_eq!(handler.max_retries, 3);
    }
    #[tokio::test]
    async fn test_webhook_max_retries() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4) // initial attempt + 3 retries
            .mount(&mock_server)
            .await;
        let handler = WebhookHandler::new(
            mock_server.uri(),
            Duration::from_secs(5),
            3,
        ).unwrap();
        let result = handler.send(&sample()).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("failed after"));
    }
    #[tokio::test]
    async fn test_webhook_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&mock_server)
            .await;
        let handler = WebhookHandler::new(
            mock_server.uri(),
            Duration::from_secs(1),
            1,
        ).unwrap();
        let result = handler.send(&sample()).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("timeout"));
    }
    #[test]
    fn test_invalid_url() {
        let result = WebhookHandler::new(
            "not a url",
            Duration::from_secs(5),
            3,
        );
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid webhook URL"));
    }
}
