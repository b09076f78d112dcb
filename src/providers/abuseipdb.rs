//! AbuseIPDB reputation provider.

use super::{ReputationProvider, ReputationRecord};
use crate::config::ReputationConfig;
use crate::error::LookupError;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};

/// AbuseIPDB reputation provider.
pub struct AbuseIpDbProvider {
    config: ReputationConfig,
    client: Client,
}

impl AbuseIpDbProvider {
    /// Create a new AbuseIPDB provider.
    pub fn new(config: ReputationConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self { config, client })
    }

    fn check_url(&self, ip: &IpAddr) -> String {
        format!(
            "{}/check?ipAddress={}&maxAgeInDays={}",
            self.config.base_url.trim_end_matches('/'),
            ip,
            self.config.max_age_days
        )
    }
}

/// Parse an AbuseIPDB `check` response body into a record.
///
/// The body must be `{"data": {...}}` with a string `isp`. `asn` is optional
/// and may be a number or a string.
pub fn parse_response(ip: IpAddr, body: Value) -> Result<ReputationRecord, LookupError> {
    let data = match body {
        Value::Object(mut envelope) => match envelope.remove("data") {
            Some(Value::Object(data)) => data,
            _ => {
                return Err(LookupError::MalformedResponse(
                    "missing data object".to_string(),
                ))
            }
        },
        _ => {
            return Err(LookupError::MalformedResponse(
                "response is not a JSON object".to_string(),
            ))
        }
    };

    let isp = data
        .get("isp")
        .and_then(Value::as_str)
        .ok_or_else(|| LookupError::MalformedResponse("missing isp field".to_string()))?
        .to_string();

    let asn = match data.get("asn") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };

    Ok(ReputationRecord {
        ip,
        isp,
        asn,
        raw: data,
        fetched_at: Utc::now(),
    })
}

#[async_trait]
impl ReputationProvider for AbuseIpDbProvider {
    async fn fetch(&self, ip: &IpAddr) -> Result<ReputationRecord, LookupError> {
        if self.config.api_key.is_empty() {
            return Err(LookupError::Unavailable(
                "AbuseIPDB API key not configured".to_string(),
            ));
        }

        debug!(ip = %ip, "Querying AbuseIPDB");

        let response = self
            .client
            .get(self.check_url(ip))
            .header("Key", &self.config.api_key)
            .header("Accept", "application/json")
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!("AbuseIPDB rate limit exceeded");
            return Err(LookupError::Unavailable("rate limited".to_string()));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LookupError::Unavailable(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            LookupError::MalformedResponse(format!("failed to parse response: {}", e))
        })?;

        let record = parse_response(*ip, body)?;

        debug!(
            ip = %ip,
            isp = %record.isp,
            asn = %record.asn,
            score = ?record.abuse_score(),
            "AbuseIPDB lookup complete"
        );

        Ok(record)
    }

    fn name(&self) -> &str {
        "abuseipdb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reputation::ReputationCache;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
    }

    /// Serve one canned HTTP response on a local port; returns the base URL.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\
                 Connection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });

        format!("http://{}/api/v2", addr)
    }

    /// Accept one connection and never answer.
    async fn serve_stalled() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(socket);
        });

        format!("http://{}/api/v2", addr)
    }

    fn provider_at(base_url: String) -> AbuseIpDbProvider {
        let mut config = create_test_config();
        config.base_url = base_url;
        config.timeout_ms = 2000;
        AbuseIpDbProvider::new(config).unwrap()
    }

    fn create_test_config() -> ReputationConfig {
        ReputationConfig {
            api_key: "test-key".to_string(),
            ..ReputationConfig::default()
        }
    }

    #[test]
    fn test_parse_response() {
        let ip: IpAddr = "8.8.8.8".parse().unwrap();
        let body = json!({
            "data": {
                "ipAddress": "8.8.8.8",
                "abuseConfidenceScore": 0,
                "isp": "Google LLC",
                "asn": 15169,
                "countryCode": "US"
            }
        });

        let record = parse_response(ip, body).unwrap();
        assert_eq!(record.isp, "Google LLC");
        assert_eq!(record.asn, "15169");
        assert_eq!(record.raw.get("countryCode"), Some(&json!("US")));
        assert_eq!(record.abuse_score(), Some(0));
    }

    #[test]
    fn test_parse_response_asn_optional() {
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let body = json!({ "data": { "isp": "Example" } });

        let record = parse_response(ip, body).unwrap();
        assert_eq!(record.asn, "");
    }

    #[test]
    fn test_parse_response_missing_isp() {
        let ip: IpAddr = "8.8.8.8".parse().unwrap();
        let body = json!({ "data": { "abuseConfidenceScore": 0 } });

        let err = parse_response(ip, body).unwrap_err();
        assert!(matches!(err, LookupError::MalformedResponse(_)));
    }

    #[test]
    fn test_parse_response_missing_data() {
        let ip: IpAddr = "8.8.8.8".parse().unwrap();
        let body = json!({ "errors": [{ "detail": "Authentication failed" }] });

        let err = parse_response(ip, body).unwrap_err();
        assert!(matches!(err, LookupError::MalformedResponse(_)));
    }

    #[test]
    fn test_check_url() {
        let mut config = create_test_config();
        config.base_url = "https://example.test/api/v2/".to_string();
        config.max_age_days = 30;
        let provider = AbuseIpDbProvider::new(config).unwrap();

        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        assert_eq!(
            provider.check_url(&ip),
            "https://example.test/api/v2/check?ipAddress=1.2.3.4&maxAgeInDays=30"
        );
    }

    #[test]
    fn test_provider_name() {
        let provider = AbuseIpDbProvider::new(create_test_config()).unwrap();
        assert_eq!(provider.name(), "abuseipdb");
    }

    #[tokio::test]
    async fn test_missing_key_is_unavailable() {
        let mut config = create_test_config();
        config.api_key = String::new();
        let provider = AbuseIpDbProvider::new(config).unwrap();

        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let err = provider.fetch(&ip).await.unwrap_err();
        assert!(matches!(err, LookupError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let base = serve_once(
            "200 OK",
            r#"{"data":{"ipAddress":"8.8.8.8","isp":"Google LLC","asn":15169}}"#,
        )
        .await;
        let provider = provider_at(base);

        let ip: IpAddr = "8.8.8.8".parse().unwrap();
        let record = provider.fetch(&ip).await.unwrap();
        assert_eq!(record.isp, "Google LLC");
        assert_eq!(record.asn_label(), "AS15169");
    }

    #[tokio::test]
    async fn test_missing_isp_through_cache_not_cached() {
        let base = serve_once("200 OK", r#"{"data":{}}"#).await;
        let cache = ReputationCache::new(
            Arc::new(provider_at(base)),
            Duration::from_secs(86_400),
            100,
        );

        let ip: IpAddr = "8.8.8.8".parse().unwrap();
        let err = cache.lookup(&ip, false).await.unwrap_err();
        assert!(matches!(err, LookupError::MalformedResponse(_)));
        assert_eq!(cache.cached_entries(), 0);
    }

    #[tokio::test]
    async fn test_rate_limited_is_unavailable() {
        let base = serve_once("429 Too Many Requests", r#"{"errors":[]}"#).await;
        let provider = provider_at(base);

        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let err = provider.fetch(&ip).await.unwrap_err();
        assert!(matches!(err, LookupError::Unavailable(ref msg) if msg == "rate limited"));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let base = serve_once("500 Internal Server Error", "oops").await;
        let provider = provider_at(base);

        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let err = provider.fetch(&ip).await.unwrap_err();
        assert!(matches!(err, LookupError::Unavailable(ref msg) if msg.contains("500")));
    }

    #[tokio::test]
    async fn test_timeout_is_unavailable() {
        let mut config = create_test_config();
        config.base_url = serve_stalled().await;
        config.timeout_ms = 50;
        let provider = AbuseIpDbProvider::new(config).unwrap();

        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let err = provider.fetch(&ip).await.unwrap_err();
        assert!(matches!(err, LookupError::Unavailable(ref msg) if msg == "request timed out"));
    }

    #[tokio::test]
    async fn test_non_json_body_is_malformed() {
        let base = serve_once("200 OK", "<html>maintenance</html>").await;
        let provider = provider_at(base);

        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let err = provider.fetch(&ip).await.unwrap_err();
        assert!(matches!(err, LookupError::MalformedResponse(_)));
    }
}
