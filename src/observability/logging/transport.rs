//! Log transports.
//!
//! A transport receives one batch at a time from the emitter's flusher. It
//! owns the wire format; retry and backoff are applied by the emitter.

use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::json;
use thiserror::Error;

use crate::observability::logging::record::LogRecord;

/// Path of the Loki push API.
pub const LOKI_PUSH_PATH: &str = "/loki/api/v1/push";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("log sink responded with status {0}")]
    Status(u16),

    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("push timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

pub trait LogTransport: Send + Sync {
    fn push<'a>(&'a self, batch: &'a [LogRecord]) -> BoxFuture<'a, Result<(), TransportError>>;

    fn name(&self) -> &'static str;
}

/// Append the push path unless the URL already ends with it.
pub fn normalize_push_url(url: &str) -> String {
    if url.ends_with(LOKI_PUSH_PATH) {
        url.to_string()
    } else {
        format!("{}{}", url.trim_end_matches('/'), LOKI_PUSH_PATH)
    }
}

/// Pushes batches to Loki as JSON streams.
#[derive(Debug, Clone)]
pub struct LokiTransport {
    client: reqwest::Client,
    url: String,
    labels: BTreeMap<String, String>,
}

impl LokiTransport {
    pub fn new(
        url: &str,
        labels: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: normalize_push_url(url),
            labels,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Group records into streams keyed by their label set.
    pub fn encode(&self, batch: &[LogRecord]) -> Result<serde_json::Value, TransportError> {
        let mut streams: BTreeMap<BTreeMap<String, String>, Vec<[String; 2]>> = BTreeMap::new();
        for record in batch {
            let mut labels = self.labels.clone();
            labels.insert("service".into(), record.service.clone());
            labels.insert("environment".into(), record.environment.clone());
            labels.insert("hostname".into(), record.hostname.clone());
            labels.insert("level".into(), record.level.as_str().to_string());
            labels.insert("event_type".into(), record.event_type.clone());

            let ts = record.timestamp.timestamp_nanos_opt().unwrap_or_default().to_string();
            let line = serde_json::to_string(record)?;
            streams.entry(labels).or_default().push([ts, line]);
        }

        let streams: Vec<_> = streams
            .into_iter()
            .map(|(stream, values)| json!({ "stream": stream, "values": values }))
            .collect();
        Ok(json!({ "streams": streams }))
    }
}

impl LogTransport for LokiTransport {
    fn push<'a>(&'a self, batch: &'a [LogRecord]) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            let body = self.encode(batch)?;
            let response = self.client.post(&self.url).json(&body).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Status(status.as_u16()));
            }
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "loki"
    }
}

/// Writes each record as a JSON line to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutTransport;

impl LogTransport for StdoutTransport {
    fn push<'a>(&'a self, batch: &'a [LogRecord]) -> BoxFuture<'a, Result<(), TransportError>> {
        let result = write_lines(&mut std::io::stdout().lock(), batch);
        Box::pin(async move { result })
    }

    fn name(&self) -> &'static str {
        "stdout"
    }
}

fn write_lines(out: &mut impl Write, batch: &[LogRecord]) -> Result<(), TransportError> {
    for record in batch {
        serde_json::to_writer(&mut *out, record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::logging::record::LogLevel;
    use crate::observability::resource::Resource;

    #[test]
    fn test_normalize_push_url() {
        assert_eq!(normalize_push_url("http://loki:3100"), "http://loki:3100/loki/api/v1/push");
        assert_eq!(normalize_push_url("http://loki:3100/"), "http://loki:3100/loki/api/v1/push");
        assert_eq!(
            normalize_push_url("http://loki:3100/loki/api/v1/push"),
            "http://loki:3100/loki/api/v1/push"
        );
    }

    #[test]
    fn test_write_lines_is_json_lines() {
        let resource = Resource::new("identity-service", "0.1.0", "test");
        let batch = vec![
            LogRecord::new(LogLevel::Info, "authentication", "success", "a", &resource),
            LogRecord::new(LogLevel::Warn, "authentication", "failure", "b", &resource),
        ];
        let mut out = Vec::new();
        write_lines(&mut out, &batch).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: LogRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.message, "b");
    }

    #[test]
    fn test_encode_groups_streams() {
        let mut labels = BTreeMap::new();
        labels.insert("team".to_string(), "identity".to_string());
        let transport =
            LokiTransport::new("http://loki:3100", labels, Duration::from_secs(1)).unwrap();

        let resource = Resource::new("identity-service", "0.1.0", "test");
        let batch = vec![
            LogRecord::new(LogLevel::Info, "authentication", "success", "a", &resource),
            LogRecord::new(LogLevel::Info, "authentication", "success", "b", &resource),
            LogRecord::new(LogLevel::Warn, "authentication", "failure", "c", &resource),
        ];
        let body = transport.encode(&batch).unwrap();
        let streams = body["streams"].as_array().unwrap();
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0]["stream"]["team"], "identity");
        let total: usize = streams.iter().map(|s| s["values"].as_array().unwrap().len()).sum();
        assert_eq!(total, 3);
    }
}
