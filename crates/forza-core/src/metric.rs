//! Metric value type.
//!
//! A `Metric` is built by a plugin, handed to [`MetricSender::send`] and
//! dropped. The transport stamps host, app meta and time on the way out.
//!
//! [`MetricSender::send`]: crate::transport::MetricSender::send

use serde::{Deserialize, Serialize};

/// One named numeric measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Service name, e.g. `heartbeat` or `load-average.5`.
    pub service: String,
    /// Numeric value.
    pub metric: f64,
    /// Time-to-live in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Free-form text, used by log forwarding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Metric {
    pub fn new(service: impl Into<String>, metric: f64) -> Self {
        Self {
            service: service.into(),
            metric,
            ttl: None,
            tags: Vec::new(),
            description: None,
        }
    }

    #[must_use]
    pub const fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl = Some(ttl_ms);
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Application identity attached to every emitted metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AppMeta {
    pub const fn is_empty(&self) -> bool {
        self.user.is_none() && self.name.is_none()
    }
}

/// A metric as it goes over the wire: one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMetric {
    pub host: String,
    #[serde(flatten)]
    pub metric: Metric,
    #[serde(default, skip_serializing_if = "AppMeta::is_empty")]
    pub app: AppMeta,
    /// Milliseconds since the Unix epoch.
    pub time: u64,
}

/// Encode a wire metric as a single NDJSON line (trailing newline included).
pub fn encode_line(metric: &WireMetric) -> serde_json::Result<Vec<u8>> {
    let mut line = serde_json::to_vec(metric)?;
    line.push(b'\n');
    Ok(line)
}

/// Milliseconds since the Unix epoch, saturating to 0 for clocks before it.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn optional_fields_are_omitted() {
        let wire = WireMetric {
            host: "box".into(),
            metric: Metric::new("heartbeat", 1.0),
            app: AppMeta::default(),
            time: 42,
        };
        let line = String::from_utf8(encode_line(&wire).unwrap()).unwrap();
        assert_eq!(
            line,
            "{\"host\":\"box\",\"service\":\"heartbeat\",\"metric\":1.0,\"time\":42}\n"
        );
    }

    #[test]
    fn app_meta_and_ttl_are_encoded() {
        let wire = WireMetric {
            host: "box".into(),
            metric: Metric::new("heartbeat", 1.0).with_ttl(4000).with_tag("a"),
            app: AppMeta {
                user: Some("alice".into()),
                name: Some("web".into()),
            },
            time: 1,
        };
        let value: serde_json::Value =
            serde_json::from_slice(&encode_line(&wire).unwrap()).unwrap();
        assert_eq!(value["ttl"], 4000);
        assert_eq!(value["tags"][0], "a");
        assert_eq!(value["app"]["user"], "alice");
        assert_eq!(value["app"]["name"], "web");
    }

    #[test]
    fn metric_deserializes_with_defaults() {
        let metric: Metric = serde_json::from_str(r#"{"service":"jobs","metric":3}"#).unwrap();
        assert_eq!(metric, Metric::new("jobs", 3.0));
    }
}
