use std::collections::HashMap;

use serde::Deserialize;
use url::Url;

/// OpenTelemetry export settings
///
/// Logs always go to stdout through `tracing-subscriber`; this section only
/// adds OTLP span export on top.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Reported as `service.name`
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default)]
    pub resource_attributes: HashMap<String, String>,
    /// Shared OTLP exporter
    #[serde(default)]
    pub exporter: Option<ExporterConfig>,
    #[serde(default)]
    pub tracing: Option<TracingConfig>,
}

impl TelemetryConfig {
    /// Exporter for spans: the tracing override, else the shared exporter
    pub fn trace_exporter(&self) -> Option<&ExporterConfig> {
        self.tracing
            .as_ref()
            .and_then(|t| t.exporter.as_ref())
            .or(self.exporter.as_ref())
    }

    /// Sampling ratio, 1.0 when no tracing section is present
    pub fn sampling_rate(&self) -> f64 {
        self.tracing.as_ref().map_or(1.0, |t| t.sampling_rate)
    }
}

/// OTLP exporter endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExporterConfig {
    pub endpoint: Url,
    #[serde(default)]
    pub protocol: ExportProtocol,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportProtocol {
    #[default]
    Grpc,
    HttpProto,
}

/// Span sampling and export overrides
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TracingConfig {
    /// Ratio of root spans kept, 0.0 to 1.0
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: f64,
    /// Honor the parent span's sampling decision
    #[serde(default = "default_true")]
    pub parent_based: bool,
    #[serde(default)]
    pub exporter: Option<ExporterConfig>,
}

fn default_service_name() -> String {
    "switchboard".to_owned()
}

const fn default_sampling_rate() -> f64 {
    1.0
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_exporter_overrides_shared() {
        let config: TelemetryConfig = toml::from_str(
            r#"
            [exporter]
            endpoint = "http://shared:4317"

            [tracing.exporter]
            endpoint = "http://traces:4318"
            protocol = "http_proto"
            "#,
        )
        .unwrap();

        let exporter = config.trace_exporter().unwrap();
        assert_eq!(exporter.endpoint.host_str(), Some("traces"));
        assert_eq!(exporter.protocol, ExportProtocol::HttpProto);
    }

    #[test]
    fn defaults_without_sections() {
        let config: TelemetryConfig = toml::from_str("").unwrap();

        assert_eq!(config.service_name, "switchboard");
        assert!(config.trace_exporter().is_none());
        assert!((config.sampling_rate() - 1.0).abs() < f64::EPSILON);
    }
}
