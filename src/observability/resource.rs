//! Process identity attached to every log record and span.

use serde::Serialize;

use crate::config::schema::ServiceConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resource {
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
    pub host_name: String,
}

impl Resource {
    pub fn new(
        service_name: impl Into<String>,
        service_version: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: service_version.into(),
            environment: environment.into(),
            host_name: detect_hostname(),
        }
    }

    pub fn from_config(service: &ServiceConfig) -> Self {
        Self::new(&service.name, &service.version, &service.environment)
    }

    /// Resource attributes in OpenTelemetry naming.
    pub fn attributes(&self) -> [(&'static str, &str); 4] {
        [
            ("service.name", self.service_name.as_str()),
            ("service.version", self.service_version.as_str()),
            ("deployment.environment", self.environment.as_str()),
            ("host.name", self.host_name.as_str()),
        ]
    }
}

impl Default for Resource {
    fn default() -> Self {
        Self::from_config(&ServiceConfig::default())
    }
}

/// `HOSTNAME`, then `/etc/hostname`, then `unknown`.
pub fn detect_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_attributes() {
        let r = Resource::new("identity-service", "1.2.0", "staging");
        let attrs = r.attributes();
        assert_eq!(attrs[0], ("service.name", "identity-service"));
        assert_eq!(attrs[2], ("deployment.environment", "staging"));
        assert!(!r.host_name.is_empty());
    }
}
