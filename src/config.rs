use serde::Deserialize;
use std::path::Path;

/// Inbound authentication section.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Pre-shared key clients must present in the `api-key` header.
    pub api_key: String,
}

/// MTA subway upstream settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SubwayConfig {
    pub api_key: String,
    #[serde(default = "default_subway_feed_base_url")]
    pub feed_base_url: String,
    #[serde(default = "default_subway_alerts_url")]
    pub alerts_url: String,
}

/// MTA BusTime SIRI upstream settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    pub api_key: String,
    #[serde(default = "default_bus_stop_monitoring_url")]
    pub stop_monitoring_url: String,
}

/// WMATA rail upstream settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RailConfig {
    pub api_key: String,
    #[serde(default = "default_rail_trip_updates_url")]
    pub trip_updates_url: String,
    #[serde(default = "default_rail_incidents_url")]
    pub incidents_url: String,
}

/// HTTP server settings (optional in the config file).
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_subway_feed_base_url() -> String {
    "https://api-endpoint.mta.info/Dataservice/mtagtfsfeeds/nyct%2Fgtfs".to_string()
}

fn default_subway_alerts_url() -> String {
    "https://api-endpoint.mta.info/Dataservice/mtagtfsfeeds/camsys%2Fsubway-alerts.json"
        .to_string()
}

fn default_bus_stop_monitoring_url() -> String {
    "https://bustime.mta.info/api/siri/stop-monitoring.json".to_string()
}

fn default_rail_trip_updates_url() -> String {
    "https://api.wmata.com/gtfs/rail-gtfsrt-tripupdates.pb".to_string()
}

fn default_rail_incidents_url() -> String {
    "https://api.wmata.com/Incidents.svc/json/Incidents".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:5001".to_string()
}

/// Resolved application configuration — loaded once at startup, immutable
/// for the life of the process.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub auth: AuthConfig,
    pub subway: SubwayConfig,
    pub bus: BusConfig,
    pub rail: RailConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_json(&contents)
    }

    /// Parse config from a JSON string (useful for testing).
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate that every credential and endpoint is present.
    fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("auth.api_key", &self.auth.api_key),
            ("subway.api_key", &self.subway.api_key),
            ("subway.feed_base_url", &self.subway.feed_base_url),
            ("subway.alerts_url", &self.subway.alerts_url),
            ("bus.api_key", &self.bus.api_key),
            ("bus.stop_monitoring_url", &self.bus.stop_monitoring_url),
            ("rail.api_key", &self.rail.api_key),
            ("rail.trip_updates_url", &self.rail.trip_updates_url),
            ("rail.incidents_url", &self.rail.incidents_url),
            ("server.bind_addr", &self.server.bind_addr),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{} is empty", field)));
            }
        }
        Ok(())
    }
}

/// Configuration errors — all fatal at process start.
#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Config I/O error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Config parse error: {}", msg),
            ConfigError::Validation(msg) => write!(f, "Config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> &'static str {
        r#"{
            "auth": { "api_key": "shared-secret" },
            "subway": { "api_key": "mta-key" },
            "bus": { "api_key": "bus-key" },
            "rail": { "api_key": "wmata-key" }
        }"#
    }

    #[test]
    fn test_minimal_config_gets_default_urls() {
        let config = Config::from_json(minimal_json()).expect("should parse");
        assert_eq!(config.auth.api_key, "shared-secret");
        assert!(config.subway.feed_base_url.contains("mta.info"));
        assert!(config.bus.stop_monitoring_url.contains("bustime"));
        assert!(config.rail.trip_updates_url.contains("wmata.com"));
        assert_eq!(config.server.bind_addr, "0.0.0.0:5001");
    }

    #[test]
    fn test_explicit_urls_override_defaults() {
        let json = r#"{
            "auth": { "api_key": "s" },
            "subway": { "api_key": "k", "feed_base_url": "http://localhost:9000/gtfs" },
            "bus": { "api_key": "k" },
            "rail": { "api_key": "k" },
            "server": { "bind_addr": "127.0.0.1:8080" }
        }"#;
        let config = Config::from_json(json).unwrap();
        assert_eq!(config.subway.feed_base_url, "http://localhost:9000/gtfs");
        assert_eq!(config.server.bind_addr, "127.0.0.1:8080");
    }

    #[test]
    fn test_missing_section_fails() {
        let json = r#"{
            "auth": { "api_key": "s" },
            "subway": { "api_key": "k" },
            "bus": { "api_key": "k" }
        }"#;
        let err = Config::from_json(json).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_empty_credential_fails_validation() {
        let json = r#"{
            "auth": { "api_key": "" },
            "subway": { "api_key": "k" },
            "bus": { "api_key": "k" },
            "rail": { "api_key": "k" }
        }"#;
        let err = Config::from_json(json).unwrap_err();
        assert!(err.to_string().contains("auth.api_key"));
    }

    #[test]
    fn test_whitespace_credential_fails_validation() {
        let json = r#"{
            "auth": { "api_key": "s" },
            "subway": { "api_key": "   " },
            "bus": { "api_key": "k" },
            "rail": { "api_key": "k" }
        }"#;
        let err = Config::from_json(json).unwrap_err();
        assert!(err.to_string().contains("subway.api_key"));
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = Config::from_json("not json").unwrap_err();
        assert!(err.to_string().contains("parse"));
    }
}
