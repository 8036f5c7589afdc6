//! Bridge configuration.
//!
//! Configuration is loaded from a TOML file; every key has a default so a
//! minimal deployment only provides the TLS material paths. CLI arguments
//! override the file (see `main.rs`). Validation happens once at startup;
//! an invalid file is a startup failure (exit code 3), never a runtime
//! surprise.

use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;
use tether_proto::error::MAX_FRAME_BYTES;
use tether_proto::CapabilitySet;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that failed to open.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The config file was not valid TOML for this schema.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: String,
        /// Underlying TOML failure.
        #[source]
        source: toml::de::Error,
    },

    /// A value failed validation.
    #[error("invalid config: {field}: {reason}")]
    Invalid {
        /// Dotted key that failed.
        field: &'static str,
        /// Why it failed.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Listen address for the TLS endpoint.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// TLS material paths.
    #[serde(default)]
    pub tls: TlsConfig,

    /// Size and rate limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Timeout budgets, milliseconds.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Queue depths.
    #[serde(default)]
    pub queues: QueueConfig,

    /// Server identity and negotiable capabilities.
    #[serde(default)]
    pub server: ServerConfig,
}

/// PEM file paths for the mutual-TLS endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    /// CA bundle that client certificates must chain to.
    #[serde(default)]
    pub ca_path: String,
    /// Server certificate chain.
    #[serde(default)]
    pub cert_path: String,
    /// Server private key (PKCS#8 or RSA).
    #[serde(default)]
    pub key_path: String,
}

/// Size and rate limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Frame ceiling in bytes; frames above this are rejected before
    /// allocation.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Minimum interval between relayed telemetry samples, milliseconds.
    /// Zero disables the throttle.
    #[serde(default)]
    pub min_telemetry_interval_ms: u64,

    /// Maximum concurrent orchestrator sessions.
    #[serde(default = "default_max_orchestrators")]
    pub max_orchestrators: usize,
}

/// Timeout budgets. All values are milliseconds and must be non-zero.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutsConfig {
    /// Budget for the peer's `Hello` after TLS accept.
    #[serde(default = "default_hello_ms")]
    pub hello_ms: u64,

    /// Per-sample delivery budget on the latest-only channel; an elapsed
    /// budget drops the sample, never the session.
    #[serde(default = "default_send_telemetry_ms")]
    pub send_telemetry_ms: u64,

    /// Enqueue budget on the ordered channel; an elapsed budget rejects
    /// the message, never the session.
    #[serde(default = "default_send_action_ms")]
    pub send_action_ms: u64,

    /// Transport write budget; an elapsed budget closes the session.
    #[serde(default = "default_transport_send_ms")]
    pub transport_send_ms: u64,

    /// Action deadline applied when the request carries no TTL, and the
    /// cap applied when it does.
    #[serde(default = "default_action_ttl_ms")]
    pub action_default_ttl_ms: u64,
}

/// Queue depths.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Ordered channel depth per session.
    #[serde(default = "default_action_depth")]
    pub action_depth: usize,
}

/// Server identity and negotiable capabilities.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Capabilities this bridge will negotiate. The handshake reply is
    /// the intersection of this set and the client's advertisement.
    #[serde(default = "CapabilitySet::all_negotiable")]
    pub capabilities: CapabilitySet,
}

const fn default_max_frame_bytes() -> usize {
    tether_proto::error::DEFAULT_MAX_FRAME_BYTES
}

fn default_bind_addr() -> String {
    "0.0.0.0:40100".to_string()
}

const fn default_max_orchestrators() -> usize {
    4
}

const fn default_hello_ms() -> u64 {
    3000
}

const fn default_send_telemetry_ms() -> u64 {
    200
}

const fn default_send_action_ms() -> u64 {
    500
}

const fn default_transport_send_ms() -> u64 {
    2000
}

const fn default_action_ttl_ms() -> u64 {
    10_000
}

const fn default_action_depth() -> usize {
    64
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            tls: TlsConfig::default(),
            limits: LimitsConfig::default(),
            timeouts: TimeoutsConfig::default(),
            queues: QueueConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: default_max_frame_bytes(),
            min_telemetry_interval_ms: 0,
            max_orchestrators: default_max_orchestrators(),
        }
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            hello_ms: default_hello_ms(),
            send_telemetry_ms: default_send_telemetry_ms(),
            send_action_ms: default_send_action_ms(),
            transport_send_ms: default_transport_send_ms(),
            action_default_ttl_ms: default_action_ttl_ms(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            action_depth: default_action_depth(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            capabilities: CapabilitySet::all_negotiable(),
        }
    }
}

impl BridgeConfig {
    /// Loads and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read, is not valid
    /// TOML for this schema, or fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first failing key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::invalid("bind_addr", e.to_string()))?;

        if self.tls.ca_path.trim().is_empty() {
            return Err(ConfigError::invalid("tls.ca_path", "must be set"));
        }
        if self.tls.cert_path.trim().is_empty() {
            return Err(ConfigError::invalid("tls.cert_path", "must be set"));
        }
        if self.tls.key_path.trim().is_empty() {
            return Err(ConfigError::invalid("tls.key_path", "must be set"));
        }

        if self.limits.max_frame_bytes < 1024 {
            return Err(ConfigError::invalid(
                "limits.max_frame_bytes",
                "must be at least 1024",
            ));
        }
        if self.limits.max_frame_bytes > MAX_FRAME_BYTES {
            return Err(ConfigError::invalid(
                "limits.max_frame_bytes",
                format!("must not exceed {MAX_FRAME_BYTES}"),
            ));
        }
        if self.limits.max_orchestrators == 0 {
            return Err(ConfigError::invalid(
                "limits.max_orchestrators",
                "must be greater than zero",
            ));
        }

        for (field, value) in [
            ("timeouts.hello_ms", self.timeouts.hello_ms),
            ("timeouts.send_telemetry_ms", self.timeouts.send_telemetry_ms),
            ("timeouts.send_action_ms", self.timeouts.send_action_ms),
            ("timeouts.transport_send_ms", self.timeouts.transport_send_ms),
            (
                "timeouts.action_default_ttl_ms",
                self.timeouts.action_default_ttl_ms,
            ),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if self.queues.action_depth == 0 {
            return Err(ConfigError::invalid(
                "queues.action_depth",
                "must be greater than zero",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tether_proto::Capability;

    use super::*;

    fn valid_toml() -> &'static str {
        r#"
            bind_addr = "127.0.0.1:40100"

            [tls]
            ca_path = "certs/ca.pem"
            cert_path = "certs/server.pem"
            key_path = "certs/server.key"

            [timeouts]
            hello_ms = 1500

            [server]
            capabilities = ["TELEMETRY_V1", "HELLO_ACK_V1"]
        "#
    }

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = BridgeConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:40100");
        assert_eq!(config.limits.max_frame_bytes, 1_048_576);
        assert_eq!(config.timeouts.hello_ms, 3000);
        assert_eq!(config.timeouts.send_telemetry_ms, 200);
        assert_eq!(config.timeouts.send_action_ms, 500);
        assert_eq!(config.timeouts.transport_send_ms, 2000);
        assert_eq!(config.timeouts.action_default_ttl_ms, 10_000);
        assert_eq!(config.queues.action_depth, 64);
        assert_eq!(config.server.capabilities.len(), 4);
    }

    #[test]
    fn load_applies_overrides_and_defaults() {
        let file = write_temp(valid_toml());
        let config = BridgeConfig::load(file.path()).unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:40100");
        assert_eq!(config.timeouts.hello_ms, 1500);
        // Unset keys keep their defaults.
        assert_eq!(config.timeouts.send_action_ms, 500);
        assert!(config.server.capabilities.contains(Capability::TelemetryV1));
        assert!(!config.server.capabilities.contains(Capability::ActionV1));
    }

    #[test]
    fn load_rejects_unknown_keys() {
        let file = write_temp("bind_addr = \"127.0.0.1:1\"\nbogus_key = true\n");
        let err = BridgeConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn load_rejects_unknown_capability_names() {
        let file = write_temp(
            r#"
                [tls]
                ca_path = "a"
                cert_path = "b"
                key_path = "c"

                [server]
                capabilities = ["TELEMETRY_V9"]
            "#,
        );
        let err = BridgeConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn validate_requires_tls_paths() {
        let config = BridgeConfig::default();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "tls.ca_path",
                ..
            }
        ));
    }

    #[test]
    fn validate_rejects_zero_timeouts() {
        let mut config = BridgeConfig::default();
        config.tls = TlsConfig {
            ca_path: "a".to_string(),
            cert_path: "b".to_string(),
            key_path: "c".to_string(),
        };
        config.timeouts.send_action_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "timeouts.send_action_ms",
                ..
            }
        ));
    }

    #[test]
    fn validate_rejects_bad_bind_addr() {
        let mut config = BridgeConfig::default();
        config.bind_addr = "not-an-addr".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "bind_addr",
                ..
            }
        ));
    }

    #[test]
    fn validate_rejects_frame_ceiling_outside_bounds() {
        let mut config = BridgeConfig::default();
        config.tls.ca_path = "a".to_string();
        config.tls.cert_path = "b".to_string();
        config.tls.key_path = "c".to_string();

        config.limits.max_frame_bytes = 100;
        assert!(config.validate().is_err());

        config.limits.max_frame_bytes = MAX_FRAME_BYTES + 1;
        assert!(config.validate().is_err());

        config.limits.max_frame_bytes = MAX_FRAME_BYTES;
        assert!(config.validate().is_ok());
    }
}
