//! Configuration types for loopback negotiation

use crate::media::MediaConstraints;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration for a loopback call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    /// ICE servers handed to both endpoints (default: none, host candidates only)
    pub ice_servers: Vec<IceServerConfig>,

    /// Options passed to `create_offer`
    pub offer_options: OfferOptions,

    /// What to request from the local media source
    pub constraints: MediaConstraints,

    /// Which peer transport backs the endpoints
    pub backend: TransportBackend,
}

/// STUN/TURN server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// Server URLs (stun:, stuns:, turn: or turns:)
    pub urls: Vec<String>,

    /// Username for TURN authentication
    #[serde(default)]
    pub username: String,

    /// Credential for TURN authentication
    #[serde(default)]
    pub credential: String,
}

/// Offer creation options
///
/// When set, the offer asks to receive that media kind even if no local
/// track of that kind was attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfferOptions {
    /// Request an inbound audio stream
    pub offer_to_receive_audio: bool,

    /// Request an inbound video stream
    pub offer_to_receive_video: bool,
}

impl OfferOptions {
    /// Options that request nothing beyond the attached tracks
    pub fn send_only() -> Self {
        Self {
            offer_to_receive_audio: false,
            offer_to_receive_video: false,
        }
    }

    /// Whether either receive flag is set
    pub fn receives_anything(&self) -> bool {
        self.offer_to_receive_audio || self.offer_to_receive_video
    }
}

impl Default for OfferOptions {
    fn default() -> Self {
        Self {
            offer_to_receive_audio: true,
            offer_to_receive_video: true,
        }
    }
}

/// Peer transport implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportBackend {
    /// Deterministic in-process transport (no sockets)
    #[default]
    Simulated,
    /// webrtc-rs peer connections over real ICE
    #[serde(rename = "webrtc")]
    WebRtc,
}

impl std::str::FromStr for TransportBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "simulated" | "sim" => Ok(TransportBackend::Simulated),
            "webrtc" | "rtc" => Ok(TransportBackend::WebRtc),
            other => Err(Error::InvalidConfig(format!(
                "unknown transport backend '{}', expected simulated or webrtc",
                other
            ))),
        }
    }
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            ice_servers: Vec::new(),
            offer_options: OfferOptions::default(),
            constraints: MediaConstraints::default(),
            backend: TransportBackend::default(),
        }
    }
}

impl LoopbackConfig {
    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - an ICE server has no URLs or a URL without a stun/turn scheme
    /// - a TURN server lacks username or credential
    /// - the constraints request neither audio nor video
    pub fn validate(&self) -> Result<()> {
        for server in &self.ice_servers {
            if server.urls.is_empty() {
                return Err(Error::InvalidConfig(
                    "ICE server entry has no URLs".to_string(),
                ));
            }

            for url in &server.urls {
                let is_turn = url.starts_with("turn:") || url.starts_with("turns:");
                let is_stun = url.starts_with("stun:") || url.starts_with("stuns:");

                if !is_turn && !is_stun {
                    return Err(Error::InvalidConfig(format!(
                        "ICE server URL must start with stun:, stuns:, turn: or turns:, got {}",
                        url
                    )));
                }

                if is_turn && (server.username.is_empty() || server.credential.is_empty()) {
                    return Err(Error::InvalidConfig(format!(
                        "TURN server {} requires username and credential",
                        url
                    )));
                }
            }
        }

        if !self.constraints.audio && !self.constraints.video {
            return Err(Error::InvalidConfig(
                "constraints must request audio, video or both".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoopbackConfig::default();
        assert!(config.ice_servers.is_empty());
        assert!(config.offer_options.offer_to_receive_audio);
        assert!(config.offer_options.offer_to_receive_video);
        assert!(config.constraints.audio && config.constraints.video);
        assert_eq!(config.backend, TransportBackend::Simulated);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_ice_url() {
        let config = LoopbackConfig {
            ice_servers: vec![IceServerConfig {
                urls: vec!["http://example.com".to_string()],
                username: String::new(),
                credential: String::new(),
            }],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_turn_requires_credentials() {
        let mut config = LoopbackConfig {
            ice_servers: vec![IceServerConfig {
                urls: vec!["turn:turn.example.com:3478".to_string()],
                username: "user".to_string(),
                credential: String::new(),
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.ice_servers[0].credential = "secret".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_constraints_rejected() {
        let config = LoopbackConfig {
            constraints: MediaConstraints {
                audio: false,
                video: false,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = LoopbackConfig::from_toml_str(
            r#"
            backend = "webrtc"

            [offer_options]
            offer_to_receive_video = false

            [[ice_servers]]
            urls = ["stun:stun.l.google.com:19302"]
            "#,
        )
        .unwrap();

        assert_eq!(config.backend, TransportBackend::WebRtc);
        assert!(config.offer_options.offer_to_receive_audio);
        assert!(!config.offer_options.offer_to_receive_video);
        assert_eq!(config.ice_servers.len(), 1);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loopback.toml");
        std::fs::write(&path, "[constraints]\naudio = true\nvideo = false\n").unwrap();

        let config = LoopbackConfig::from_file(&path).unwrap();
        assert!(config.constraints.audio);
        assert!(!config.constraints.video);

        let missing = LoopbackConfig::from_file(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(Error::IoError(_))));
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!(
            "webrtc".parse::<TransportBackend>().unwrap(),
            TransportBackend::WebRtc
        );
        assert_eq!(
            "Simulated".parse::<TransportBackend>().unwrap(),
            TransportBackend::Simulated
        );
        assert!("quic".parse::<TransportBackend>().is_err());
    }
}
