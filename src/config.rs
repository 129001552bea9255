//! Configuration types for the console client

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Main configuration for a console session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// WebSocket signaling relay URL (ws:// or wss://), including the
    /// device path, e.g. `ws://host/ws/device/test/`
    pub signaling_url: String,

    /// STUN server URLs (at least one required), resolved before the
    /// conductor is constructed
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Seconds to wait in OfferSent before declaring negotiation failed
    pub offer_timeout_secs: u64,

    /// Render tick interval in milliseconds (default: 16, ~60 Hz)
    pub render_interval_ms: u64,

    /// Declared control-widget bounds per motor, used to scale readouts
    pub motor_bounds: HashMap<String, MotorBounds>,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn:// or turns://)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8000/ws/device/test/".to_string(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            offer_timeout_secs: 30,
            render_interval_ms: 16,
            motor_bounds: HashMap::new(),
        }
    }
}

impl ConsoleConfig {
    /// Build a config for a device id behind an HTTP origin, using the
    /// relay's well-known device path.
    pub fn for_device(origin: &str, device_id: &str) -> Self {
        let ws_origin = origin
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);

        Self {
            signaling_url: format!("{}/ws/device/{}/", ws_origin.trim_end_matches('/'), device_id),
            ..Default::default()
        }
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `stun_servers` is empty
    /// - `signaling_url` is not a WebSocket URL
    /// - `offer_timeout_secs` is zero
    pub fn validate(&self) -> Result<()> {
        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        if self.offer_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "offer_timeout_secs must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Declared bounds of a motor control widget
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MotorBounds {
    /// Lower bound of the widget range
    pub min: f64,
    /// Upper bound of the widget range
    pub max: f64,
    /// Step size of the widget; its decimal places set readout precision
    pub step: f64,
}

impl Default for MotorBounds {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 255.0,
            step: 1.0,
        }
    }
}

impl MotorBounds {
    /// Decimal places implied by the step size (capped at 6)
    pub fn precision(&self) -> usize {
        let mut step = self.step.abs();
        for digits in 0..=6 {
            if (step - step.round()).abs() < 1e-9 {
                return digits;
            }
            step *= 10.0;
        }
        6
    }
}

/// Placement and shape of one sensor region
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Origin x offset, in pixels
    pub x: f64,
    /// Origin y offset, in pixels
    pub y: f64,
    /// Grid row count
    pub rows: usize,
    /// Grid column count
    pub cols: usize,
}

/// Static sensor layout: named regions with fixed shapes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Region name to placement/shape
    pub regions: HashMap<String, RegionConfig>,
}

impl LayoutConfig {
    /// The six-region reference layout of the Dynastat footplate
    pub fn reference() -> Self {
        let mut regions = HashMap::new();
        regions.insert("left_mtp".to_string(), RegionConfig { x: 50.0, y: 110.0, rows: 10, cols: 16 });
        regions.insert("left_hallux".to_string(), RegionConfig { x: 215.0, y: 100.0, rows: 12, cols: 6 });
        regions.insert("left_heel".to_string(), RegionConfig { x: 150.0, y: 360.0, rows: 12, cols: 12 });
        regions.insert("right_mtp".to_string(), RegionConfig { x: 400.0, y: 110.0, rows: 10, cols: 16 });
        regions.insert("right_hallux".to_string(), RegionConfig { x: 335.0, y: 100.0, rows: 12, cols: 6 });
        regions.insert("right_heel".to_string(), RegionConfig { x: 345.0, y: 360.0, rows: 12, cols: 12 });
        Self { regions }
    }

    /// Layout with a single named region (test and bring-up helper)
    pub fn single(name: &str, rows: usize, cols: usize) -> Self {
        let mut regions = HashMap::new();
        regions.insert(name.to_string(), RegionConfig { x: 0.0, y: 0.0, rows, cols });
        Self { regions }
    }
}

/// Fetch the newline-delimited relay-discovery list from the fixed
/// relative path under `origin` (plain HTTP, once at startup).
pub async fn fetch_stun_servers(origin: &str) -> Result<Vec<String>> {
    let url = format!("{}/static/stun.txt", origin.trim_end_matches('/'));
    debug!("Fetching STUN server list from {}", url);

    let body = reqwest::get(&url)
        .await
        .map_err(|e| Error::InvalidConfig(format!("Failed to fetch STUN list: {}", e)))?
        .text()
        .await
        .map_err(|e| Error::InvalidConfig(format!("Failed to read STUN list: {}", e)))?;

    Ok(parse_stun_list(&body))
}

/// Parse a newline-delimited STUN host list, normalizing bare hosts to
/// `stun:` URLs and dropping blank lines.
pub fn parse_stun_list(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            if line.starts_with("stun:") || line.starts_with("turn:") {
                line.to_string()
            } else {
                format!("stun:{}", line)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ConsoleConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_stun_servers_fails() {
        let mut config = ConsoleConfig::default();
        config.stun_servers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_signaling_url_fails() {
        let mut config = ConsoleConfig::default();
        config.signaling_url = "http://localhost:8000".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_for_device_builds_ws_path() {
        let config = ConsoleConfig::for_device("http://dynastat.local:8000", "test");
        assert_eq!(
            config.signaling_url,
            "ws://dynastat.local:8000/ws/device/test/"
        );
    }

    #[test]
    fn test_reference_layout_regions() {
        let layout = LayoutConfig::reference();
        assert_eq!(layout.regions.len(), 6);
        let mtp = layout.regions["left_mtp"];
        assert_eq!((mtp.rows, mtp.cols), (10, 16));
    }

    #[test]
    fn test_motor_bounds_precision() {
        assert_eq!(MotorBounds { min: 0.0, max: 10.0, step: 1.0 }.precision(), 0);
        assert_eq!(MotorBounds { min: 0.0, max: 1.0, step: 0.1 }.precision(), 1);
        assert_eq!(MotorBounds { min: 0.0, max: 1.0, step: 0.025 }.precision(), 3);
    }

    #[test]
    fn test_parse_stun_list() {
        let body = "stun.stunprotocol.org\n\nstun:stun.l.google.com:19302\n";
        let servers = parse_stun_list(body);
        assert_eq!(
            servers,
            vec![
                "stun:stun.stunprotocol.org".to_string(),
                "stun:stun.l.google.com:19302".to_string(),
            ]
        );
    }

    #[test]
    fn test_config_serialization() {
        let config = ConsoleConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: ConsoleConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.signaling_url, deserialized.signaling_url);
    }
}
