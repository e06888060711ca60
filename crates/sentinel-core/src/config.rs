//! Device configuration model.
//!
//! Captured once through the provisioning intake, persisted by the platform's
//! config store, and loaded at boot. Fields default to empty/1883 so a
//! never-provisioned device loads a usable (if inert) config instead of
//! failing.

use alloc::string::String;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

/// Default MQTT broker port.
pub const DEFAULT_BROKER_PORT: u16 = 1883;

fn default_broker_port() -> u16 {
    DEFAULT_BROKER_PORT
}

/// Network and broker identity of the node.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    #[serde(default)]
    pub wifi_ssid: String,
    #[serde(default)]
    pub wifi_pass: String,
    #[serde(default)]
    pub mqtt_server: String,
    #[serde(default = "default_broker_port")]
    pub mqtt_port: u16,
    #[serde(default)]
    pub mqtt_user: String,
    #[serde(default)]
    pub mqtt_pass: String,
    /// HTTP endpoint the node POSTs its public key to during the handshake.
    #[serde(default)]
    pub key_url: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            mqtt_server: String::new(),
            mqtt_port: DEFAULT_BROKER_PORT,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            key_url: String::new(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigCodecError {
    #[error("config encode failed")]
    Encode,
    #[error("config decode failed")]
    Decode,
}

impl DeviceConfig {
    /// True when station credentials exist to even attempt a WiFi connect.
    pub fn has_wifi_credentials(&self) -> bool {
        !self.wifi_ssid.is_empty()
    }

    /// Serialize for the persistent store.
    pub fn to_postcard(&self) -> Result<Vec<u8>, ConfigCodecError> {
        postcard::to_allocvec(self).map_err(|_| ConfigCodecError::Encode)
    }

    /// Deserialize from the persistent store.
    pub fn from_postcard(bytes: &[u8]) -> Result<Self, ConfigCodecError> {
        postcard::from_bytes(bytes).map_err(|_| ConfigCodecError::Decode)
    }
}
