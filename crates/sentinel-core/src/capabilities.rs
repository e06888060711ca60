//! Platform capability traits consumed by the orchestrator.
//!
//! The core never talks to WiFi, HTTP, MQTT, flash, or the provisioning web
//! form directly; it drives these contracts. The firmware crate implements
//! them against esp-radio / embassy-net / flash storage, the simulator with
//! in-process loopbacks, and the test suite with scripted mocks.

use crate::config::DeviceConfig;
use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    #[error("link association could not be started")]
    AssociationFailed,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("key exchange endpoint unreachable")]
    Unreachable,
    #[error("key exchange endpoint returned a malformed response")]
    BadResponse,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("persistent store write failed")]
    WriteFailed,
}

/// Persistent configuration store (NVS/flash on hardware).
pub trait ConfigStore {
    /// Load the stored config, substituting per-field defaults when absent.
    fn load(&mut self) -> DeviceConfig;
    fn save(&mut self, config: &DeviceConfig) -> Result<(), StoreError>;
}

/// Station-mode network link.
///
/// `start_connect` only begins association; the orchestrator observes the
/// result by polling [`is_up`] under its own bounded retry budget so a mode
/// change can interrupt the wait.
///
/// [`is_up`]: Self::is_up
pub trait NetworkLink {
    fn is_up(&self) -> bool;
    async fn start_connect(&mut self, ssid: &str, password: &str) -> Result<(), LinkError>;
}

/// Public-key exchange against the configured endpoint.
pub trait KeyExchange {
    /// POST the local public key (hex), returning the peer's public key hex.
    async fn exchange(
        &mut self,
        local_public_hex: &str,
    ) -> Result<alloc::string::String, ExchangeError>;
}

/// Best-effort telemetry transport (MQTT on hardware).
pub trait Telemetry {
    /// Drive keep-alive / reconnect. Returns whether the transport is usable.
    async fn maintain(&mut self) -> bool;
    /// Publish one payload. `false` on failure; the next interval retries.
    async fn publish(&mut self, topic: &str, payload: &str) -> bool;
}

/// Operator-facing provisioning intake (access point + web form on
/// hardware).
pub trait Provisioner {
    async fn start(&mut self);
    async fn stop(&mut self);
    /// One-shot: a completed submission is returned once and cleared.
    fn take_submission(&mut self) -> Option<DeviceConfig>;
}
