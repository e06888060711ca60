//! ESP32-S3 firmware-specific modules for the sentinel node.
//!
//! This crate contains hardware-specific code that cannot compile on desktop
//! targets: the radio controller, TCP-level HTTP and MQTT clients, flash
//! config persistence, and the hardware RNG bridge. All orchestration logic
//! lives in `sentinel-core`; this crate only implements its capability
//! traits.

#![no_std]

extern crate alloc;

pub mod exchange;
pub mod provision;
pub mod rng;
pub mod store;
pub mod telemetry;
pub mod wifi;
