//! Hardware-independent core library for the sentinel secure telemetry node
//!
//! This crate contains every correctness-critical piece of the device: the
//! debounced button monitor, the ECDH session-key protocol with AEAD packet
//! sealing, and the two-task orchestrator that switches the node between
//! normal telemetry operation and provisioning mode.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets (ESP32-S3) and desktop hosts (for the simulator and
//! tests). Everything platform-specific enters through the traits in
//! [`capabilities`].

#![no_std]

extern crate alloc;

pub mod button;
pub mod capabilities;
pub mod config;
pub mod orchestrator;
pub mod session;
