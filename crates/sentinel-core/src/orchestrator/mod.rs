//! Device-mode orchestration.
//!
//! Two independently polling execution units cooperate here: the input unit
//! ([`input::input_task`]) watches the button, and the network unit
//! ([`network::NetworkUnit`]) owns the session crypto, the transports, and
//! the mode state machine. The only cross-unit communication is a bounded
//! channel of [`InputEvent`]s (single producer: input unit; single consumer:
//! network unit) plus a watch broadcasting the current [`SystemMode`]
//! (single writer: network unit). There are no shared mutable flags and no
//! locks around key material — the input unit signals intent, it never
//! touches crypto state.

pub mod input;
pub mod network;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_sync::watch::Watch;

/// Pending input events the network unit can fall behind by before new
/// presses are dropped.
pub const INPUT_EVENT_CAPACITY: usize = 4;

/// Concurrent observers of the mode watch (firmware status LED, simulator
/// console, tests).
pub const MODE_OBSERVERS: usize = 2;

/// Operating mode of the node. Exactly one value holds at any instant;
/// transitions are owned by the network unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemMode {
    /// Connect, exchange keys, publish telemetry.
    Normal,
    /// Provisioning intake is running; ends in a restart.
    Config,
}

/// Typed event sent from the input unit to the network unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Brief press: rotate the session key.
    ShortPress,
    /// Held past the threshold: enter provisioning mode.
    LongPress,
}

pub type InputEventChannel =
    Channel<CriticalSectionRawMutex, InputEvent, INPUT_EVENT_CAPACITY>;
pub type InputEventSender<'a> =
    Sender<'a, CriticalSectionRawMutex, InputEvent, INPUT_EVENT_CAPACITY>;
pub type InputEventReceiver<'a> =
    Receiver<'a, CriticalSectionRawMutex, InputEvent, INPUT_EVENT_CAPACITY>;

pub type ModeWatch = Watch<CriticalSectionRawMutex, SystemMode, MODE_OBSERVERS>;
pub type ModeSender<'a> =
    embassy_sync::watch::Sender<'a, CriticalSectionRawMutex, SystemMode, MODE_OBSERVERS>;

/// Every period and budget the orchestrator runs on.
///
/// Defaults match the deployed device; tests shrink them to keep scenarios
/// fast.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Input unit poll period. Must stay at or below ~10 ms for reliable
    /// debouncing.
    pub input_poll_ms: u64,
    /// Raw-signal stability window.
    pub debounce_ms: u64,
    /// Hold duration that counts as a long press.
    pub long_press_ms: u64,
    /// Wait between link-up polls while connecting.
    pub connect_poll_ms: u64,
    /// Link-up polls per connect attempt before giving up.
    pub connect_attempts: u32,
    /// Backoff after association fails to start at all.
    pub connect_retry_backoff_ms: u64,
    /// Idle wait when no WiFi credentials are stored.
    pub no_credentials_wait_ms: u64,
    /// Backoff after a failed key-exchange handshake.
    pub exchange_backoff_ms: u64,
    /// Period between telemetry publishes.
    pub telemetry_interval_ms: u64,
    /// Network unit idle sleep between Normal-mode cycles.
    pub idle_ms: u64,
    /// Poll period for provisioning submissions in Config mode.
    pub provision_poll_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            input_poll_ms: 10,
            debounce_ms: 50,
            long_press_ms: 3000,
            connect_poll_ms: 500,
            connect_attempts: 20,
            connect_retry_backoff_ms: 2000,
            no_credentials_wait_ms: 2000,
            exchange_backoff_ms: 5000,
            telemetry_interval_ms: 30_000,
            idle_ms: 100,
            provision_poll_ms: 100,
        }
    }
}
