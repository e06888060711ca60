//! Desktop simulator for the sentinel secure telemetry node.
//!
//! Runs the real orchestrator (both execution units) against in-process
//! stand-ins for the platform capabilities: a fake WiFi link, a loopback key
//! exchange peer that plays the operator side with real curve math, a console
//! "broker" that decrypts every packet it receives, and a JSON file in place
//! of flash.
//!
//! # Commands (type on stdin, then Enter)
//!
//! | Key | Action                              |
//! |-----|-------------------------------------|
//! | s   | Short press (rotate session key)    |
//! | l   | Long press (enter config mode)      |
//! | q   | Quit                                |
//!
//! Provisioning is simulated: entering config mode auto-submits a config
//! after a short delay, as if an operator filled in the web form.

use std::cell::RefCell;
use std::fs;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use embassy_futures::block_on;
use embassy_futures::select::{Either3, select3};
use embassy_time::Timer;
use env_logger::Env;
use log::{info, warn};
use rand::rngs::OsRng;

use sentinel_core::capabilities::{
    ConfigStore, ExchangeError, KeyExchange, LinkError, NetworkLink, Provisioner, StoreError,
    Telemetry,
};
use sentinel_core::config::DeviceConfig;
use sentinel_core::orchestrator::input::input_task;
use sentinel_core::orchestrator::network::{
    DEFAULT_DEVICE_ID, DEFAULT_TELEMETRY_TOPIC, NetExit, NetworkUnit,
};
use sentinel_core::orchestrator::{InputEventChannel, ModeWatch, Timing};
use sentinel_core::session::{EncryptedPacket, SessionCrypto};

/// Where the simulated flash config lives.
const CONFIG_PATH: &str = "sentinel-config.json";

/// How long a simulated short tap holds the button.
const SHORT_TAP: Duration = Duration::from_millis(150);

/// How long a simulated long press holds the button (threshold plus slack).
const LONG_HOLD: Duration = Duration::from_millis(3500);

fn sim_timing() -> Timing {
    Timing {
        // 30 s telemetry is dull to watch; 5 s shows the loop working.
        telemetry_interval_ms: 5000,
        ..Timing::default()
    }
}

// ---------------------------------------------------------------------------
// Simulated button
// ---------------------------------------------------------------------------

/// Virtual pin wired active-low like the hardware button.
struct SimPin {
    pressed: Arc<AtomicBool>,
}

impl embedded_hal::digital::ErrorType for SimPin {
    type Error = core::convert::Infallible;
}

impl embedded_hal::digital::InputPin for SimPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.pressed.load(Ordering::Relaxed))
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.pressed.load(Ordering::Relaxed))
    }
}

/// Read stdin commands on a background thread, driving the virtual pin.
fn spawn_command_reader(pressed: Arc<AtomicBool>) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match line.trim() {
                "s" => tap(&pressed, SHORT_TAP),
                "l" => tap(&pressed, LONG_HOLD),
                "q" => std::process::exit(0),
                "" => {}
                other => info!("unknown command `{other}` (s, l, or q)"),
            }
        }
    });
}

fn tap(pressed: &AtomicBool, hold: Duration) {
    pressed.store(true, Ordering::Relaxed);
    thread::sleep(hold);
    pressed.store(false, Ordering::Relaxed);
}

// ---------------------------------------------------------------------------
// Capability stand-ins
// ---------------------------------------------------------------------------

/// WiFi link that associates after a short delay.
struct SimLink {
    up: bool,
}

impl NetworkLink for SimLink {
    fn is_up(&self) -> bool {
        self.up
    }

    async fn start_connect(&mut self, ssid: &str, _password: &str) -> Result<(), LinkError> {
        info!("[wifi] associating with `{ssid}`");
        Timer::after_millis(300).await;
        self.up = true;
        Ok(())
    }
}

/// Plays the operator side of the key exchange in-process.
struct LoopbackExchange {
    peer: Rc<RefCell<SessionCrypto<OsRng>>>,
}

impl KeyExchange for LoopbackExchange {
    async fn exchange(&mut self, local_public_hex: &str) -> Result<String, ExchangeError> {
        info!("[peer] received device public key {}…", &local_public_hex[..16]);
        let mut peer = self.peer.borrow_mut();
        peer.generate_keypair()
            .map_err(|_| ExchangeError::BadResponse)?;
        peer.import_peer_public_key_hex(local_public_hex)
            .map_err(|_| ExchangeError::BadResponse)?;
        peer.public_key_hex().map_err(|_| ExchangeError::BadResponse)
    }
}

/// Console broker: prints each packet, then decrypts it with the peer's
/// session key to prove the sealed channel end to end.
struct ConsoleTelemetry {
    peer: Rc<RefCell<SessionCrypto<OsRng>>>,
}

impl Telemetry for ConsoleTelemetry {
    async fn maintain(&mut self) -> bool {
        true
    }

    async fn publish(&mut self, topic: &str, payload: &str) -> bool {
        info!("[mqtt] {topic} <- {payload}");
        let opened = EncryptedPacket::from_json(payload)
            .and_then(|packet| self.peer.borrow().open(&packet));
        match opened {
            Ok(plaintext) => {
                info!("[peer] decrypted: {}", String::from_utf8_lossy(&plaintext));
                true
            }
            Err(err) => {
                warn!("[peer] could not decrypt packet: {err}");
                false
            }
        }
    }
}

/// Stands in for the access point plus web form: once started, submits a
/// canned config after a short countdown.
struct AutoProvisioner {
    countdown: Option<u32>,
}

impl AutoProvisioner {
    fn new() -> Self {
        Self { countdown: None }
    }

    fn submission() -> DeviceConfig {
        DeviceConfig {
            wifi_ssid: env_or("SIM_WIFI_SSID", "sim-net"),
            wifi_pass: env_or("SIM_WIFI_PASS", "sim-pass"),
            mqtt_server: env_or("SIM_MQTT_SERVER", "127.0.0.1"),
            key_url: env_or("SIM_KEY_URL", "http://127.0.0.1:8000/exchange"),
            ..DeviceConfig::default()
        }
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| fallback.into())
}

impl Provisioner for AutoProvisioner {
    async fn start(&mut self) {
        info!("[provision] access point `ESP32_SECURE_DEVICE` up (password 12345678)");
        info!("[provision] simulated operator submits the form in ~2 s");
        self.countdown = Some(20);
    }

    async fn stop(&mut self) {
        info!("[provision] access point down");
        self.countdown = None;
    }

    fn take_submission(&mut self) -> Option<DeviceConfig> {
        let remaining = self.countdown.as_mut()?;
        if *remaining > 0 {
            *remaining -= 1;
            return None;
        }
        self.countdown = None;
        Some(Self::submission())
    }
}

/// JSON file in place of flash.
struct FileStore {
    path: PathBuf,
}

impl ConfigStore for FileStore {
    fn load(&mut self) -> DeviceConfig {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    fn save(&mut self, config: &DeviceConfig) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(config).map_err(|_| StoreError::WriteFailed)?;
        fs::write(&self.path, json).map_err(|_| StoreError::WriteFailed)
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("starting sentinel simulator");
    info!("commands: s=short press (rotate key)  l=long press (config mode)  q=quit");

    let pressed = Arc::new(AtomicBool::new(false));
    spawn_command_reader(pressed.clone());

    let mut store = FileStore {
        path: PathBuf::from(CONFIG_PATH),
    };
    let config = store.load();
    if config.has_wifi_credentials() {
        info!("loaded config for network `{}`", config.wifi_ssid);
    } else {
        info!("no stored config; long-press (`l`) to provision");
    }

    let peer = Rc::new(RefCell::new(SessionCrypto::new(OsRng)));
    let unit = NetworkUnit {
        session: SessionCrypto::new(OsRng),
        link: SimLink { up: false },
        exchange: LoopbackExchange { peer: peer.clone() },
        telemetry: ConsoleTelemetry { peer },
        provisioner: AutoProvisioner::new(),
        store,
        config,
        timing: sim_timing(),
        device_id: DEFAULT_DEVICE_ID,
        topic: DEFAULT_TELEMETRY_TOPIC,
    };

    let events = InputEventChannel::new();
    let modes = ModeWatch::new();
    let mut mode_log = modes.receiver().expect("mode observer slot available");

    let exit = block_on(async {
        let network = unit.run(events.receiver(), modes.sender());
        let input = input_task(SimPin { pressed }, true, sim_timing(), events.sender());
        let observe = async {
            loop {
                let mode = mode_log.changed().await;
                info!("[mode] {mode:?}");
            }
        };
        match select3(network, input, observe).await {
            Either3::First(exit) => exit,
            Either3::Second(_) | Either3::Third(_) => unreachable!("units run forever"),
        }
    });

    let NetExit::Provisioned(config) = exit;
    info!(
        "provisioned for `{}`; restart the simulator to apply it",
        config.wifi_ssid
    );
}
