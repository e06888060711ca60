//! End-to-end orchestrator scenarios against scripted capability mocks.
//!
//! Each test runs the network unit under `block_on` joined with a script
//! future that injects input events, using shrunken timings so scenarios
//! finish in tens of milliseconds.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use embassy_futures::block_on;
use embassy_futures::join::join;
use embassy_time::Timer;
use rand::rngs::OsRng;

use sentinel_core::capabilities::{
    ConfigStore, ExchangeError, KeyExchange, LinkError, NetworkLink, Provisioner, StoreError,
    Telemetry,
};
use sentinel_core::config::DeviceConfig;
use sentinel_core::orchestrator::network::{NetExit, NetworkUnit};
use sentinel_core::orchestrator::{InputEvent, InputEventChannel, ModeWatch, SystemMode, Timing};
use sentinel_core::session::{EncryptedPacket, SessionCrypto};

fn fast_timing() -> Timing {
    Timing {
        input_poll_ms: 1,
        debounce_ms: 2,
        long_press_ms: 5,
        connect_poll_ms: 2,
        connect_attempts: 5,
        connect_retry_backoff_ms: 2,
        no_credentials_wait_ms: 2,
        exchange_backoff_ms: 2,
        telemetry_interval_ms: 4,
        idle_ms: 1,
        provision_poll_ms: 1,
    }
}

fn provisioned_config() -> DeviceConfig {
    DeviceConfig {
        wifi_ssid: "lab-net".into(),
        wifi_pass: "hunter2".into(),
        mqtt_server: "10.0.0.2".into(),
        key_url: "http://10.0.0.2:8000/exchange".into(),
        ..DeviceConfig::default()
    }
}

// ---- scripted capability mocks ----

struct ScriptedLink {
    up: Rc<Cell<bool>>,
    connect_calls: Rc<Cell<u32>>,
    /// Whether `start_connect` flips the link up.
    associates: bool,
}

impl NetworkLink for ScriptedLink {
    fn is_up(&self) -> bool {
        self.up.get()
    }

    async fn start_connect(&mut self, _ssid: &str, _password: &str) -> Result<(), LinkError> {
        self.connect_calls.set(self.connect_calls.get() + 1);
        if self.associates {
            self.up.set(true);
        }
        Ok(())
    }
}

/// Link whose association never even starts (e.g. the radio rejects the
/// stored credentials outright).
struct BrokenLink {
    connect_calls: Rc<Cell<u32>>,
}

impl NetworkLink for BrokenLink {
    fn is_up(&self) -> bool {
        false
    }

    async fn start_connect(&mut self, _ssid: &str, _password: &str) -> Result<(), LinkError> {
        self.connect_calls.set(self.connect_calls.get() + 1);
        Err(LinkError::AssociationFailed)
    }
}

/// Plays the operator side of the handshake with real curve math, so the
/// derived session keys genuinely match.
struct PeerExchange {
    peer: Rc<RefCell<SessionCrypto<OsRng>>>,
    calls: Rc<Cell<u32>>,
}

impl KeyExchange for PeerExchange {
    async fn exchange(&mut self, local_public_hex: &str) -> Result<String, ExchangeError> {
        self.calls.set(self.calls.get() + 1);
        let mut peer = self.peer.borrow_mut();
        peer.generate_keypair()
            .map_err(|_| ExchangeError::BadResponse)?;
        peer.import_peer_public_key_hex(local_public_hex)
            .map_err(|_| ExchangeError::BadResponse)?;
        peer.public_key_hex().map_err(|_| ExchangeError::BadResponse)
    }
}

struct UnreachableExchange {
    calls: Rc<Cell<u32>>,
}

impl KeyExchange for UnreachableExchange {
    async fn exchange(&mut self, _local_public_hex: &str) -> Result<String, ExchangeError> {
        self.calls.set(self.calls.get() + 1);
        Err(ExchangeError::Unreachable)
    }
}

struct CaptureTelemetry {
    published: Rc<RefCell<Vec<(String, String)>>>,
}

impl Telemetry for CaptureTelemetry {
    async fn maintain(&mut self) -> bool {
        true
    }

    async fn publish(&mut self, topic: &str, payload: &str) -> bool {
        self.published
            .borrow_mut()
            .push((topic.into(), payload.into()));
        true
    }
}

struct CannedProvisioner {
    submission: Option<DeviceConfig>,
    started: Rc<Cell<bool>>,
    stopped: Rc<Cell<bool>>,
}

impl Provisioner for CannedProvisioner {
    async fn start(&mut self) {
        self.started.set(true);
    }

    async fn stop(&mut self) {
        self.stopped.set(true);
    }

    fn take_submission(&mut self) -> Option<DeviceConfig> {
        self.submission.take()
    }
}

/// Hands out queued submissions one per poll, like repeated form posts.
struct QueuedProvisioner {
    submissions: Vec<DeviceConfig>,
    started: Rc<Cell<bool>>,
    stopped: Rc<Cell<bool>>,
}

impl Provisioner for QueuedProvisioner {
    async fn start(&mut self) {
        self.started.set(true);
    }

    async fn stop(&mut self) {
        self.stopped.set(true);
    }

    fn take_submission(&mut self) -> Option<DeviceConfig> {
        (!self.submissions.is_empty()).then(|| self.submissions.remove(0))
    }
}

struct MemStore {
    saved: Rc<RefCell<Option<DeviceConfig>>>,
}

impl ConfigStore for MemStore {
    fn load(&mut self) -> DeviceConfig {
        self.saved.borrow().clone().unwrap_or_default()
    }

    fn save(&mut self, config: &DeviceConfig) -> Result<(), StoreError> {
        *self.saved.borrow_mut() = Some(config.clone());
        Ok(())
    }
}

/// Store whose first writes fail, as a worn flash sector would.
struct FlakyStore {
    failures_left: Rc<Cell<u32>>,
    save_calls: Rc<Cell<u32>>,
    saved: Rc<RefCell<Option<DeviceConfig>>>,
}

impl ConfigStore for FlakyStore {
    fn load(&mut self) -> DeviceConfig {
        self.saved.borrow().clone().unwrap_or_default()
    }

    fn save(&mut self, config: &DeviceConfig) -> Result<(), StoreError> {
        self.save_calls.set(self.save_calls.get() + 1);
        if self.failures_left.get() > 0 {
            self.failures_left.set(self.failures_left.get() - 1);
            return Err(StoreError::WriteFailed);
        }
        *self.saved.borrow_mut() = Some(config.clone());
        Ok(())
    }
}

/// Poll `cond` every millisecond until it holds, panicking after `cap_ms`.
async fn wait_until(cap_ms: u32, mut cond: impl FnMut() -> bool) {
    for _ in 0..cap_ms {
        if cond() {
            return;
        }
        Timer::after_millis(1).await;
    }
    panic!("condition not reached within {cap_ms} ms");
}

// ---- scenarios ----

#[test]
fn unprovisioned_device_idles_until_long_press() {
    let up = Rc::new(Cell::new(false));
    let connect_calls = Rc::new(Cell::new(0));
    let exchange_calls = Rc::new(Cell::new(0));
    let started = Rc::new(Cell::new(false));
    let stopped = Rc::new(Cell::new(false));
    let saved = Rc::new(RefCell::new(None));
    let submission = provisioned_config();

    let unit = NetworkUnit {
        session: SessionCrypto::new(OsRng),
        link: ScriptedLink {
            up: up.clone(),
            connect_calls: connect_calls.clone(),
            associates: false,
        },
        exchange: UnreachableExchange {
            calls: exchange_calls.clone(),
        },
        telemetry: CaptureTelemetry {
            published: Rc::new(RefCell::new(Vec::new())),
        },
        provisioner: CannedProvisioner {
            submission: Some(submission.clone()),
            started: started.clone(),
            stopped: stopped.clone(),
        },
        store: MemStore {
            saved: saved.clone(),
        },
        config: DeviceConfig::default(),
        timing: fast_timing(),
        device_id: "esp32",
        topic: "esp32/data",
    };

    let channel = InputEventChannel::new();
    let watch = ModeWatch::new();

    let (exit, _) = block_on(join(unit.run(channel.receiver(), watch.sender()), async {
        wait_until(100, || watch.try_get() == Some(SystemMode::Normal)).await;
        Timer::after_millis(5).await;
        channel.send(InputEvent::LongPress).await;
    }));

    assert_eq!(exit, NetExit::Provisioned(submission.clone()));
    assert_eq!(watch.try_get(), Some(SystemMode::Config));
    assert_eq!(*saved.borrow(), Some(submission));
    assert!(started.get() && stopped.get());
    // With no credentials the unit must not touch wifi or the exchange.
    assert_eq!(connect_calls.get(), 0);
    assert_eq!(exchange_calls.get(), 0);
}

#[test]
fn long_press_interrupts_connect_retries() {
    let up = Rc::new(Cell::new(false));
    let connect_calls = Rc::new(Cell::new(0));
    let published = Rc::new(RefCell::new(Vec::new()));
    let saved = Rc::new(RefCell::new(None));
    let submission = provisioned_config();

    let mut timing = fast_timing();
    // A budget long enough that only an interrupt can end the wait quickly.
    timing.connect_attempts = 200;

    let unit = NetworkUnit {
        session: SessionCrypto::new(OsRng),
        link: ScriptedLink {
            up: up.clone(),
            connect_calls: connect_calls.clone(),
            associates: false,
        },
        exchange: UnreachableExchange {
            calls: Rc::new(Cell::new(0)),
        },
        telemetry: CaptureTelemetry {
            published: published.clone(),
        },
        provisioner: CannedProvisioner {
            submission: Some(submission.clone()),
            started: Rc::new(Cell::new(false)),
            stopped: Rc::new(Cell::new(false)),
        },
        store: MemStore {
            saved: saved.clone(),
        },
        config: provisioned_config(),
        timing,
        device_id: "esp32",
        topic: "esp32/data",
    };

    let channel = InputEventChannel::new();
    let watch = ModeWatch::new();

    let (exit, _) = block_on(join(unit.run(channel.receiver(), watch.sender()), async {
        wait_until(100, || connect_calls.get() >= 1).await;
        channel.send(InputEvent::LongPress).await;
    }));

    assert_eq!(exit, NetExit::Provisioned(submission));
    assert_eq!(watch.try_get(), Some(SystemMode::Config));
    assert!(published.borrow().is_empty());
}

#[test]
fn short_press_rotates_the_session_key() {
    let exchange_calls = Rc::new(Cell::new(0));
    let peer = Rc::new(RefCell::new(SessionCrypto::new(OsRng)));
    let submission = provisioned_config();

    let unit = NetworkUnit {
        session: SessionCrypto::new(OsRng),
        link: ScriptedLink {
            up: Rc::new(Cell::new(false)),
            connect_calls: Rc::new(Cell::new(0)),
            associates: true,
        },
        exchange: PeerExchange {
            peer: peer.clone(),
            calls: exchange_calls.clone(),
        },
        telemetry: CaptureTelemetry {
            published: Rc::new(RefCell::new(Vec::new())),
        },
        provisioner: CannedProvisioner {
            submission: Some(submission),
            started: Rc::new(Cell::new(false)),
            stopped: Rc::new(Cell::new(false)),
        },
        store: MemStore {
            saved: Rc::new(RefCell::new(None)),
        },
        config: provisioned_config(),
        timing: fast_timing(),
        device_id: "esp32",
        topic: "esp32/data",
    };

    let channel = InputEventChannel::new();
    let watch = ModeWatch::new();

    block_on(join(unit.run(channel.receiver(), watch.sender()), async {
        wait_until(200, || exchange_calls.get() >= 1).await;
        // Rotation must discard the session and drive a fresh handshake.
        channel.send(InputEvent::ShortPress).await;
        wait_until(200, || exchange_calls.get() >= 2).await;
        channel.send(InputEvent::LongPress).await;
    }));

    assert!(exchange_calls.get() >= 2);
}

#[test]
fn long_press_heard_while_association_keeps_failing() {
    let connect_calls = Rc::new(Cell::new(0));
    let saved = Rc::new(RefCell::new(None));
    let submission = provisioned_config();

    // Generous budgets: only the backoff's await point lets the long
    // press through before they run out.
    let mut timing = fast_timing();
    timing.connect_attempts = 1000;
    timing.connect_retry_backoff_ms = 2;

    let unit = NetworkUnit {
        session: SessionCrypto::new(OsRng),
        link: BrokenLink {
            connect_calls: connect_calls.clone(),
        },
        exchange: UnreachableExchange {
            calls: Rc::new(Cell::new(0)),
        },
        telemetry: CaptureTelemetry {
            published: Rc::new(RefCell::new(Vec::new())),
        },
        provisioner: CannedProvisioner {
            submission: Some(submission.clone()),
            started: Rc::new(Cell::new(false)),
            stopped: Rc::new(Cell::new(false)),
        },
        store: MemStore {
            saved: saved.clone(),
        },
        config: provisioned_config(),
        timing,
        device_id: "esp32",
        topic: "esp32/data",
    };

    let channel = InputEventChannel::new();
    let watch = ModeWatch::new();

    let (exit, _) = block_on(join(unit.run(channel.receiver(), watch.sender()), async {
        wait_until(100, || connect_calls.get() >= 2).await;
        channel.send(InputEvent::LongPress).await;
    }));

    assert_eq!(exit, NetExit::Provisioned(submission.clone()));
    assert_eq!(watch.try_get(), Some(SystemMode::Config));
    assert_eq!(*saved.borrow(), Some(submission));
}

#[test]
fn failed_persist_waits_for_a_fresh_submission() {
    let failures_left = Rc::new(Cell::new(1));
    let save_calls = Rc::new(Cell::new(0));
    let saved = Rc::new(RefCell::new(None));
    let stopped = Rc::new(Cell::new(false));

    let mut first = provisioned_config();
    first.wifi_ssid = "first-try".into();
    let mut second = provisioned_config();
    second.wifi_ssid = "second-try".into();

    let unit = NetworkUnit {
        session: SessionCrypto::new(OsRng),
        link: ScriptedLink {
            up: Rc::new(Cell::new(false)),
            connect_calls: Rc::new(Cell::new(0)),
            associates: false,
        },
        exchange: UnreachableExchange {
            calls: Rc::new(Cell::new(0)),
        },
        telemetry: CaptureTelemetry {
            published: Rc::new(RefCell::new(Vec::new())),
        },
        provisioner: QueuedProvisioner {
            submissions: vec![first, second.clone()],
            started: Rc::new(Cell::new(false)),
            stopped: stopped.clone(),
        },
        store: FlakyStore {
            failures_left,
            save_calls: save_calls.clone(),
            saved: saved.clone(),
        },
        config: DeviceConfig::default(),
        timing: fast_timing(),
        device_id: "esp32",
        topic: "esp32/data",
    };

    let channel = InputEventChannel::new();
    let watch = ModeWatch::new();

    let (exit, _) = block_on(join(unit.run(channel.receiver(), watch.sender()), async {
        channel.send(InputEvent::LongPress).await;
    }));

    // The first submission is lost to the failed write; the intake stays
    // up and the second one lands.
    assert_eq!(exit, NetExit::Provisioned(second.clone()));
    assert_eq!(*saved.borrow(), Some(second));
    assert_eq!(save_calls.get(), 2);
    assert!(stopped.get());
}

#[test]
fn telemetry_packets_open_on_the_peer_side() {
    let peer = Rc::new(RefCell::new(SessionCrypto::new(OsRng)));
    let published = Rc::new(RefCell::new(Vec::new()));
    let submission = provisioned_config();

    let unit = NetworkUnit {
        session: SessionCrypto::new(OsRng),
        link: ScriptedLink {
            up: Rc::new(Cell::new(false)),
            connect_calls: Rc::new(Cell::new(0)),
            associates: true,
        },
        exchange: PeerExchange {
            peer: peer.clone(),
            calls: Rc::new(Cell::new(0)),
        },
        telemetry: CaptureTelemetry {
            published: published.clone(),
        },
        provisioner: CannedProvisioner {
            submission: Some(submission),
            started: Rc::new(Cell::new(false)),
            stopped: Rc::new(Cell::new(false)),
        },
        store: MemStore {
            saved: Rc::new(RefCell::new(None)),
        },
        config: provisioned_config(),
        timing: fast_timing(),
        device_id: "esp32",
        topic: "esp32/data",
    };

    let channel = InputEventChannel::new();
    let watch = ModeWatch::new();

    block_on(join(unit.run(channel.receiver(), watch.sender()), async {
        wait_until(500, || published.borrow().len() >= 2).await;
        channel.send(InputEvent::LongPress).await;
    }));

    let published = published.borrow();
    assert!(published.len() >= 2);

    let peer = peer.borrow();
    let mut ivs = std::collections::BTreeSet::new();
    for (topic, json) in published.iter() {
        assert_eq!(topic, "esp32/data");
        let packet = EncryptedPacket::from_json(json).unwrap();
        assert_eq!(packet.from, "esp32");
        assert!(ivs.insert(packet.iv.clone()), "nonce reused across packets");
        let plaintext = peer.open(&packet).unwrap();
        let text = String::from_utf8(plaintext).unwrap();
        assert!(text.starts_with("Data: "), "unexpected payload: {text}");
    }
}
