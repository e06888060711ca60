//! Network execution unit.
//!
//! Owns the mode state machine and all session state. Each Normal-mode
//! cycle re-derives what needs doing from current conditions (link down?
//! rotation requested? session ready? publish due?), so a failure in any
//! step is retried naturally on the next pass instead of wedging the unit.
//! Every wait is a select against the input channel, which keeps the unit
//! responsive to a long press even mid-backoff.

use alloc::format;
use alloc::string::String;

use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Instant, Timer};
use log::{debug, info, warn};
use rand_core::{CryptoRng, RngCore};
use thiserror_no_std::Error;

use super::{InputEvent, InputEventReceiver, ModeSender, SystemMode, Timing};
use crate::capabilities::{ConfigStore, ExchangeError, KeyExchange, NetworkLink, Provisioner, Telemetry};
use crate::config::DeviceConfig;
use crate::session::{SessionCrypto, SessionError};

/// Sender identity stamped into sealed packets.
pub const DEFAULT_DEVICE_ID: &str = "esp32";

/// Topic telemetry publishes land on.
pub const DEFAULT_TELEMETRY_TOPIC: &str = "esp32/data";

/// Why the network unit returned. The caller owns what happens next
/// (hardware restarts, the simulator exits, tests assert).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetExit {
    /// A provisioning submission was persisted; a restart should pick the
    /// new config up.
    Provisioned(DeviceConfig),
}

#[derive(Error, Debug)]
enum HandshakeError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

enum ConnectOutcome {
    Connected,
    /// A long press arrived while waiting for association.
    Interrupted,
    TimedOut,
}

/// Transient Normal-mode bookkeeping. Reset implicitly by a restart.
struct NormalState {
    /// A keypair (re)generation is owed. Set at boot and on short press.
    rotate_requested: bool,
    /// The current keypair has completed an exchange with the peer.
    exchanged: bool,
    last_publish: Option<Instant>,
}

/// The network unit: session crypto plus the five platform capabilities.
pub struct NetworkUnit<R, L, X, T, P, S> {
    pub session: SessionCrypto<R>,
    pub link: L,
    pub exchange: X,
    pub telemetry: T,
    pub provisioner: P,
    pub store: S,
    pub config: DeviceConfig,
    pub timing: Timing,
    pub device_id: &'static str,
    pub topic: &'static str,
}

impl<R, L, X, T, P, S> NetworkUnit<R, L, X, T, P, S>
where
    R: RngCore + CryptoRng,
    L: NetworkLink,
    X: KeyExchange,
    T: Telemetry,
    P: Provisioner,
    S: ConfigStore,
{
    /// Run until provisioning completes. Publishes the current mode on
    /// `mode`; this is the only writer.
    pub async fn run(
        mut self,
        events: InputEventReceiver<'_>,
        mode: ModeSender<'_>,
    ) -> NetExit {
        mode.send(SystemMode::Normal);
        let mut state = NormalState {
            rotate_requested: true,
            exchanged: false,
            last_publish: None,
        };

        loop {
            // Step 1: drain queued input before anything slow.
            let mut enter_config = false;
            while let Ok(ev) = events.try_receive() {
                enter_config |= note_event(&mut state, ev);
            }
            if enter_config {
                let config = self.run_config(&mode).await;
                return NetExit::Provisioned(config);
            }

            // Step 2: bring the link up.
            if !self.link.is_up() {
                if !self.config.has_wifi_credentials() {
                    info!("no wifi credentials stored; long-press the button to provision");
                    if let Some(ev) =
                        wait_or_event(&events, self.timing.no_credentials_wait_ms).await
                    {
                        if note_event(&mut state, ev) {
                            let config = self.run_config(&mode).await;
                            return NetExit::Provisioned(config);
                        }
                    }
                    continue;
                }
                match self.connect(&mut state, &events).await {
                    ConnectOutcome::Connected => info!("wifi link up"),
                    ConnectOutcome::Interrupted => {
                        let config = self.run_config(&mode).await;
                        return NetExit::Provisioned(config);
                    }
                    ConnectOutcome::TimedOut => {
                        warn!("wifi connect attempt failed, will retry");
                        continue;
                    }
                }
            }

            // Step 3: (re)generate the keypair if one is owed. Failure keeps
            // the request pending for the next cycle.
            if state.rotate_requested {
                match self.session.generate_keypair() {
                    Ok(()) => {
                        info!("session keypair generated");
                        state.rotate_requested = false;
                        state.exchanged = false;
                    }
                    Err(err) => warn!("keypair generation failed: {err}"),
                }
            }

            // Step 4: exchange public keys until the session is ready.
            if !state.exchanged && !state.rotate_requested {
                match self.handshake().await {
                    Ok(()) => {
                        info!("key exchange complete, session ready");
                        state.exchanged = true;
                        state.last_publish = None;
                    }
                    Err(err) => {
                        warn!("key exchange failed: {err}");
                        if let Some(ev) =
                            wait_or_event(&events, self.timing.exchange_backoff_ms).await
                        {
                            if note_event(&mut state, ev) {
                                let config = self.run_config(&mode).await;
                                return NetExit::Provisioned(config);
                            }
                        }
                        continue;
                    }
                }
            }

            // Step 5: telemetry, only over a ready session.
            if state.exchanged && self.session.is_ready() {
                self.telemetry.maintain().await;
                let due = state
                    .last_publish
                    .is_none_or(|at| at.elapsed() >= Duration::from_millis(self.timing.telemetry_interval_ms));
                if due {
                    state.last_publish = Some(Instant::now());
                    self.publish_telemetry().await;
                }
            }

            // Step 6: idle, still listening for presses.
            if let Some(ev) = wait_or_event(&events, self.timing.idle_ms).await {
                if note_event(&mut state, ev) {
                    let config = self.run_config(&mode).await;
                    return NetExit::Provisioned(config);
                }
            }
        }
    }

    /// Begin association, then poll link-up under the retry budget. Short
    /// presses during the wait are remembered; a long press aborts.
    async fn connect(
        &mut self,
        state: &mut NormalState,
        events: &InputEventReceiver<'_>,
    ) -> ConnectOutcome {
        info!("connecting to wifi network `{}`", self.config.wifi_ssid);
        if let Err(err) = self
            .link
            .start_connect(&self.config.wifi_ssid, &self.config.wifi_pass)
            .await
        {
            // A rejected config can fail without ever yielding; back off
            // here so the retry loop cannot monopolize the executor, and
            // keep listening for presses through the wait.
            warn!("wifi association failed to start: {err}");
            match wait_or_event(events, self.timing.connect_retry_backoff_ms).await {
                Some(InputEvent::LongPress) => return ConnectOutcome::Interrupted,
                Some(ev) => {
                    note_event(state, ev);
                }
                None => {}
            }
            return ConnectOutcome::TimedOut;
        }

        for _ in 0..self.timing.connect_attempts {
            if self.link.is_up() {
                return ConnectOutcome::Connected;
            }
            match wait_or_event(events, self.timing.connect_poll_ms).await {
                Some(InputEvent::LongPress) => return ConnectOutcome::Interrupted,
                Some(ev) => {
                    note_event(state, ev);
                }
                None => {}
            }
        }
        ConnectOutcome::TimedOut
    }

    /// POST our public key, import the peer's, derive the session key.
    async fn handshake(&mut self) -> Result<(), HandshakeError> {
        let local_hex = self.session.public_key_hex()?;
        let peer_hex = self.exchange.exchange(&local_hex).await?;
        self.session.import_peer_public_key_hex(&peer_hex)?;
        Ok(())
    }

    async fn publish_telemetry(&mut self) {
        let payload = format!("Data: {}", Instant::now().as_millis());
        let json = match self.seal_payload(&payload) {
            Ok(json) => json,
            Err(err) => {
                warn!("failed to seal telemetry: {err}");
                return;
            }
        };
        if self.telemetry.publish(self.topic, &json).await {
            debug!("published {} bytes to `{}`", json.len(), self.topic);
        } else {
            warn!("telemetry publish failed, will retry next interval");
        }
    }

    fn seal_payload(&mut self, payload: &str) -> Result<String, SessionError> {
        let packet = self.session.seal(payload.as_bytes(), self.device_id)?;
        packet.to_json()
    }

    /// Config mode: run the provisioning intake until a submission is
    /// persisted. Terminal; the caller restarts.
    async fn run_config(&mut self, mode: &ModeSender<'_>) -> DeviceConfig {
        info!("entering config mode, starting provisioning intake");
        mode.send(SystemMode::Config);
        self.provisioner.start().await;

        loop {
            if let Some(config) = self.provisioner.take_submission() {
                // Persist before stopping the intake so a write failure can
                // be retried with a fresh submission.
                if let Err(err) = self.store.save(&config) {
                    warn!("failed to persist submitted config: {err}");
                    continue;
                }
                info!("provisioning submission persisted");
                self.provisioner.stop().await;
                return config;
            }
            Timer::after(Duration::from_millis(self.timing.provision_poll_ms)).await;
        }
    }
}

/// Record one event into Normal-mode state; true means enter Config.
fn note_event(state: &mut NormalState, event: InputEvent) -> bool {
    match event {
        InputEvent::ShortPress => {
            info!("short press: session key rotation requested");
            state.rotate_requested = true;
            false
        }
        InputEvent::LongPress => {
            info!("long press: switching to config mode");
            true
        }
    }
}

/// Sleep for `ms`, returning early with any input event that arrives.
async fn wait_or_event(
    events: &InputEventReceiver<'_>,
    ms: u64,
) -> Option<InputEvent> {
    match select(Timer::after(Duration::from_millis(ms)), events.receive()).await {
        Either::First(()) => None,
        Either::Second(ev) => Some(ev),
    }
}
