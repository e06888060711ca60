//! Minimal MQTT 3.1.1 publisher.
//!
//! Hand-rolled client covering exactly what the node needs: CONNECT with
//! optional credentials, QoS 0 PUBLISH, and PINGREQ keep-alives. Connection
//! loss is repaired on the next `maintain` call; the orchestrator treats a
//! failed publish as skippable.

use alloc::string::String;
use alloc::vec::Vec;

use embassy_net::tcp::TcpSocket;
use embassy_net::{IpEndpoint, Ipv4Address, Stack};
use embassy_time::{Duration, Instant};
use embedded_io_async::Write;
use log::{info, warn};

use sentinel_core::capabilities::Telemetry;

const KEEPALIVE_SECS: u16 = 60;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CLIENT_ID: &str = "sentinel-node";

pub struct MqttTelemetry {
    stack: Stack<'static>,
    socket: Option<TcpSocket<'static>>,
    buffers: Option<(&'static mut [u8], &'static mut [u8])>,
    broker: String,
    port: u16,
    username: String,
    password: String,
    connected: bool,
    last_activity: Instant,
}

impl MqttTelemetry {
    /// `rx` and `tx` are the socket buffers, handed over for the lifetime
    /// of the client.
    pub fn new(
        stack: Stack<'static>,
        rx: &'static mut [u8],
        tx: &'static mut [u8],
        broker: String,
        port: u16,
        username: String,
        password: String,
    ) -> Self {
        Self {
            stack,
            socket: None,
            buffers: Some((rx, tx)),
            broker,
            port,
            username,
            password,
            connected: false,
            last_activity: Instant::now(),
        }
    }

    async fn connect(&mut self) -> bool {
        let Some(addr) = self.broker.parse::<Ipv4Address>().ok() else {
            warn!("mqtt broker `{}` is not an IPv4 address", self.broker);
            return false;
        };

        if self.socket.is_none() {
            let Some((rx, tx)) = self.buffers.take() else {
                return false;
            };
            let mut socket = TcpSocket::new(self.stack, rx, tx);
            socket.set_timeout(Some(CONNECT_TIMEOUT));
            self.socket = Some(socket);
        }
        let Some(socket) = self.socket.as_mut() else {
            return false;
        };

        socket.abort();
        if socket
            .connect(IpEndpoint::new(addr.into(), self.port))
            .await
            .is_err()
        {
            warn!("mqtt broker {}:{} unreachable", self.broker, self.port);
            return false;
        }

        let connect = encode_connect(CLIENT_ID, &self.username, &self.password);
        if socket.write_all(&connect).await.is_err() {
            return false;
        }

        // CONNACK: fixed header 0x20 0x02, then flags and return code.
        let mut ack = [0u8; 4];
        let mut read = 0;
        while read < ack.len() {
            match socket.read(&mut ack[read..]).await {
                Ok(0) | Err(_) => return false,
                Ok(n) => read += n,
            }
        }
        if ack[0] != 0x20 || ack[3] != 0x00 {
            warn!("mqtt broker refused connection (return code {})", ack[3]);
            return false;
        }

        info!("mqtt connected to {}:{}", self.broker, self.port);
        self.last_activity = Instant::now();
        self.connected = true;
        true
    }

    async fn ping(&mut self) -> bool {
        let Some(socket) = self.socket.as_mut() else {
            return false;
        };
        socket.write_all(&[0xC0, 0x00]).await.is_ok()
    }
}

impl Telemetry for MqttTelemetry {
    async fn maintain(&mut self) -> bool {
        if !self.connected && !self.connect().await {
            return false;
        }
        let idle = self.last_activity.elapsed();
        if idle >= Duration::from_secs(u64::from(KEEPALIVE_SECS) / 2) {
            if self.ping().await {
                self.last_activity = Instant::now();
            } else {
                warn!("mqtt keep-alive failed, reconnecting next cycle");
                self.connected = false;
                return false;
            }
        }
        true
    }

    async fn publish(&mut self, topic: &str, payload: &str) -> bool {
        if !self.connected {
            return false;
        }
        let Some(socket) = self.socket.as_mut() else {
            return false;
        };
        let packet = encode_publish(topic, payload.as_bytes());
        match socket.write_all(&packet).await {
            Ok(()) => {
                self.last_activity = Instant::now();
                true
            }
            Err(_) => {
                self.connected = false;
                false
            }
        }
    }
}

// ---- packet encoding ----

fn encode_remaining_length(out: &mut Vec<u8>, mut len: usize) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
}

fn push_utf8(out: &mut Vec<u8>, text: &str) {
    out.extend_from_slice(&(text.len() as u16).to_be_bytes());
    out.extend_from_slice(text.as_bytes());
}

fn encode_connect(client_id: &str, username: &str, password: &str) -> Vec<u8> {
    let with_auth = !username.is_empty();
    let mut flags = 0x02u8; // clean session
    if with_auth {
        flags |= 0xC0;
    }

    let mut variable = Vec::new();
    push_utf8(&mut variable, "MQTT");
    variable.push(0x04); // protocol level 3.1.1
    variable.push(flags);
    variable.extend_from_slice(&KEEPALIVE_SECS.to_be_bytes());
    push_utf8(&mut variable, client_id);
    if with_auth {
        push_utf8(&mut variable, username);
        push_utf8(&mut variable, password);
    }

    let mut packet = Vec::with_capacity(variable.len() + 4);
    packet.push(0x10);
    encode_remaining_length(&mut packet, variable.len());
    packet.extend_from_slice(&variable);
    packet
}

fn encode_publish(topic: &str, payload: &[u8]) -> Vec<u8> {
    let remaining = 2 + topic.len() + payload.len();
    let mut packet = Vec::with_capacity(remaining + 4);
    packet.push(0x30); // QoS 0, no retain
    encode_remaining_length(&mut packet, remaining);
    push_utf8(&mut packet, topic);
    packet.extend_from_slice(payload);
    packet
}
