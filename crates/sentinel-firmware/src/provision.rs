//! Provisioning access point and web intake.
//!
//! In config mode the radio runs a WPA2 access point and a one-page HTTP
//! form on port 80. A submitted form becomes a [`DeviceConfig`] handed to
//! the orchestrator through a one-slot channel; the orchestrator persists
//! it and restarts.

use alloc::string::String;
use alloc::vec::Vec;

use embassy_net::Stack;
use embassy_net::tcp::TcpSocket;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embedded_io_async::Write;
use esp_radio::wifi::{AccessPointConfig, AuthMethod, ModeConfig};
use log::{info, warn};

use sentinel_core::capabilities::Provisioner;
use sentinel_core::config::DeviceConfig;

use crate::wifi::SharedController;

pub const AP_SSID: &str = "ESP32_SECURE_DEVICE";
pub const AP_PASSWORD: &str = "12345678";

const FORM_PAGE: &str = "<!DOCTYPE html><html><head><title>Device Setup</title></head><body>\
<h1>Device Setup</h1><form method='POST' action='/save'>\
WiFi SSID: <input name='wifi_ssid'><br>\
WiFi Password: <input name='wifi_pass' type='password'><br>\
MQTT Server: <input name='mqtt_server'><br>\
MQTT Port: <input name='mqtt_port' value='1883'><br>\
MQTT User: <input name='mqtt_user'><br>\
MQTT Password: <input name='mqtt_pass' type='password'><br>\
Key Exchange URL: <input name='key_url'><br>\
<input type='submit' value='Save'></form></body></html>";

const SAVED_PAGE: &str =
    "<!DOCTYPE html><html><body><h1>Saved</h1><p>The device will restart.</p></body></html>";

/// Completed form submissions, drained by the orchestrator.
static SUBMISSIONS: Channel<CriticalSectionRawMutex, DeviceConfig, 1> = Channel::new();

/// Drives the radio's access-point role for the orchestrator.
pub struct ApProvisioner {
    controller: SharedController,
}

impl ApProvisioner {
    pub fn new(controller: SharedController) -> Self {
        Self { controller }
    }
}

impl Provisioner for ApProvisioner {
    async fn start(&mut self) {
        let mut controller = self.controller.borrow_mut();
        if matches!(controller.is_started(), Ok(true)) {
            let _ = controller.stop_async().await;
        }

        let ap = AccessPointConfig::default()
            .with_ssid(AP_SSID.into())
            .with_password(AP_PASSWORD.into())
            .with_auth_method(AuthMethod::Wpa2Personal);
        if let Err(err) = controller.set_config(&ModeConfig::AccessPoint(ap)) {
            warn!("access point config rejected: {err:?}");
            return;
        }
        match controller.start_async().await {
            Ok(()) => info!("provisioning access point `{AP_SSID}` up"),
            Err(err) => warn!("access point start failed: {err:?}"),
        }
    }

    async fn stop(&mut self) {
        let mut controller = self.controller.borrow_mut();
        let _ = controller.stop_async().await;
        info!("provisioning access point down");
    }

    fn take_submission(&mut self) -> Option<DeviceConfig> {
        SUBMISSIONS.try_receive().ok()
    }
}

/// HTTP intake server on the AP interface. Idle until the access point is
/// brought up; clients only exist in config mode.
#[embassy_executor::task]
pub async fn intake_task(stack: Stack<'static>) -> ! {
    let mut rx_buffer = [0u8; 2048];
    let mut tx_buffer = [0u8; 2048];

    loop {
        let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
        if socket.accept(80).await.is_err() {
            continue;
        }

        let Some(request) = read_request(&mut socket).await else {
            socket.abort();
            continue;
        };

        let body = if request.starts_with(b"POST /save") {
            match request_body(&request).map(parse_form) {
                Some(config) => {
                    info!("provisioning form submitted for ssid `{}`", config.wifi_ssid);
                    if SUBMISSIONS.try_send(config).is_err() {
                        warn!("dropping duplicate provisioning submission");
                    }
                    SAVED_PAGE
                }
                None => FORM_PAGE,
            }
        } else {
            FORM_PAGE
        };

        let response = alloc::format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.flush().await;
        socket.close();
    }
}

/// Read a request up to and including its Content-Length body.
async fn read_request(socket: &mut TcpSocket<'_>) -> Option<Vec<u8>> {
    let mut request = Vec::new();
    let mut chunk = [0u8; 512];

    loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return (!request.is_empty()).then_some(request);
        }
        request.extend_from_slice(&chunk[..n]);
        if request.len() > 8192 {
            return None;
        }

        if let Some(header_end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
            let wanted = content_length(&request[..header_end]).unwrap_or(0);
            if request.len() >= header_end + 4 + wanted {
                return Some(request);
            }
        }
    }
}

fn content_length(headers: &[u8]) -> Option<usize> {
    let text = core::str::from_utf8(headers).ok()?;
    text.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.eq_ignore_ascii_case("content-length")
            .then(|| value.trim().parse().ok())?
    })
}

fn request_body(request: &[u8]) -> Option<&[u8]> {
    let split = request.windows(4).position(|w| w == b"\r\n\r\n")?;
    Some(&request[split + 4..])
}

/// 802.11 SSID ceiling; the radio rejects longer ones.
const SSID_MAX: usize = 32;
/// WPA2 passphrase ceiling.
const PASSPHRASE_MAX: usize = 64;
/// Everything else (hosts, URLs, broker credentials).
const FIELD_MAX: usize = 256;

/// Decode an `application/x-www-form-urlencoded` body into a config.
/// Unknown fields are ignored; missing ones keep their defaults. Values
/// are clamped to lengths the radio and config store will accept.
fn parse_form(body: &[u8]) -> DeviceConfig {
    let mut config = DeviceConfig::default();
    let Ok(text) = core::str::from_utf8(body) else {
        return config;
    };

    for pair in text.split('&') {
        let Some((name, raw)) = pair.split_once('=') else {
            continue;
        };
        let value = percent_decode(raw);
        match name {
            "wifi_ssid" => config.wifi_ssid = clamp(value, SSID_MAX),
            "wifi_pass" => config.wifi_pass = clamp(value, PASSPHRASE_MAX),
            "mqtt_server" => config.mqtt_server = clamp(value, FIELD_MAX),
            "mqtt_port" => {
                if let Ok(port) = value.parse() {
                    config.mqtt_port = port;
                }
            }
            "mqtt_user" => config.mqtt_user = clamp(value, FIELD_MAX),
            "mqtt_pass" => config.mqtt_pass = clamp(value, FIELD_MAX),
            "key_url" => config.key_url = clamp(value, FIELD_MAX),
            _ => {}
        }
    }
    config
}

fn clamp(mut value: String, max: usize) -> String {
    if value.len() > max {
        let mut end = max;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        value.truncate(end);
    }
    value
}

fn percent_decode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut bytes = raw.bytes();
    while let Some(byte) = bytes.next() {
        match byte {
            b'+' => out.push(' '),
            b'%' => {
                let hi = bytes.next().and_then(hex_val);
                let lo = bytes.next().and_then(hex_val);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => out.push(((hi << 4) | lo) as char),
                    _ => out.push('%'),
                }
            }
            other => out.push(other as char),
        }
    }
    out
}

fn hex_val(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
