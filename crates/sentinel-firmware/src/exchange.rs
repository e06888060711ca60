//! HTTP key-exchange client.
//!
//! POSTs the device public key as JSON to the configured endpoint and
//! extracts the peer public key from the JSON response. Only plain
//! `http://a.b.c.d:port/path` endpoints are supported; the exchange peer
//! lives on the provisioned LAN.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use embassy_net::tcp::TcpSocket;
use embassy_net::{IpEndpoint, Ipv4Address, Stack};
use embassy_time::Duration;
use embedded_io_async::Write;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use sentinel_core::capabilities::{ExchangeError, KeyExchange};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const RESPONSE_CEILING: usize = 2048;

#[derive(Serialize)]
struct ExchangeRequest<'a> {
    device: &'a str,
    #[serde(rename = "publicKey")]
    public_key: &'a str,
}

#[derive(Deserialize)]
struct ExchangeResponse {
    #[serde(rename = "publicKey")]
    public_key: String,
}

pub struct HttpExchange {
    stack: Stack<'static>,
    url: String,
    device_id: &'static str,
}

impl HttpExchange {
    pub fn new(stack: Stack<'static>, url: String, device_id: &'static str) -> Self {
        Self {
            stack,
            url,
            device_id,
        }
    }
}

impl KeyExchange for HttpExchange {
    async fn exchange(&mut self, local_public_hex: &str) -> Result<String, ExchangeError> {
        let (endpoint, path) = parse_http_url(&self.url).ok_or_else(|| {
            warn!("key exchange url `{}` is not http://ip:port/path", self.url);
            ExchangeError::BadResponse
        })?;

        let mut rx_buffer = [0u8; 2048];
        let mut tx_buffer = [0u8; 1024];
        let mut socket = TcpSocket::new(self.stack, &mut rx_buffer, &mut tx_buffer);
        socket.set_timeout(Some(HTTP_TIMEOUT));

        socket
            .connect(endpoint)
            .await
            .map_err(|_| ExchangeError::Unreachable)?;

        let body = serde_json::to_string(&ExchangeRequest {
            device: self.device_id,
            public_key: local_public_hex,
        })
        .map_err(|_| ExchangeError::BadResponse)?;

        let request = format!(
            "POST {path} HTTP/1.1\r\n\
             Host: {endpoint}\r\n\
             Content-Type: application/json\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\r\n{body}",
            body.len()
        );
        socket
            .write_all(request.as_bytes())
            .await
            .map_err(|_| ExchangeError::Unreachable)?;

        let mut response = Vec::new();
        let mut chunk = [0u8; 512];
        loop {
            match socket.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    response.extend_from_slice(&chunk[..n]);
                    if response.len() > RESPONSE_CEILING {
                        return Err(ExchangeError::BadResponse);
                    }
                }
                Err(_) => return Err(ExchangeError::Unreachable),
            }
        }
        socket.close();

        let body = http_body(&response).ok_or(ExchangeError::BadResponse)?;
        debug!("exchange response body: {} bytes", body.len());
        let parsed: ExchangeResponse =
            serde_json::from_slice(body).map_err(|_| ExchangeError::BadResponse)?;
        Ok(parsed.public_key)
    }
}

/// Split `http://a.b.c.d:port/path` into an endpoint and path. Port
/// defaults to 80, path to `/`.
fn parse_http_url(url: &str) -> Option<(IpEndpoint, &str)> {
    let rest = url.strip_prefix("http://")?;
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    let (host, port) = match authority.split_once(':') {
        Some((host, port)) => (host, port.parse().ok()?),
        None => (authority, 80),
    };
    let addr: Ipv4Address = host.parse().ok()?;
    Some((IpEndpoint::new(addr.into(), port), path))
}

/// Body of an HTTP response: everything after the header terminator.
fn http_body(response: &[u8]) -> Option<&[u8]> {
    let split = response.windows(4).position(|w| w == b"\r\n\r\n")?;
    Some(&response[split + 4..])
}
