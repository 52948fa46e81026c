//! Minimal HTTP/1.1 GET client for probes.
//!
//! One TCP connection per request; the connection task is detached and
//! ends when the response has been read.

use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http::header::{ACCEPT, HOST, USER_AGENT};
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::ProbeError;

const USER_AGENT_VALUE: &str = "deckhand-probe/0.1";

/// A parsed `http://host[:port][/path]` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// `host:port` to connect to.
    pub address: String,
    /// Value for the `Host` header.
    pub host: String,
    /// Origin-form request target, always starting with `/`.
    pub path: String,
}

impl Endpoint {
    /// Parse a probe URL. A missing scheme is taken as `http`.
    pub fn parse(url: &str) -> Result<Self, ProbeError> {
        let url = url.trim();
        let rest = match url.split_once("://") {
            Some(("http", rest)) => rest,
            Some((scheme, _)) => return Err(ProbeError::UnsupportedScheme(scheme.to_string())),
            None => url,
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        if authority.is_empty() {
            return Err(ProbeError::InvalidUrl {
                url: url.to_string(),
                reason: "missing host".to_string(),
            });
        }

        let has_port = !authority.ends_with(']')
            && authority
                .rsplit_once(':')
                .is_some_and(|(_, port)| port.parse::<u16>().is_ok());
        let address = if has_port {
            authority.to_string()
        } else {
            format!("{authority}:80")
        };

        Ok(Self {
            address,
            host: authority.to_string(),
            path: path.to_string(),
        })
    }
}

/// GET `url`, returning the status and the full body.
///
/// The whole exchange (connect, request, body) is bounded by `timeout`.
pub async fn http_get(url: &str, timeout: Duration) -> Result<(StatusCode, Bytes), ProbeError> {
    let endpoint = Endpoint::parse(url)?;
    tokio::time::timeout(timeout, get(&endpoint))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
}

async fn get(endpoint: &Endpoint) -> Result<(StatusCode, Bytes), ProbeError> {
    let stream = TcpStream::connect(&endpoint.address)
        .await
        .map_err(|source| ProbeError::Connect {
            address: endpoint.address.clone(),
            source,
        })?;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| ProbeError::Handshake(e.to_string()))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "probe connection closed with error");
        }
    });

    let req = http::Request::builder()
        .method(http::Method::GET)
        .uri(endpoint.path.as_str())
        .header(HOST, endpoint.host.as_str())
        .header(USER_AGENT, USER_AGENT_VALUE)
        .header(ACCEPT, "application/json")
        .body(Empty::<Bytes>::new())
        .map_err(|e| ProbeError::Request(e.to_string()))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| ProbeError::Request(e.to_string()))?;
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| ProbeError::Request(e.to_string()))?
        .to_bytes();

    debug!(address = %endpoint.address, path = %endpoint.path, %status, bytes = body.len(), "probe response");
    Ok((status, body))
}
