//! Handshake filter (C5): the terminal request filter that turns a
//! reverse-connection handshake request into a parked socket.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use logger::Logger;
use rt_wire::{HandshakeRequest, HandshakeResponse};

use crate::custodial::AcceptorIoHandle;
use crate::identity::{ClusterIdentity, NodeIdentity, TenantIdentity};
use crate::pool::{ParkedSocket, UpstreamSocketPool};

pub const REVERSE_CONNECTIONS_REQUEST_PATH: &str = "/reverse_connections/request";
pub const HTTP_POST_METHOD: &str = "POST";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    Idle,
    AwaitingBody,
    Processing,
    Accepting,
    Rejecting,
    PassThrough,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderDecision {
    Continue,
    StopIteration,
}

/// The subset of the underlying connection the filter needs in order to
/// duplicate and park the socket. A borrowed reference for the duration of
/// one request breaks the cyclic filter <-> connection reference the
/// design notes call out; the duplicated handle's ownership moves into the
/// pool, the original stays with the connection.
pub trait HandshakeConnection {
    fn io_handle(&self) -> &AcceptorIoHandle;
    fn local_addr(&self) -> SocketAddr;
    fn remote_addr(&self) -> SocketAddr;
    /// `socket_reused` mirrors the upstream `SocketReused` flag: true when
    /// this close follows a successful handshake whose fd lives on in the
    /// pool, false on every rejection path.
    fn close_logical(&mut self, reason: &str, socket_reused: bool);
}

/// Parses a DNS-SAN entry of the form `key=value`; TLS-derived values take
/// precedence over whatever the handshake payload itself carried.
fn overlay_from_sans(request: &mut HandshakeRequest, sans: &[String]) {
    for san in sans {
        if let Some((key, value)) = san.split_once('=') {
            match key {
                "tenantId" => request.tenant_uuid = value.to_string(),
                "clusterId" => request.cluster_uuid = value.to_string(),
                _ => {}
            }
        }
    }
}

pub struct HandshakeFilter {
    state: FilterState,
    ping_interval: Duration,
    logger: Logger,
    last_response: Option<HandshakeResponse>,
}

impl HandshakeFilter {
    pub fn new(ping_interval: Duration, logger: Logger) -> Self {
        HandshakeFilter {
            state: FilterState::Idle,
            ping_interval,
            logger,
            last_response: None,
        }
    }

    pub fn state(&self) -> FilterState {
        self.state
    }

    pub fn is_reverse_connection_request(method: &str, path: &str) -> bool {
        method == HTTP_POST_METHOD && path == REVERSE_CONNECTIONS_REQUEST_PATH
    }

    /// Header-frame transition: `Idle -> AwaitingBody` on a matching
    /// request, `Idle -> PassThrough` (terminal, transparent) otherwise.
    pub fn on_headers(&mut self, method: &str, path: &str) -> HeaderDecision {
        if self.state != FilterState::Idle {
            return HeaderDecision::StopIteration;
        }
        if Self::is_reverse_connection_request(method, path) {
            self.state = FilterState::AwaitingBody;
            HeaderDecision::StopIteration
        } else {
            self.state = FilterState::PassThrough;
            HeaderDecision::Continue
        }
    }

    /// Body-frame processing, steps 1-7 of the design. Idempotent: once the
    /// filter has closed the logical connection for this request, further
    /// invocations return the cached response without repeating any of the
    /// side effects (no double-duplication, no double pool insertion).
    pub fn on_body(
        &mut self,
        body: &[u8],
        tls_sans: &[String],
        connection: &mut dyn HandshakeConnection,
        pool: &mut UpstreamSocketPool,
    ) -> HandshakeResponse {
        if self.state == FilterState::Closed {
            return self
                .last_response
                .clone()
                .unwrap_or_else(HandshakeResponse::accepted);
        }
        if body.is_empty() {
            return self.reject(connection, "empty handshake body");
        }

        self.state = FilterState::Processing;

        let mut request = match HandshakeRequest::decode(body) {
            Ok(request) if !request.node_uuid.is_empty() => request,
            _ => {
                return self.reject(connection, "Failed to parse request message or required fields missing");
            }
        };

        overlay_from_sans(&mut request, tls_sans);
        if request.node_uuid.is_empty() {
            return self.reject(connection, "Failed to parse request message or required fields missing");
        }

        if !connection.io_handle().is_open() {
            return self.reject(connection, "underlying connection socket is not open");
        }

        let (duplicated, duplicate_guard) = match connection.io_handle().duplicate() {
            Ok(pair) => pair,
            Err(e) => {
                self.logger.error(&format!("fd duplication failed: {e}"), "handshake_filter");
                return self.reject(connection, "failed to duplicate connection socket");
            }
        };

        self.logger.debug(
            &format!(
                "duplicated fd: original={}, copy={}",
                connection.io_handle().raw_fd(),
                std::os::fd::AsRawFd::as_raw_fd(&duplicated)
            ),
            "handshake_filter",
            "",
        );

        let parked = ParkedSocket::new(
            duplicated,
            duplicate_guard,
            connection.local_addr(),
            connection.remote_addr(),
            NodeIdentity::new(request.node_uuid.clone()),
            ClusterIdentity::new(request.cluster_uuid.clone()),
            self.ping_interval,
            None,
            Instant::now(),
        );
        let _tenant = TenantIdentity::new(request.tenant_uuid.clone());
        pool.add_connection_socket(parked, false);

        self.state = FilterState::Accepting;
        let response = HandshakeResponse::accepted();
        self.finish(connection, response, true)
    }

    fn reject(&mut self, connection: &mut dyn HandshakeConnection, message: &str) -> HandshakeResponse {
        self.state = FilterState::Rejecting;
        let response = HandshakeResponse::invalid_argument(message);
        self.finish(connection, response, false)
    }

    fn finish(
        &mut self,
        connection: &mut dyn HandshakeConnection,
        response: HandshakeResponse,
        socket_reused: bool,
    ) -> HandshakeResponse {
        connection.close_logical("accepted_reverse_conn", socket_reused);
        connection.io_handle().take_file_event();
        self.state = FilterState::Closed;
        self.last_response = Some(response.clone());
        response
    }
}
