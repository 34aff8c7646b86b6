//! Socket interfaces (C3): the two process-wide factories that create
//! custodial sockets for each tunnel direction.

use std::net::SocketAddr;
use std::os::fd::IntoRawFd;

use logger::Logger;
use socket2::{Domain, Socket, Type};

use crate::custodial::{AcceptorIoHandle, InitiatorIoHandle};
use crate::error::RtError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Stream,
    Datagram,
}

/// Only IPv4 and IPv6 are meaningful for a reverse-tunnel address; anything
/// else (unix-domain, proxy-internal) is a precondition failure at the
/// construction boundary, matching the teacher's own use of `expect`/
/// `assert!` rather than threading an error through call sites that can
/// never legitimately receive one.
pub fn ip_family_supported(addr: &SocketAddr) -> bool {
    addr.is_ipv4() || addr.is_ipv6()
}

/// `v6only` is read from the caller's address configuration rather than
/// assumed: a dual-stack bind needs `false` here, same as the original's
/// `addr->ip()->ipv6()->v6only()`.
fn new_raw_socket(
    module: &'static str,
    addr: &SocketAddr,
    kind: SocketKind,
    v6only: bool,
) -> Result<Socket, RtError> {
    assert!(ip_family_supported(addr), "reverse-tunnel sockets only support IPv4/IPv6 addresses");

    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let ty = match kind {
        SocketKind::Stream => Type::STREAM,
        SocketKind::Datagram => Type::DGRAM,
    };

    let socket = Socket::new(domain, ty, None).map_err(|e| RtError::socket_creation(module, e))?;
    socket.set_nonblocking(true).map_err(|e| RtError::socket_creation(module, e))?;
    if addr.is_ipv6() {
        socket.set_only_v6(v6only).map_err(|e| RtError::socket_creation(module, e))?;
    }
    Ok(socket)
}

/// `envoy.bootstrap.reverse_tunnel.initiator_client_socket_interface`
pub struct InitiatorClientSocketInterface {
    logger: Logger,
}

impl InitiatorClientSocketInterface {
    pub fn new(logger: Logger) -> Self {
        InitiatorClientSocketInterface { logger }
    }

    /// The address-less overload always fails: reverse-connection sockets
    /// require a named address.
    pub fn socket_without_address(&self) -> Result<InitiatorIoHandle, RtError> {
        Err(RtError::config(
            "initiator_client_socket_interface",
            "address-less socket() is not supported by the reverse-tunnel initiator interface",
        ))
    }

    pub fn socket(&self, addr: SocketAddr, kind: SocketKind, v6only: bool) -> Result<InitiatorIoHandle, RtError> {
        let socket = new_raw_socket("initiator_client_socket_interface", &addr, kind, v6only)?;
        let fd = socket.into_raw_fd();
        Ok(InitiatorIoHandle::from_raw_fd(fd, self.logger.clone()))
    }
}

/// `envoy.bootstrap.reverse_tunnel.upstream_socket_interface.acceptor`
pub struct ReverseTunnelAcceptorInterface {
    logger: Logger,
}

impl ReverseTunnelAcceptorInterface {
    pub fn new(logger: Logger) -> Self {
        ReverseTunnelAcceptorInterface { logger }
    }

    pub fn socket_without_address(&self) -> Result<AcceptorIoHandle, RtError> {
        Err(RtError::config(
            "upstream_socket_interface.acceptor",
            "address-less socket() is not supported by the reverse-tunnel acceptor interface",
        ))
    }

    /// Creates, configures, and binds a listening socket, returning a
    /// custodial handle. `accept()` on the returned handle yields children
    /// that are themselves `AcceptorIoHandle`s (see `custodial.rs`).
    pub fn socket(&self, addr: SocketAddr, kind: SocketKind, v6only: bool) -> Result<AcceptorIoHandle, RtError> {
        let module = "upstream_socket_interface.acceptor";
        let socket = new_raw_socket(module, &addr, kind, v6only)?;
        socket.set_reuse_address(true).map_err(|e| RtError::socket_creation(module, e))?;
        socket.bind(&addr.into()).map_err(|e| RtError::socket_creation(module, e))?;
        if kind == SocketKind::Stream {
            socket.listen(1024).map_err(|e| RtError::socket_creation(module, e))?;
        }
        let fd = socket.into_raw_fd();
        Ok(AcceptorIoHandle::from_raw_fd(fd, self.logger.clone()))
    }
}
