//! Address & resolver shims (C2).
//!
//! Both tunnel directions get a parallel address type that wraps a base
//! `SocketAddr` and delegates every attribute except which socket interface
//! it names — that one accessor is the entire reason these types exist.

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};

use crate::error::RtError;

pub const INITIATOR_SOCKET_INTERFACE_NAME: &str =
    "envoy.bootstrap.reverse_tunnel.initiator_client_socket_interface";
pub const ACCEPTOR_SOCKET_INTERFACE_NAME: &str =
    "envoy.bootstrap.reverse_tunnel.upstream_socket_interface.acceptor";

pub const INITIATOR_RESOLVER_NAME: &str = "envoy.resolvers.upstream_reverse_connection";
pub const ACCEPTOR_RESOLVER_NAME: &str = "envoy.resolvers.reverse_connection_target_host";

/// An address bound to the initiator-side custodial socket interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReverseConnInitiatorAddress {
    base: SocketAddr,
}

impl ReverseConnInitiatorAddress {
    pub fn new(base: SocketAddr) -> Self {
        ReverseConnInitiatorAddress { base }
    }

    pub fn base_address(&self) -> SocketAddr {
        self.base
    }

    pub fn socket_interface_name(&self) -> &'static str {
        INITIATOR_SOCKET_INTERFACE_NAME
    }
}

impl fmt::Display for ReverseConnInitiatorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)
    }
}

/// An address bound to the acceptor-side custodial socket interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamReverseConnAddress {
    base: SocketAddr,
}

impl UpstreamReverseConnAddress {
    pub fn new(base: SocketAddr) -> Self {
        UpstreamReverseConnAddress { base }
    }

    pub fn base_address(&self) -> SocketAddr {
        self.base
    }

    pub fn socket_interface_name(&self) -> &'static str {
        ACCEPTOR_SOCKET_INTERFACE_NAME
    }
}

impl fmt::Display for UpstreamReverseConnAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)
    }
}

fn parse_base_address(module: &'static str, raw: &str) -> Result<SocketAddr, RtError> {
    raw.to_socket_addrs()
        .ok()
        .and_then(|mut it| it.next())
        .ok_or_else(|| RtError::config(module, format!("invalid socket address: '{raw}'")))
}

pub fn resolve_initiator_address(raw: &str) -> Result<ReverseConnInitiatorAddress, RtError> {
    Ok(ReverseConnInitiatorAddress::new(parse_base_address(
        "initiator_resolver",
        raw,
    )?))
}

pub fn resolve_acceptor_address(raw: &str) -> Result<UpstreamReverseConnAddress, RtError> {
    Ok(UpstreamReverseConnAddress::new(parse_base_address(
        "acceptor_resolver",
        raw,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiator_address_names_its_socket_interface() {
        let addr = resolve_initiator_address("127.0.0.1:9000").unwrap();
        assert_eq!(addr.socket_interface_name(), INITIATOR_SOCKET_INTERFACE_NAME);
    }

    #[test]
    fn acceptor_address_names_its_socket_interface() {
        let addr = resolve_acceptor_address("127.0.0.1:9001").unwrap();
        assert_eq!(addr.socket_interface_name(), ACCEPTOR_SOCKET_INTERFACE_NAME);
    }

    #[test]
    fn resolve_fails_on_malformed_address() {
        let result = resolve_acceptor_address("not-an-address");
        assert!(result.is_err());
    }
}
