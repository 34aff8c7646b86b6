//! Reverse-tunnel core: the acceptor and initiator socket interfaces, the
//! custodial fd-lifecycle wrapper, the handshake filter that turns an
//! accepted HTTP request into a parked socket, the per-worker socket pool,
//! and the cluster type that routes requests back onto a parked socket.

pub mod address;
pub mod client_connection;
pub mod cluster;
pub mod custodial;
pub mod error;
pub mod handshake_filter;
pub mod identity;
pub mod peek_buffer;
pub mod pool;
pub mod registry;
pub mod runtime;
pub mod socket_interface;

pub use address::{
    ACCEPTOR_RESOLVER_NAME, ACCEPTOR_SOCKET_INTERFACE_NAME, INITIATOR_RESOLVER_NAME,
    INITIATOR_SOCKET_INTERFACE_NAME, ReverseConnInitiatorAddress, UpstreamReverseConnAddress,
};
pub use client_connection::InitiatorClientConnection;
pub use cluster::{ReverseTunnelCluster, RouteTarget, SyntheticHost, spawn_cleanup_thread};
pub use custodial::{AcceptorIoHandle, DuplicateGuard, FileEventToken, InitiatorIoHandle};
pub use error::{RtError, RtErrorKind};
pub use handshake_filter::{FilterState, HandshakeConnection, HandshakeFilter, HeaderDecision};
pub use identity::{ClusterIdentity, NodeIdentity, TenantIdentity};
pub use peek_buffer::{PeekBuffer, PeekResult};
pub use pool::{ParkedSocket, UpstreamSocketPool};
pub use registry::{CLUSTER_TYPE_NAME, ClusterTypeRegistry, SocketInterfaceRegistry};
pub use runtime::AcceptorRuntime;
pub use socket_interface::{InitiatorClientSocketInterface, ReverseTunnelAcceptorInterface, SocketKind};
