//! Process-wide registries (C3/C6 support): the socket-interface registry
//! and the cluster-type factory registry. Both are initialized once at
//! startup and read-only after — an explicit `OnceLock`-backed singleton
//! rather than hidden global mutation, per the design notes.

use std::sync::OnceLock;

use logger::Logger;
use rt_config::ClusterConfig;

use crate::address::{ACCEPTOR_SOCKET_INTERFACE_NAME, INITIATOR_SOCKET_INTERFACE_NAME};
use crate::cluster::ReverseTunnelCluster;
use crate::socket_interface::{InitiatorClientSocketInterface, ReverseTunnelAcceptorInterface};

pub const CLUSTER_TYPE_NAME: &str = "envoy.clusters.reverse_connection";

pub struct SocketInterfaceRegistry {
    initiator: InitiatorClientSocketInterface,
    acceptor: ReverseTunnelAcceptorInterface,
}

impl SocketInterfaceRegistry {
    fn new(logger: Logger) -> Self {
        SocketInterfaceRegistry {
            initiator: InitiatorClientSocketInterface::new(logger.clone()),
            acceptor: ReverseTunnelAcceptorInterface::new(logger),
        }
    }

    pub fn initiator(&self) -> &InitiatorClientSocketInterface {
        &self.initiator
    }

    pub fn acceptor(&self) -> &ReverseTunnelAcceptorInterface {
        &self.acceptor
    }

    pub fn name_is_registered(name: &str) -> bool {
        name == INITIATOR_SOCKET_INTERFACE_NAME || name == ACCEPTOR_SOCKET_INTERFACE_NAME
    }
}

static SOCKET_INTERFACE_REGISTRY: OnceLock<SocketInterfaceRegistry> = OnceLock::new();

/// Initializes the process-wide socket-interface registry. Idempotent:
/// later calls are no-ops and simply return the already-initialized
/// instance, matching a once-at-startup singleton rather than a mutable
/// global.
pub fn init_socket_interface_registry(logger: Logger) -> &'static SocketInterfaceRegistry {
    SOCKET_INTERFACE_REGISTRY.get_or_init(|| SocketInterfaceRegistry::new(logger))
}

pub fn socket_interface_registry() -> Option<&'static SocketInterfaceRegistry> {
    SOCKET_INTERFACE_REGISTRY.get()
}

/// Cluster-type factory registry. Only one cluster type is registered here
/// (`envoy.clusters.reverse_connection`); the registry still exists as a
/// named lookup rather than a direct constructor call so the surrounding
/// proxy's config loader can address it by the stable name.
pub struct ClusterTypeRegistry;

impl ClusterTypeRegistry {
    pub fn create(name: &str, config: ClusterConfig, logger: Logger) -> Option<ReverseTunnelCluster> {
        if name == CLUSTER_TYPE_NAME {
            Some(ReverseTunnelCluster::new(config, logger))
        } else {
            None
        }
    }
}
