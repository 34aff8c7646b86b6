//! Upstream socket pool (C4).
//!
//! Per-worker, single-threaded by construction: no field here is wrapped in
//! a `Mutex` or `RwLock`, and the type is not `Send` in spirit even though
//! nothing currently stops it compiling across threads — callers are
//! expected to keep exactly one `UpstreamSocketPool` per worker thread, the
//! same discipline the source enforces with thread-local storage.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};

use logger::Logger;
use socket2::Socket;

use crate::custodial::{DuplicateGuard, FileEventToken};
use crate::identity::{ClusterIdentity, NodeIdentity};

/// A duplicated, parked reverse socket awaiting an upstream request.
pub struct ParkedSocket {
    socket: Socket,
    duplicate_guard: DuplicateGuard,
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    pub node_identity: NodeIdentity,
    pub cluster_identity: ClusterIdentity,
    pub ping_interval: Duration,
    pub last_ping_reply: Instant,
    pub file_event: Option<FileEventToken>,
}

impl ParkedSocket {
    pub fn new(
        socket: Socket,
        duplicate_guard: DuplicateGuard,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        node_identity: NodeIdentity,
        cluster_identity: ClusterIdentity,
        ping_interval: Duration,
        file_event: Option<FileEventToken>,
        now: Instant,
    ) -> Self {
        ParkedSocket {
            socket,
            duplicate_guard,
            local_addr,
            remote_addr,
            node_identity,
            cluster_identity,
            ping_interval,
            last_ping_reply: now,
            file_event,
        }
    }

    fn send_keepalive_byte(&self) -> std::io::Result<usize> {
        self.socket.send(&[0u8])
    }

    pub fn raw_fd(&self) -> std::os::fd::RawFd {
        self.socket.as_raw_fd()
    }

    /// Releases this socket's hold on the original custodial handle's
    /// `has_live_duplicate` flag. Called whenever this parked socket is
    /// actually reclaimed or evicted, never from `Drop` — a socket still
    /// sitting in the pool must keep the original's 0-byte `recv` remapped.
    fn retire(&self) {
        self.duplicate_guard.retire();
    }
}

/// Returns true if this was the first time a socket was parked for
/// `node_identity` — the caller arms the ping timer exactly once, on that
/// transition, to avoid ping storms from re-arming per socket.
pub struct UpstreamSocketPool {
    nodes: HashMap<NodeIdentity, VecDeque<ParkedSocket>>,
    clusters: HashMap<ClusterIdentity, BTreeSet<NodeIdentity>>,
    node_cluster: HashMap<NodeIdentity, ClusterIdentity>,
    armed_timers: HashSet<NodeIdentity>,
    logger: Logger,
}

impl UpstreamSocketPool {
    pub fn new(logger: Logger) -> Self {
        UpstreamSocketPool {
            nodes: HashMap::new(),
            clusters: HashMap::new(),
            node_cluster: HashMap::new(),
            armed_timers: HashSet::new(),
            logger,
        }
    }

    /// Parks `socket` under `node_identity`, indexes it under
    /// `cluster_identity`, and reports whether the caller must now arm a
    /// ping timer for this node (first insertion only). `_rebalanced` is an
    /// opaque hint from the caller that this socket moved from another
    /// worker and should not itself trigger rebalancing logic — the pool
    /// has no rebalancing logic of its own, so it only threads the flag
    /// through for callers that do.
    pub fn add_connection_socket(&mut self, socket: ParkedSocket, _rebalanced: bool) -> bool {
        let node_identity = socket.node_identity.clone();
        let cluster_identity = socket.cluster_identity.clone();

        self.clusters
            .entry(cluster_identity.clone())
            .or_default()
            .insert(node_identity.clone());
        self.node_cluster.insert(node_identity.clone(), cluster_identity);

        self.nodes.entry(node_identity.clone()).or_default().push_back(socket);

        let first_insertion = self.armed_timers.insert(node_identity.clone());
        if first_insertion {
            self.logger.debug("arming ping timer", "upstream_socket_pool", node_identity.as_str());
        }
        first_insertion
    }

    pub fn take_socket_for_node(&mut self, node_identity: &NodeIdentity) -> Option<ParkedSocket> {
        let queue = self.nodes.get_mut(node_identity)?;
        let socket = queue.pop_front();
        if queue.is_empty() {
            self.nodes.remove(node_identity);
            self.remove_from_cluster_index(node_identity);
        }
        if let Some(socket) = &socket {
            socket.retire();
        }
        socket
    }

    pub fn take_socket_for_cluster(&mut self, cluster_identity: &ClusterIdentity) -> Option<ParkedSocket> {
        let node_identity = self.clusters.get(cluster_identity)?.iter().next().cloned()?;
        self.take_socket_for_node(&node_identity)
    }

    /// Sends a single keepalive byte over every socket parked for
    /// `node_identity`. Sockets whose write fails are evicted individually;
    /// the identity's pool entry survives if any socket remains healthy.
    pub fn ping(&mut self, node_identity: &NodeIdentity) {
        let Some(queue) = self.nodes.get_mut(node_identity) else {
            return;
        };

        let mut survivors = VecDeque::with_capacity(queue.len());
        while let Some(socket) = queue.pop_front() {
            match socket.send_keepalive_byte() {
                Ok(_) => survivors.push_back(socket),
                Err(e) => {
                    socket.retire();
                    self.logger.warn(
                        &format!("evicting parked socket after failed ping: {e}"),
                        "upstream_socket_pool",
                    );
                }
            }
        }

        if survivors.is_empty() {
            self.nodes.remove(node_identity);
            self.remove_from_cluster_index(node_identity);
        } else {
            self.nodes.insert(node_identity.clone(), survivors);
        }
    }

    /// Closes and removes every socket parked for `node_identity`.
    pub fn evict(&mut self, node_identity: &NodeIdentity) {
        if let Some(queue) = self.nodes.remove(node_identity) {
            for socket in &queue {
                socket.retire();
            }
            self.logger.info("evicted node from upstream socket pool", "upstream_socket_pool");
        }
        self.remove_from_cluster_index(node_identity);
        self.armed_timers.remove(node_identity);
    }

    fn remove_from_cluster_index(&mut self, node_identity: &NodeIdentity) {
        if let Some(cluster_identity) = self.node_cluster.remove(node_identity) {
            if let Some(bucket) = self.clusters.get_mut(&cluster_identity) {
                bucket.remove(node_identity);
                if bucket.is_empty() {
                    self.clusters.remove(&cluster_identity);
                }
            }
        }
    }

    pub fn cluster_contains(&self, cluster_identity: &ClusterIdentity, node_identity: &NodeIdentity) -> bool {
        self.clusters
            .get(cluster_identity)
            .is_some_and(|bucket| bucket.contains(node_identity))
    }

    pub fn parked_count(&self, node_identity: &NodeIdentity) -> usize {
        self.nodes.get(node_identity).map_or(0, VecDeque::len)
    }
}
