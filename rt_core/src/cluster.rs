//! Reverse-tunnel cluster (C6): maps an incoming request to a node
//! identity, mints or reuses a synthetic host for it, and backs the
//! unsupported parts of the load-balancer contract with their specified
//! empty/null values.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{JoinHandle, spawn};
use std::time::Duration;

use logger::Logger;
use rt_config::ClusterConfig;

use crate::identity::{ClusterIdentity, NodeIdentity};

/// A cluster-manager "upstream host" with no real IP, used only to carry a
/// node identity through the surrounding proxy's cluster-manager machinery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticHost {
    pub identity: NodeIdentity,
    pub address: SocketAddr,
}

impl SyntheticHost {
    fn mint(identity: NodeIdentity) -> Self {
        SyntheticHost {
            identity,
            address: "127.0.0.1:0".parse().unwrap(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    Node(NodeIdentity),
    Cluster(ClusterIdentity),
    None,
}

fn is_cluster_header(name: &str) -> bool {
    name.to_ascii_lowercase().contains("cluster")
}

/// Parses `<identity>.<suffix>[:<port>]`. Identity may not itself contain
/// `.`; if a port is present it must be base-10 digits. An empty identity
/// parses successfully (explicitly allowed boundary behavior) — only a
/// missing identity segment, a non-matching suffix, or a non-numeric port
/// is a parse failure.
fn parse_host_routing(value: &str, suffix: &str) -> Option<String> {
    let (host_part, port_part) = match value.split_once(':') {
        Some((h, p)) => (h, Some(p)),
        None => (value, None),
    };
    if let Some(port) = port_part {
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }
    let dotted_suffix = format!(".{suffix}");
    let identity = host_part.strip_suffix(&dotted_suffix)?;
    if identity.contains('.') {
        return None;
    }
    Some(identity.to_string())
}

/// Parses `<identity>.<suffix>` (no port) for SNI routing.
fn parse_sni_routing(value: &str, suffix: &str) -> Option<String> {
    let dotted_suffix = format!(".{suffix}");
    let identity = value.strip_suffix(&dotted_suffix)?;
    if identity.contains('.') {
        return None;
    }
    Some(identity.to_string())
}

pub struct ReverseTunnelCluster {
    config: ClusterConfig,
    hosts: HashMap<NodeIdentity, Arc<SyntheticHost>>,
    logger: Logger,
}

impl ReverseTunnelCluster {
    pub fn new(config: ClusterConfig, logger: Logger) -> Self {
        ReverseTunnelCluster {
            config,
            hosts: HashMap::new(),
            logger,
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Host lookup in priority order: explicit headers, then Host header,
    /// then SNI.
    pub fn resolve_route(
        &self,
        headers: &HashMap<String, String>,
        host_header: Option<&str>,
        sni: Option<&str>,
    ) -> RouteTarget {
        for name in &self.config.http_header_names {
            if let Some(value) = headers.get(name) {
                if !value.is_empty() {
                    return if is_cluster_header(name) {
                        RouteTarget::Cluster(ClusterIdentity::new(value.as_str()))
                    } else {
                        RouteTarget::Node(NodeIdentity::new(value.as_str()))
                    };
                }
            }
        }

        if let Some(host) = host_header {
            if let Some(identity) = parse_host_routing(host, &self.config.proxy_host_suffix) {
                return RouteTarget::Node(NodeIdentity::new(identity));
            }
        }

        if let Some(sni) = sni {
            if let Some(identity) = parse_sni_routing(sni, &self.config.proxy_host_suffix) {
                return RouteTarget::Node(NodeIdentity::new(identity));
            }
        }

        RouteTarget::None
    }

    /// Mints a synthetic host on first lookup for `identity`; subsequent
    /// lookups return the same instance.
    pub fn choose_host(&mut self, identity: &NodeIdentity) -> Arc<SyntheticHost> {
        self.hosts
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(SyntheticHost::mint(identity.clone())))
            .clone()
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn contains_host(&self, identity: &NodeIdentity) -> bool {
        self.hosts.contains_key(identity)
    }

    /// Removes every host with no outstanding use handle (the map's own
    /// `Arc` is the only remaining reference). Returns the number removed.
    pub fn cleanup(&mut self) -> usize {
        let before = self.hosts.len();
        self.hosts.retain(|_, host| Arc::strong_count(host) > 1);
        let removed = before - self.hosts.len();
        if removed > 0 {
            self.logger.debug("cleanup removed unused synthetic hosts", "reverse_tunnel_cluster", removed);
        }
        removed
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.config.cleanup_interval_ms)
    }

    // Unsupported load-balancer operations, returning their specified
    // empty/null values rather than being left unimplemented.
    pub fn peek_another_host(&self) -> Option<Arc<SyntheticHost>> {
        None
    }

    pub fn select_existing_connection(&self) -> Option<()> {
        None
    }

    pub fn lifetime_callbacks(&self) -> Vec<()> {
        Vec::new()
    }
}

/// Spawns a dedicated thread that calls `cleanup` on the re-armed interval,
/// the same long-lived-thread-doing-periodic-work shape the node's ping
/// thread uses, generalized from liveness checking to host cleanup.
pub fn spawn_cleanup_thread(cluster: Arc<std::sync::Mutex<ReverseTunnelCluster>>, logger: Logger) -> JoinHandle<()> {
    spawn(move || {
        loop {
            let interval = {
                let guard = match cluster.lock() {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
                guard.cleanup_interval()
            };
            std::thread::sleep(interval);
            match cluster.lock() {
                Ok(mut guard) => {
                    guard.cleanup();
                }
                Err(_) => {
                    logger.error("cluster lock poisoned, stopping cleanup thread", "reverse_tunnel_cluster");
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(suffix: &str, headers: Vec<&str>) -> ClusterConfig {
        ClusterConfig {
            cleanup_interval_ms: 30_000,
            http_header_names: headers.into_iter().map(String::from).collect(),
            proxy_host_suffix: suffix.to_string(),
        }
    }

    #[test]
    fn host_minting_is_deterministic() {
        let mut cluster = ReverseTunnelCluster::new(config("tcpproxy.envoy.remote", vec![]), Logger::null());
        let a = cluster.choose_host(&NodeIdentity::new("N1"));
        let b = cluster.choose_host(&NodeIdentity::new("N1"));
        assert_eq!(a, b);
        let c = cluster.choose_host(&NodeIdentity::new("N2"));
        assert_ne!(a, c);
    }

    #[test]
    fn cleanup_retains_hosts_with_outstanding_handles() {
        let mut cluster = ReverseTunnelCluster::new(config("tcpproxy.envoy.remote", vec![]), Logger::null());
        let h1 = cluster.choose_host(&NodeIdentity::new("H1"));
        cluster.choose_host(&NodeIdentity::new("H2"));

        let removed = cluster.cleanup();
        assert_eq!(removed, 1);
        assert!(cluster.contains_host(&NodeIdentity::new("H1")));
        assert!(!cluster.contains_host(&NodeIdentity::new("H2")));
        drop(h1);
    }

    #[test]
    fn host_header_routes_to_identity() {
        let cluster = ReverseTunnelCluster::new(config("tcpproxy.envoy.remote", vec![]), Logger::null());
        let target = cluster.resolve_route(&HashMap::new(), Some("N1.tcpproxy.envoy.remote:80"), None);
        assert_eq!(target, RouteTarget::Node(NodeIdentity::new("N1")));
    }

    #[test]
    fn host_header_with_empty_identity_parses_as_empty_string() {
        let cluster = ReverseTunnelCluster::new(config("tcpproxy.envoy.remote", vec![]), Logger::null());
        let target = cluster.resolve_route(&HashMap::new(), Some(".tcpproxy.envoy.remote:8080"), None);
        assert_eq!(target, RouteTarget::Node(NodeIdentity::new("")));
    }

    #[test]
    fn host_header_with_non_numeric_port_is_rejected() {
        let cluster = ReverseTunnelCluster::new(config("tcpproxy.envoy.remote", vec![]), Logger::null());
        let target = cluster.resolve_route(&HashMap::new(), Some("N1.tcpproxy.envoy.remote:abc"), None);
        assert_eq!(target, RouteTarget::None);
    }

    #[test]
    fn sni_identical_to_valid_host_body_is_accepted() {
        let cluster = ReverseTunnelCluster::new(config("tcpproxy.envoy.remote", vec![]), Logger::null());
        let target = cluster.resolve_route(&HashMap::new(), None, Some("N1.tcpproxy.envoy.remote"));
        assert_eq!(target, RouteTarget::Node(NodeIdentity::new("N1")));
    }

    #[test]
    fn custom_suffix_routing_rejects_default_suffix() {
        let cluster = ReverseTunnelCluster::new(config("custom.proxy.suffix", vec![]), Logger::null());
        let matched = cluster.resolve_route(&HashMap::new(), Some("N1.custom.proxy.suffix:8080"), None);
        assert_eq!(matched, RouteTarget::Node(NodeIdentity::new("N1")));

        let unmatched = cluster.resolve_route(&HashMap::new(), Some("N1.tcpproxy.envoy.remote:8080"), None);
        assert_eq!(unmatched, RouteTarget::None);
    }

    #[test]
    fn header_priority_wins_over_host() {
        let cluster = ReverseTunnelCluster::new(
            config("tcpproxy.envoy.remote", vec!["x-remote-node-id", "x-dst-cluster-uuid"]),
            Logger::null(),
        );
        let mut headers = HashMap::new();
        headers.insert("x-remote-node-id".to_string(), "N3".to_string());
        let target = cluster.resolve_route(&headers, Some("N1.tcpproxy.envoy.remote"), None);
        assert_eq!(target, RouteTarget::Node(NodeIdentity::new("N3")));
    }

    #[test]
    fn designated_cluster_header_resolves_to_cluster_identity() {
        let cluster = ReverseTunnelCluster::new(
            config("tcpproxy.envoy.remote", vec!["x-dst-cluster-uuid"]),
            Logger::null(),
        );
        let mut headers = HashMap::new();
        headers.insert("x-dst-cluster-uuid".to_string(), "C9".to_string());
        let target = cluster.resolve_route(&headers, None, None);
        assert_eq!(target, RouteTarget::Cluster(ClusterIdentity::new("C9")));
    }

    #[test]
    fn unsupported_lb_operations_return_empty_values() {
        let cluster = ReverseTunnelCluster::new(config("tcpproxy.envoy.remote", vec![]), Logger::null());
        assert!(cluster.peek_another_host().is_none());
        assert!(cluster.select_existing_connection().is_none());
        assert!(cluster.lifetime_callbacks().is_empty());
    }
}
