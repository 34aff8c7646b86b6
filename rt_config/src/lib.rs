//! Key=value configuration decoding for the reverse-tunnel cluster type and
//! the two reverse-tunnel socket interfaces. No external config-format crate:
//! the source is a flat `key=value` text file, one directive per line,
//! blank lines and `#`-prefixed lines ignored — the same shape the rest of
//! this workspace already parses node config with.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};

pub const DEFAULT_PROXY_HOST_SUFFIX: &str = "tcpproxy.envoy.remote";
const CLUSTER_PROVIDED: &str = "CLUSTER_PROVIDED";

#[derive(Debug, PartialEq, Eq)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ConfigError {}

fn err(msg: impl Into<String>) -> ConfigError {
    ConfigError(msg.into())
}

fn parse_key_value_lines(contents: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut map = HashMap::new();
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let (key, value) = trimmed
            .split_once('=')
            .ok_or_else(|| err(format!("malformed config line: {trimmed}")))?;
        map.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(map)
}

fn read_lines_from_file(path: &str) -> Result<HashMap<String, String>, ConfigError> {
    let contents = fs::read_to_string(path)
        .map_err(|e| err(format!("reading config file '{path}': {e}")))?;
    parse_key_value_lines(&contents)
}

/// Configuration for the `envoy.clusters.reverse_connection` cluster type.
///
/// `lb_policy` must be `CLUSTER_PROVIDED` and `load_assignment` must be
/// absent; both are hard configuration errors, not defaults to fall back on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub cleanup_interval_ms: u64,
    pub http_header_names: Vec<String>,
    pub proxy_host_suffix: String,
}

impl ClusterConfig {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let map = read_lines_from_file(path)?;
        Self::from_map(&map)
    }

    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let lb_policy = map
            .get("lb_policy")
            .ok_or_else(|| err("missing required field 'lb_policy'"))?;
        if lb_policy != CLUSTER_PROVIDED {
            return Err(err("lb_policy must be CLUSTER_PROVIDED"));
        }
        if map.contains_key("load_assignment") {
            return Err(err("load_assignment must be absent for a reverse-connection cluster"));
        }

        let cleanup_interval_ms = map
            .get("cleanup_interval")
            .ok_or_else(|| err("missing required field 'cleanup_interval'"))?
            .parse::<u64>()
            .map_err(|_| err("cleanup_interval must be an integer number of milliseconds"))?;
        if cleanup_interval_ms == 0 {
            return Err(err("cleanup_interval must be greater than 0"));
        }

        let http_header_names = match map.get("http_header_names") {
            Some(raw) if !raw.trim().is_empty() => {
                raw.split(',').map(|s| s.trim().to_string()).collect()
            }
            _ => Vec::new(),
        };

        let proxy_host_suffix = map
            .get("proxy_host_suffix")
            .cloned()
            .unwrap_or_else(|| DEFAULT_PROXY_HOST_SUFFIX.to_string());
        if proxy_host_suffix.is_empty() {
            return Err(err("proxy_host_suffix must not be empty"));
        }

        Ok(ClusterConfig {
            cleanup_interval_ms,
            http_header_names,
            proxy_host_suffix,
        })
    }
}

/// Bind-address configuration shared by both reverse-tunnel socket
/// interfaces (`initiator_client_socket_interface`,
/// `upstream_socket_interface.acceptor`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketBindConfig {
    pub address: SocketAddr,
    /// `IPV6_V6ONLY` for a v6 bind address. Defaults to `true`, matching the
    /// historical hardcoded behavior; set `v6only=false` to dual-stack bind.
    pub v6only: bool,
}

impl SocketBindConfig {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let map = read_lines_from_file(path)?;
        Self::from_map(&map)
    }

    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let raw = map
            .get("bind_address")
            .ok_or_else(|| err("missing required field 'bind_address'"))?;
        let mut addrs = raw
            .to_socket_addrs()
            .map_err(|_| err(format!("bind_address '{raw}' is not a valid ip:port")))?;
        let address = addrs
            .next()
            .ok_or_else(|| err(format!("could not resolve bind_address '{raw}'")))?;

        let v6only = match map.get("v6only").map(String::as_str) {
            None => true,
            Some("true") => true,
            Some("false") => false,
            Some(other) => return Err(err(format!("v6only must be 'true' or 'false', got '{other}'"))),
        };

        Ok(SocketBindConfig { address, v6only })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{File, remove_file};
    use std::io::Write;

    fn write_temp(path: &str, content: &str) {
        let mut file = File::create(path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn cluster_config_parses_valid_file() {
        let path = "test_cluster_ok.conf";
        write_temp(
            path,
            "lb_policy=CLUSTER_PROVIDED\ncleanup_interval=30000\nhttp_header_names=x-remote-node-id,x-dst-cluster-uuid\n",
        );
        let cfg = ClusterConfig::from_file(path).unwrap();
        assert_eq!(cfg.cleanup_interval_ms, 30_000);
        assert_eq!(cfg.http_header_names, vec!["x-remote-node-id", "x-dst-cluster-uuid"]);
        assert_eq!(cfg.proxy_host_suffix, DEFAULT_PROXY_HOST_SUFFIX);
        remove_file(path).unwrap();
    }

    #[test]
    fn cluster_config_rejects_wrong_lb_policy() {
        let path = "test_cluster_bad_lb.conf";
        write_temp(path, "lb_policy=ROUND_ROBIN\ncleanup_interval=1000\n");
        let result = ClusterConfig::from_file(path);
        assert_eq!(result, Err(err("lb_policy must be CLUSTER_PROVIDED")));
        remove_file(path).unwrap();
    }

    #[test]
    fn cluster_config_rejects_load_assignment() {
        let path = "test_cluster_load_assignment.conf";
        write_temp(
            path,
            "lb_policy=CLUSTER_PROVIDED\ncleanup_interval=1000\nload_assignment=anything\n",
        );
        let result = ClusterConfig::from_file(path);
        assert!(result.is_err());
        remove_file(path).unwrap();
    }

    #[test]
    fn cluster_config_accepts_custom_suffix() {
        let path = "test_cluster_suffix.conf";
        write_temp(
            path,
            "lb_policy=CLUSTER_PROVIDED\ncleanup_interval=1000\nproxy_host_suffix=custom.proxy.suffix\n",
        );
        let cfg = ClusterConfig::from_file(path).unwrap();
        assert_eq!(cfg.proxy_host_suffix, "custom.proxy.suffix");
        remove_file(path).unwrap();
    }

    #[test]
    fn socket_bind_config_parses_address() {
        let mut map = HashMap::new();
        map.insert("bind_address".to_string(), "127.0.0.1:9000".to_string());
        let cfg = SocketBindConfig::from_map(&map).unwrap();
        assert_eq!(cfg.address, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert!(cfg.v6only);
    }

    #[test]
    fn socket_bind_config_rejects_missing_address() {
        let map = HashMap::new();
        assert!(SocketBindConfig::from_map(&map).is_err());
    }

    #[test]
    fn socket_bind_config_parses_explicit_v6only_false() {
        let mut map = HashMap::new();
        map.insert("bind_address".to_string(), "[::1]:9000".to_string());
        map.insert("v6only".to_string(), "false".to_string());
        let cfg = SocketBindConfig::from_map(&map).unwrap();
        assert!(!cfg.v6only);
    }

    #[test]
    fn socket_bind_config_rejects_malformed_v6only() {
        let mut map = HashMap::new();
        map.insert("bind_address".to_string(), "127.0.0.1:9000".to_string());
        map.insert("v6only".to_string(), "yes".to_string());
        assert!(SocketBindConfig::from_map(&map).is_err());
    }
}
