//! Node configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use flotilla_protocol::{SeenPolicy, DEFAULT_TTL};

use crate::error::{Error, Result};

/// Configuration for a Flotilla node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address the overlay listener binds to.
    pub listen_addr: SocketAddr,

    /// Peers dialed by [`Node::bootstrap`](crate::Node::bootstrap), as `host:port`.
    pub bootstrap_peers: Vec<String>,

    /// Peer list file. `None` keeps the list in memory only.
    pub peer_list_path: Option<PathBuf>,

    /// Hop budget for packets this node originates.
    pub default_ttl: u32,

    /// Retention of processed packet ids.
    pub seen_policy: SeenPolicy,

    /// Frames queued per connection before sends are dropped.
    pub send_queue: usize,

    /// Events buffered per subscriber before it starts lagging.
    pub event_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            bootstrap_peers: Vec::new(),
            peer_list_path: Some(PathBuf::from("./Data/peerlist.json")),
            default_ttl: DEFAULT_TTL,
            seen_policy: SeenPolicy::Unbounded,
            send_queue: 256,
            event_capacity: 1024,
        }
    }
}

impl NodeConfig {
    /// Create config from environment variables, falling back to defaults.
    ///
    /// | variable | field |
    /// |---|---|
    /// | `FLOTILLA_LISTEN_ADDR` | `listen_addr` |
    /// | `FLOTILLA_BOOTSTRAP_PEERS` | `bootstrap_peers` (comma separated) |
    /// | `FLOTILLA_PEER_LIST` | `peer_list_path` (empty disables persistence) |
    /// | `FLOTILLA_DEFAULT_TTL` | `default_ttl` |
    /// | `FLOTILLA_SEEN_CAPACITY`, `FLOTILLA_SEEN_TTL_SECS` | bounded `seen_policy` |
    /// | `FLOTILLA_SEND_QUEUE` | `send_queue` |
    /// | `FLOTILLA_EVENT_CAPACITY` | `event_capacity` |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = lookup("FLOTILLA_LISTEN_ADDR") {
            config.listen_addr = parse("FLOTILLA_LISTEN_ADDR", &addr)?;
        }

        if let Some(peers) = lookup("FLOTILLA_BOOTSTRAP_PEERS") {
            config.bootstrap_peers = peers
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
        }

        if let Some(path) = lookup("FLOTILLA_PEER_LIST") {
            config.peer_list_path = if path.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }

        if let Some(ttl) = lookup("FLOTILLA_DEFAULT_TTL") {
            config.default_ttl = parse("FLOTILLA_DEFAULT_TTL", &ttl)?;
        }

        let capacity = lookup("FLOTILLA_SEEN_CAPACITY")
            .map(|v| parse::<usize>("FLOTILLA_SEEN_CAPACITY", &v))
            .transpose()?;
        let ttl = lookup("FLOTILLA_SEEN_TTL_SECS")
            .map(|v| parse::<u64>("FLOTILLA_SEEN_TTL_SECS", &v))
            .transpose()?
            .map(Duration::from_secs);
        config.seen_policy = match (capacity, ttl) {
            (None, None) => SeenPolicy::Unbounded,
            (capacity, ttl) => SeenPolicy::Bounded { capacity, ttl },
        };

        if let Some(queue) = lookup("FLOTILLA_SEND_QUEUE") {
            config.send_queue = parse("FLOTILLA_SEND_QUEUE", &queue)?;
        }

        if let Some(capacity) = lookup("FLOTILLA_EVENT_CAPACITY") {
            config.event_capacity = parse("FLOTILLA_EVENT_CAPACITY", &capacity)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.send_queue == 0 {
            return Err(Error::Config("send_queue must be at least 1".into()));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be at least 1".into()));
        }
        if let SeenPolicy::Bounded { capacity: Some(0), .. } = self.seen_policy {
            return Err(Error::Config("seen-set capacity must be at least 1".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    #[must_use]
    pub fn with_bootstrap_peers(mut self, peers: Vec<String>) -> Self {
        self.bootstrap_peers = peers;
        self
    }

    #[must_use]
    pub fn with_peer_list(mut self, path: Option<PathBuf>) -> Self {
        self.peer_list_path = path;
        self
    }

    #[must_use]
    pub fn with_default_ttl(mut self, ttl: u32) -> Self {
        self.default_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_seen_policy(mut self, policy: SeenPolicy) -> Self {
        self.seen_policy = policy;
        self
    }

    /// Loopback listener, no persistence. Used by tests and local demos.
    pub fn local() -> Self {
        Self::default()
            .with_listen_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
            .with_peer_list(None)
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{key}={value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_variables() {
        let config = NodeConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.listen_addr.port(), 0);
        assert_eq!(config.default_ttl, 255);
        assert_eq!(config.seen_policy, SeenPolicy::Unbounded);
        assert_eq!(config.peer_list_path, Some(PathBuf::from("./Data/peerlist.json")));
        assert!(config.bootstrap_peers.is_empty());
    }

    #[test]
    fn reads_every_variable() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("FLOTILLA_LISTEN_ADDR", "127.0.0.1:7000"),
            ("FLOTILLA_BOOTSTRAP_PEERS", "10.0.0.1:7000, ,10.0.0.2:7000"),
            ("FLOTILLA_PEER_LIST", ""),
            ("FLOTILLA_DEFAULT_TTL", "16"),
            ("FLOTILLA_SEEN_TTL_SECS", "60"),
            ("FLOTILLA_SEND_QUEUE", "8"),
        ]))
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:7000".parse().unwrap());
        assert_eq!(config.bootstrap_peers, vec!["10.0.0.1:7000", "10.0.0.2:7000"]);
        assert_eq!(config.peer_list_path, None);
        assert_eq!(config.default_ttl, 16);
        assert_eq!(
            config.seen_policy,
            SeenPolicy::Bounded { capacity: None, ttl: Some(Duration::from_secs(60)) }
        );
        assert_eq!(config.send_queue, 8);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let err = NodeConfig::from_lookup(lookup(&[("FLOTILLA_DEFAULT_TTL", "-3")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = NodeConfig::from_lookup(lookup(&[("FLOTILLA_SEND_QUEUE", "0")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = NodeConfig::from_lookup(lookup(&[("FLOTILLA_SEEN_CAPACITY", "0")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
