//! Peer directory: remote endpoints we are connected to, persisted as JSON.
//!
//! The file holds an array of `{id, ip, port}` records and is rewritten in
//! full, synchronously, on every change. A failed write is reported to the
//! caller but the in-memory list stays authoritative.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use flotilla_protocol::random_token;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// A known remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    pub ip: IpAddr,
    pub port: u16,
}

impl Peer {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            id: random_token(),
            ip,
            port,
        }
    }
}

/// JSON file backing the peer directory.
#[derive(Debug, Clone)]
pub struct PeerStore {
    path: PathBuf,
}

impl PeerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the whole file.
    pub fn save(&self, peers: &[Peer]) -> Result<()> {
        let data = serde_json::to_vec(peers)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| self.persistence(source))?;
        }
        std::fs::write(&self.path, data).map_err(|source| self.persistence(source))
    }

    /// Read the file; a missing file is an empty list.
    pub fn load(&self) -> Result<Vec<Peer>> {
        match std::fs::read(&self.path) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(self.persistence(source)),
        }
    }

    fn persistence(&self, source: std::io::Error) -> Error {
        Error::Persistence {
            path: self.path.clone(),
            source,
        }
    }
}

#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: Vec<Peer>,
    store: Option<PeerStore>,
}

impl PeerDirectory {
    pub fn new(store: Option<PeerStore>) -> Self {
        Self {
            peers: Vec::new(),
            store,
        }
    }

    /// Record a new connection from `ip:port`.
    ///
    /// Returns the created record, or `None` when a record for the same ip
    /// already exists.
    pub fn on_peer_connected(&mut self, ip: IpAddr, port: u16) -> Result<Option<Peer>> {
        if self.peers.iter().any(|p| p.ip == ip) {
            debug!(ip = %ip, "Peer with this ip already known");
            return Ok(None);
        }

        let peer = Peer::new(ip, port);
        self.peers.push(peer.clone());
        self.persist()?;
        Ok(Some(peer))
    }

    /// Remove the record with `peer_id`, if present.
    pub fn on_peer_disconnected(&mut self, peer_id: &str) -> Result<Option<Peer>> {
        let Some(pos) = self.peers.iter().position(|p| p.id == peer_id) else {
            return Ok(None);
        };
        let peer = self.peers.remove(pos);
        self.persist()?;
        Ok(Some(peer))
    }

    pub fn find_by_ip(&self, ip: IpAddr) -> Option<&Peer> {
        self.peers.iter().find(|p| p.ip == ip)
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    fn persist(&self) -> Result<()> {
        match &self.store {
            Some(store) => store.save(&self.peers),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn same_ip_is_recorded_once() {
        let mut dir = PeerDirectory::new(None);

        let first = dir.on_peer_connected(ip("10.0.0.1"), 5000).unwrap();
        let again = dir.on_peer_connected(ip("10.0.0.1"), 5001).unwrap();
        let other = dir.on_peer_connected(ip("10.0.0.2"), 5000).unwrap();

        assert!(first.is_some());
        assert!(again.is_none());
        assert!(other.is_some());
        assert_eq!(dir.peers().len(), 2);
    }

    #[test]
    fn writes_through_on_every_change() {
        let tmp = tempdir().unwrap();
        let store = PeerStore::new(tmp.path().join("Data").join("peerlist.json"));
        let mut dir = PeerDirectory::new(Some(store.clone()));

        let peer = dir.on_peer_connected(ip("127.0.0.1"), 4242).unwrap().unwrap();
        assert_eq!(store.load().unwrap(), vec![peer.clone()]);

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw[0]["ip"], "127.0.0.1");
        assert_eq!(raw[0]["port"], 4242);
        assert_eq!(raw[0]["id"], peer.id.as_str());

        let removed = dir.on_peer_disconnected(&peer.id).unwrap();
        assert_eq!(removed, Some(peer));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn unknown_peer_removal_is_a_no_op() {
        let mut dir = PeerDirectory::new(None);
        assert_eq!(dir.on_peer_disconnected("nope").unwrap(), None);
    }

    #[test]
    fn missing_file_loads_empty() {
        let tmp = tempdir().unwrap();
        let store = PeerStore::new(tmp.path().join("absent.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn persistence_failure_keeps_memory_state() {
        let tmp = tempdir().unwrap();
        // A directory where the file should be makes every write fail.
        let store = PeerStore::new(tmp.path());
        let mut dir = PeerDirectory::new(Some(store));

        let err = dir.on_peer_connected(ip("10.1.1.1"), 1).unwrap_err();
        assert!(matches!(err, Error::Persistence { .. }));
        assert!(dir.find_by_ip(ip("10.1.1.1")).is_some());
    }
}
