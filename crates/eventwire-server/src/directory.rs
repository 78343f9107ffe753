//! Directory of connected peers.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use eventwire_protocol::PeerId;

use crate::error::{ServerError, ServerResult};
use crate::session::Session;

/// A connected peer as listed by [`PeerDirectory::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub name: String,
    pub addr: Option<SocketAddr>,
}

/// All live sessions keyed by identity.
///
/// Every lookup and mutation goes through one mutex. Deliveries work on a
/// snapshot taken under the lock, so a slow socket never blocks accepts or
/// disconnects of other peers.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    // Identities are handed out in increasing order, so key order is
    // connection order.
    peers: Mutex<BTreeMap<PeerId, Arc<Session>>>,
}

impl PeerDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<PeerId, Arc<Session>>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a session, replacing nothing: identities are never reused.
    pub fn add(&self, session: Arc<Session>) {
        let id = session.id();
        if self.lock().insert(id, session).is_some() {
            warn!(peer = %id, "peer id registered twice");
        }
    }

    /// Removes a session. Removing an absent id is a no-op.
    pub fn remove(&self, id: PeerId) -> Option<Arc<Session>> {
        let removed = self.lock().remove(&id);
        if removed.is_some() {
            debug!(peer = %id, "peer removed from directory");
        }
        removed
    }

    /// Looks up a session.
    pub fn get(&self, id: PeerId) -> Option<Arc<Session>> {
        self.lock().get(&id).cloned()
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Connected peers in connection order.
    pub fn list(&self) -> Vec<PeerInfo> {
        self.snapshot(None)
            .iter()
            .map(|session| PeerInfo {
                id: session.id(),
                name: session.name(),
                addr: session.peer_addr(),
            })
            .collect()
    }

    /// Sessions currently registered, minus `exclude`.
    pub fn snapshot(&self, exclude: Option<PeerId>) -> Vec<Arc<Session>> {
        self.lock()
            .values()
            .filter(|session| Some(session.id()) != exclude)
            .cloned()
            .collect()
    }

    /// Renames a peer. Returns false if it is not connected.
    pub fn rename(&self, id: PeerId, name: impl Into<String>) -> bool {
        match self.get(id) {
            Some(session) => {
                session.set_name(name);
                true
            }
            None => false,
        }
    }

    /// Sends one line to a single peer.
    pub fn send_to(&self, id: PeerId, line: &str) -> ServerResult<()> {
        let session = self.get(id).ok_or_else(|| ServerError::unknown_peer(id))?;
        session.send(line)
    }

    /// Sends one line to every peer except `exclude`.
    ///
    /// Returns how many peers accepted the write. Individual failures are
    /// logged and skipped.
    pub fn broadcast(&self, line: &str, exclude: Option<PeerId>) -> usize {
        let mut delivered = 0;
        for session in self.snapshot(exclude) {
            match session.send(line) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(peer = %session.id(), error = %e, "broadcast delivery failed"),
            }
        }
        delivered
    }

    /// Shuts down every registered session.
    pub fn close_all(&self) {
        for session in self.snapshot(None) {
            session.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::socket_pair;
    use std::io::{BufRead, BufReader, Read};
    use std::net::TcpStream;
    use std::thread;
    use std::time::Duration;

    fn session(id: u64) -> (Arc<Session>, TcpStream) {
        let (server, client) = socket_pair();
        let id = PeerId::new(id);
        let session = Session::new(id, format!("User {id}"), server).unwrap();
        (Arc::new(session), client)
    }

    fn read_line(stream: &TcpStream) -> String {
        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line).unwrap();
        line
    }

    #[test]
    fn add_list_remove() {
        let directory = PeerDirectory::new();
        let (a, _ca) = session(0);
        let (b, _cb) = session(1);
        directory.add(a);
        directory.add(b);

        let names: Vec<_> = directory.list().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["User 0", "User 1"]);

        assert!(directory.rename(PeerId::new(1), "bob"));
        assert!(!directory.rename(PeerId::new(9), "nobody"));
        assert_eq!(directory.get(PeerId::new(1)).unwrap().name(), "bob");

        assert!(directory.remove(PeerId::new(0)).is_some());
        assert!(directory.remove(PeerId::new(0)).is_none());
        assert_eq!(directory.len(), 1);
        assert!(!directory.contains(PeerId::new(0)));
    }

    #[test]
    fn send_to_unknown_peer() {
        let directory = PeerDirectory::new();
        let err = directory.send_to(PeerId::new(3), "x\n").unwrap_err();
        assert!(matches!(err, ServerError::UnknownPeer { .. }));
    }

    #[test]
    fn broadcast_skips_excluded() {
        let directory = PeerDirectory::new();
        let (a, ca) = session(0);
        let (b, cb) = session(1);
        let (c, cc) = session(2);
        directory.add(a);
        directory.add(b);
        directory.add(c);

        assert_eq!(directory.broadcast("hi\n", Some(PeerId::new(1))), 2);
        assert_eq!(read_line(&ca), "hi\n");
        assert_eq!(read_line(&cc), "hi\n");

        cb.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
        let mut buf = [0u8; 8];
        assert!((&cb).read(&mut buf).is_err());
    }

    #[test]
    fn concurrent_add_remove_while_broadcasting() {
        let directory = Arc::new(PeerDirectory::new());
        let mut clients = Vec::new();
        let mut sessions = Vec::new();
        for id in 0..16 {
            let (session, client) = session(id);
            sessions.push(session);
            clients.push(client);
        }
        for session in &sessions[..8] {
            directory.add(Arc::clone(session));
        }

        let churn = {
            let directory = Arc::clone(&directory);
            let sessions = sessions.clone();
            thread::spawn(move || {
                for round in 0..50 {
                    let session = &sessions[8 + round % 8];
                    directory.add(Arc::clone(session));
                    directory.remove(session.id());
                }
            })
        };
        let broadcasters: Vec<_> = (0..4)
            .map(|_| {
                let directory = Arc::clone(&directory);
                thread::spawn(move || {
                    (0..25).map(|_| directory.broadcast("tick\n", None)).sum::<usize>()
                })
            })
            .collect();

        churn.join().unwrap();
        let delivered: usize = broadcasters.into_iter().map(|h| h.join().unwrap()).sum();
        assert!(delivered >= 4 * 25 * 8);
        assert_eq!(directory.len(), 8);

        // Every stable peer got each broadcast exactly once.
        for client in &clients[..8] {
            client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            let mut reader = BufReader::new(client);
            for _ in 0..100 {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                assert_eq!(line, "tick\n");
            }
            client.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
            let mut extra = String::new();
            assert!(reader.read_line(&mut extra).is_err());
        }
    }

    #[test]
    fn close_all_shuts_sockets() {
        let directory = PeerDirectory::new();
        let (a, ca) = session(0);
        directory.add(a);
        directory.close_all();

        let mut buf = [0u8; 1];
        assert_eq!((&ca).read(&mut buf).unwrap(), 0);
    }
}
