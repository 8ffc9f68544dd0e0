//! Per-client-id state that may survive across connections.
//!
//! The session owns everything that must be restored after a non-clean
//! reconnect: the in-flight store, the packet-id allocator, the set of QoS 2
//! publishes already received, and the subscription table. The endpoint owns
//! the session while a connection is up and hands it back afterwards.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;

use crate::packet_id::{IdWidth, PacketIdAllocator};
use crate::protocol::packets::{Connect, Will};
use crate::protocol::{Property, Protocol};
use crate::store::InFlightStore;
use crate::subscription::{SubscribeOptions, SubscriptionTable};

/// Session expiry of `u32::MAX` seconds means "never expire"; v5 uses the
/// same sentinel on the wire (0xFFFFFFFF), and a v3.1.1 non-clean session
/// persists until explicitly discarded.
pub const NEVER_EXPIRE: u32 = u32::MAX;

#[derive(Debug)]
pub struct Session {
    client_id: String,
    clean_start: bool,
    keep_alive_sec: u16,
    session_expiry_sec: u32,
    will: Option<Will>,
    username: Option<String>,
    password: Option<Bytes>,
    connect_properties: Vec<Property>,

    pub(crate) store: InFlightStore,
    pub(crate) alloc: PacketIdAllocator,
    pub(crate) qos2_received: HashSet<u32>,
    pub(crate) subscriptions: SubscriptionTable,

    /// Subscribe requests whose SUBACK has not arrived yet; the table is
    /// only updated from the acknowledgement so rejected filters never land
    /// in it.
    pub(crate) pending_subscribe: HashMap<u32, Vec<(String, SubscribeOptions)>>,
    pub(crate) pending_unsubscribe: HashMap<u32, Vec<String>>,
}

impl Session {
    pub fn new(client_id: impl Into<String>) -> Self {
        Session::with_id_width(client_id, IdWidth::Sixteen)
    }

    /// The packet-identifier width is a property of the session: both sides
    /// of the in-flight state use it, and it survives reconnects with the
    /// rest of the session.
    pub fn with_id_width(client_id: impl Into<String>, width: IdWidth) -> Self {
        Session {
            client_id: client_id.into(),
            clean_start: false,
            keep_alive_sec: 0,
            session_expiry_sec: NEVER_EXPIRE,
            will: None,
            username: None,
            password: None,
            connect_properties: Vec::new(),
            store: InFlightStore::new(),
            alloc: PacketIdAllocator::new(width),
            qos2_received: HashSet::new(),
            subscriptions: SubscriptionTable::new(),
            pending_subscribe: HashMap::new(),
            pending_unsubscribe: HashMap::new(),
        }
    }

    /// Builds the server-side session for an inbound CONNECT.
    pub fn from_connect(connect: &Connect, width: IdWidth) -> Self {
        let mut session = Session::with_id_width(connect.client_id.clone(), width);
        session.clean_start = connect.clean_start;
        session.keep_alive_sec = connect.keep_alive;
        session.will = connect.will.clone();
        session.username = connect.username.clone();
        session.password = connect.password.clone();
        session.connect_properties = connect.properties.clone();
        if connect.protocol == Protocol::V5 {
            session.session_expiry_sec = connect
                .properties
                .iter()
                .find_map(|p| match p {
                    Property::SessionExpiryInterval(v) => Some(*v),
                    _ => None,
                })
                .unwrap_or(0);
        }
        session
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn set_client_id(&mut self, id: impl Into<String>) {
        self.client_id = id.into();
    }

    pub fn clean_session(&self) -> bool {
        self.clean_start
    }

    /// v5 calls the same flag "clean start"; both revisions share it here.
    pub fn set_clean_session(&mut self, clean: bool) {
        self.clean_start = clean;
    }

    pub fn keep_alive_sec(&self) -> u16 {
        self.keep_alive_sec
    }

    pub fn set_keep_alive_sec(&mut self, secs: u16) {
        self.keep_alive_sec = secs;
    }

    pub fn session_expiry_sec(&self) -> u32 {
        self.session_expiry_sec
    }

    pub fn set_session_expiry_sec(&mut self, secs: u32) {
        self.session_expiry_sec = secs;
    }

    pub fn will(&self) -> Option<&Will> {
        self.will.as_ref()
    }

    pub fn set_will(&mut self, will: Will) {
        self.will = Some(will);
    }

    pub fn clear_will(&mut self) {
        self.will = None;
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn set_user_name(&mut self, name: impl Into<String>) {
        self.username = Some(name.into());
    }

    pub fn password(&self) -> Option<&[u8]> {
        self.password.as_deref()
    }

    pub fn set_password(&mut self, password: impl Into<Bytes>) {
        self.password = Some(password.into());
    }

    pub fn connect_properties(&self) -> &[Property] {
        &self.connect_properties
    }

    pub fn set_connect_properties(&mut self, props: Vec<Property>) {
        self.connect_properties = props;
    }

    pub fn id_width(&self) -> IdWidth {
        self.alloc.width()
    }

    pub fn in_flight(&self) -> &InFlightStore {
        &self.store
    }

    pub fn allocator(&self) -> &PacketIdAllocator {
        &self.alloc
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    /// Builds the CONNECT packet this session describes.
    pub(crate) fn to_connect(&self, protocol: Protocol) -> Connect {
        Connect {
            protocol,
            client_id: self.client_id.clone(),
            clean_start: self.clean_start,
            keep_alive: self.keep_alive_sec,
            will: self.will.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            properties: self.connect_properties.clone(),
        }
    }

    /// Adopts the durable state of a prior session for the same client id.
    /// Connection-scoped fields (will, credentials, keep-alive) keep the
    /// values of the new CONNECT.
    pub(crate) fn restore_from(&mut self, prior: Session) {
        self.store = prior.store;
        self.alloc = prior.alloc;
        self.qos2_received = prior.qos2_received;
        self.subscriptions = prior.subscriptions;
    }

    /// Drops all durable state; runs when a clean-start connection is
    /// accepted or the session is being destroyed.
    pub(crate) fn clear_state(&mut self) {
        self.store.clear();
        self.alloc.clear();
        self.qos2_received.clear();
        self.subscriptions.clear();
        self.pending_subscribe.clear();
        self.pending_unsubscribe.clear();
    }
}

/// Where a server hands sessions when their connection drops, and where it
/// looks them up again on reconnect.
pub trait SessionRegistry {
    /// Removes and returns the live session for `client_id`, if its expiry
    /// has not elapsed by `now_millis`.
    fn take(&mut self, client_id: &str, now_millis: u64) -> Option<Session>;

    /// Stores a detached session. Its expiry clock starts at `now_millis`.
    fn put(&mut self, session: Session, now_millis: u64);

    /// Discards any stored session for `client_id`.
    fn evict(&mut self, client_id: &str);
}

struct StoredSession {
    session: Session,
    expires_at_millis: Option<u64>,
}

/// Process-local registry, enough for a single-process broker or for tests.
#[derive(Default)]
pub struct MemorySessionRegistry {
    sessions: HashMap<String, StoredSession>,
}

impl MemorySessionRegistry {
    pub fn new() -> Self {
        MemorySessionRegistry::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.sessions.contains_key(client_id)
    }
}

impl SessionRegistry for MemorySessionRegistry {
    fn take(&mut self, client_id: &str, now_millis: u64) -> Option<Session> {
        let stored = self.sessions.remove(client_id)?;
        match stored.expires_at_millis {
            Some(deadline) if now_millis >= deadline => None,
            _ => Some(stored.session),
        }
    }

    fn put(&mut self, session: Session, now_millis: u64) {
        let expires_at_millis = match session.session_expiry_sec() {
            0 => {
                // Expires immediately; storing it would only leak.
                return;
            }
            NEVER_EXPIRE => None,
            secs => Some(now_millis + u64::from(secs) * 1000),
        };
        self.sessions.insert(
            session.client_id().to_owned(),
            StoredSession {
                session,
                expires_at_millis,
            },
        );
    }

    fn evict(&mut self, client_id: &str) {
        self.sessions.remove(client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AckKind;
    use bytes::BytesMut;

    #[test]
    fn registry_take_respects_expiry() {
        let mut registry = MemorySessionRegistry::new();
        let mut session = Session::new("cid");
        session.set_session_expiry_sec(10);
        registry.put(session, 1_000);

        assert!(registry.contains("cid"));
        // 9.999s later: still alive.
        let session = registry.take("cid", 10_999).unwrap();
        registry.put(session, 1_000);
        // 10s later: gone.
        assert!(registry.take("cid", 11_000).is_none());
        assert!(!registry.contains("cid"));
    }

    #[test]
    fn zero_expiry_is_never_stored() {
        let mut registry = MemorySessionRegistry::new();
        let mut session = Session::new("cid");
        session.set_session_expiry_sec(0);
        registry.put(session, 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn never_expire_survives_any_gap() {
        let mut registry = MemorySessionRegistry::new();
        registry.put(Session::new("cid"), 0);
        assert!(registry.take("cid", u64::MAX / 2).is_some());
    }

    #[test]
    fn restore_keeps_durable_state_only() {
        let mut prior = Session::new("cid");
        prior.store.insert(1, AckKind::PubAck, BytesMut::from(&[0x32][..]));
        prior.qos2_received.insert(7);
        prior
            .subscriptions
            .insert("a/b", SubscribeOptions::at_most_once());
        prior.set_keep_alive_sec(60);

        let mut fresh = Session::new("cid");
        fresh.set_keep_alive_sec(10);
        fresh.restore_from(prior);

        assert_eq!(fresh.keep_alive_sec(), 10);
        assert!(fresh.store.contains(1, AckKind::PubAck));
        assert!(fresh.qos2_received.contains(&7));
        assert!(fresh.subscriptions.contains("a/b"));
    }

    #[test]
    fn clear_state_empties_everything() {
        let mut session = Session::new("cid");
        session.store.insert(1, AckKind::SubAck, BytesMut::new());
        session.alloc.reserve(1);
        session.qos2_received.insert(2);
        session
            .subscriptions
            .insert("x", SubscribeOptions::at_most_once());
        session.clear_state();
        assert!(session.store.is_empty());
        assert_eq!(session.alloc.in_use(), 0);
        assert!(session.qos2_received.is_empty());
        assert!(session.subscriptions.is_empty());
    }
}
