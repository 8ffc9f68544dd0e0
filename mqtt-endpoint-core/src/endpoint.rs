//! Endpoint orchestrator.
//!
//! Binds one transport and one clock to one session, drives the QoS
//! handshake state machines on both sides, dispatches inbound packets to
//! registered handlers, and runs keep-alive.
//!
//! All request operations are synchronous: they encode the packet, update
//! the in-flight state, and append the bytes to an outbound queue. The
//! `run` loop is the only place that touches the transport, which gives two
//! guarantees for free: outbound bytes leave in exactly the order the
//! operations produced them, and every piece of endpoint state is mutated
//! from a single execution context.

use std::collections::{HashMap, VecDeque};

use bytes::{Bytes, BytesMut};
use futures_util::future::{select, Either};
use log::{debug, info, trace, warn};

use crate::error::{CodecError, EndpointError, ProtocolViolation, TimeoutKind};
use crate::frame::{Frame, FrameReader};
use crate::packet_id::IdWidth;
use crate::protocol::packets::{
    Auth, ConnAck, Connect, Disconnect, Packet, PubAck, PubComp, PubRec, PubRel, Publish,
    SubAck, Subscribe, SubscribeEntry, UnsubAck, Unsubscribe,
};
use crate::protocol::{
    Codec, ConnectReturnCode, PacketType, Property, Protocol, QoS, ReasonCode,
};
use crate::session::Session;
use crate::store::AckKind;
use crate::subscription::SubscribeOptions;
use crate::time::Clock;
use crate::transport::Transport;

/// Which side of the connection this endpoint plays.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum EndpointState {
    #[default]
    Detached,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Whether the engine emits PUBACK / PUBREC / PUBREL / PUBCOMP on its own,
/// or the application drives them through the manual operations.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum AckMode {
    #[default]
    Auto,
    Manual,
}

type Handler<T, C, A> = Box<dyn FnMut(&mut Endpoint<T, C>, A) -> bool + Send>;
type NullaryHandler<T, C> = Box<dyn FnMut(&mut Endpoint<T, C>) -> bool + Send>;

struct Handlers<T: Transport, C: Clock> {
    connect: Option<Handler<T, C, Connect>>,
    connack: Option<Handler<T, C, ConnAck>>,
    publish: Option<Handler<T, C, Publish>>,
    puback: Option<Handler<T, C, PubAck>>,
    pubrec: Option<Handler<T, C, PubRec>>,
    pubrel: Option<Handler<T, C, PubRel>>,
    pubcomp: Option<Handler<T, C, PubComp>>,
    subscribe: Option<Handler<T, C, Subscribe>>,
    suback: Option<Handler<T, C, SubAck>>,
    unsubscribe: Option<Handler<T, C, Unsubscribe>>,
    unsuback: Option<Handler<T, C, UnsubAck>>,
    pingreq: Option<NullaryHandler<T, C>>,
    pingresp: Option<NullaryHandler<T, C>>,
    disconnect: Option<Handler<T, C, Disconnect>>,
    auth: Option<Handler<T, C, Auth>>,
    close: Option<NullaryHandler<T, C>>,
    error: Option<Handler<T, C, EndpointError>>,
}

impl<T: Transport, C: Clock> Default for Handlers<T, C> {
    fn default() -> Self {
        Handlers {
            connect: None,
            connack: None,
            publish: None,
            puback: None,
            pubrec: None,
            pubrel: None,
            pubcomp: None,
            subscribe: None,
            suback: None,
            unsubscribe: None,
            unsuback: None,
            pingreq: None,
            pingresp: None,
            disconnect: None,
            auth: None,
            close: None,
            error: None,
        }
    }
}

/// Invokes a handler slot. The slot is taken for the duration of the call so
/// the handler itself gets `&mut Endpoint`; returning `false` detaches it.
macro_rules! fire {
    ($self:ident, $slot:ident) => {
        if let Some(mut handler) = $self.handlers.$slot.take() {
            if handler($self) && $self.handlers.$slot.is_none() {
                $self.handlers.$slot = Some(handler);
            }
        }
    };
    ($self:ident, $slot:ident, $arg:expr) => {
        if let Some(mut handler) = $self.handlers.$slot.take() {
            if handler($self, $arg) && $self.handlers.$slot.is_none() {
                $self.handlers.$slot = Some(handler);
            }
        }
    };
}

enum Wake {
    Frame(Result<Frame, EndpointError>),
    Timer,
}

/// One MQTT endpoint: a transport, a clock and a session, plus the dispatch
/// handlers.
pub struct Endpoint<T: Transport, C: Clock> {
    transport: T,
    clock: C,
    role: Role,
    protocol: Protocol,
    state: EndpointState,
    ack_mode: AckMode,
    session: Option<Session>,
    default_id_width: IdWidth,
    reader: FrameReader,
    handlers: Handlers<T, C>,
    outbound: VecDeque<Bytes>,

    /// Explicit ping interval; defaults to half the keep-alive.
    ping_interval_override_ms: Option<u64>,
    ping_every_ms: Option<u64>,
    ping_deadline: Option<u64>,
    idle_deadline: Option<u64>,
    disconnect_deadline: Option<u64>,

    /// Largest packet the peer is willing to accept (v5).
    peer_max_packet_size: Option<u32>,
    got_connect: bool,
    close_requested: bool,

    /// Subscribe / unsubscribe requests from the peer that the application
    /// has not acknowledged yet; the acknowledgement updates the table.
    pending_peer_subscribe: HashMap<u32, Vec<SubscribeEntry>>,
    pending_peer_unsubscribe: HashMap<u32, Vec<String>>,
}

impl<T: Transport, C: Clock> Endpoint<T, C> {
    fn new(transport: T, clock: C, role: Role, session: Option<Session>) -> Self {
        Endpoint {
            transport,
            clock,
            role,
            protocol: Protocol::V311,
            state: EndpointState::Detached,
            ack_mode: AckMode::Auto,
            session,
            default_id_width: IdWidth::Sixteen,
            reader: FrameReader::new(),
            handlers: Handlers::default(),
            outbound: VecDeque::new(),
            ping_interval_override_ms: None,
            ping_every_ms: None,
            ping_deadline: None,
            idle_deadline: None,
            disconnect_deadline: None,
            peer_max_packet_size: None,
            got_connect: false,
            close_requested: false,
            pending_peer_subscribe: HashMap::new(),
            pending_peer_unsubscribe: HashMap::new(),
        }
    }

    /// A client endpoint. The session carries the client id, clean-start
    /// flag, will and credentials; configure it before calling `connect`.
    pub fn client(transport: T, clock: C, session: Session) -> Self {
        Endpoint::new(transport, clock, Role::Client, Some(session))
    }

    /// A server-side endpoint for one accepted connection. The session is
    /// created from the peer's CONNECT.
    pub fn server(transport: T, clock: C) -> Self {
        Endpoint::new(transport, clock, Role::Server, None)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    pub fn protocol_version(&self) -> Protocol {
        self.protocol
    }

    /// Selects MQTT 3.1.1 or 5.0 before connecting. A server endpoint also
    /// adapts to whatever level the peer's CONNECT announces.
    pub fn set_protocol_version(&mut self, protocol: Protocol) {
        self.protocol = protocol;
    }

    pub fn set_ack_mode(&mut self, mode: AckMode) {
        self.ack_mode = mode;
    }

    /// Packet-id width used when a server endpoint creates the session from
    /// an inbound CONNECT. Client endpoints take the width from their
    /// session.
    pub fn set_id_width(&mut self, width: IdWidth) {
        self.default_id_width = width;
    }

    /// Caps what this endpoint is willing to receive. v5 peers learn the
    /// limit from the MaximumPacketSize property the application puts in
    /// CONNECT / CONNACK; the frame reader enforces it either way.
    pub fn set_max_inbound_packet_size(&mut self, limit: u32) {
        self.reader.set_max_packet_size(limit);
    }

    /// Overrides the ping cadence. Without an override pings go out every
    /// `keep_alive / 2` seconds.
    pub fn set_ping_interval_ms(&mut self, millis: u64) {
        self.ping_interval_override_ms = Some(millis);
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    /// Moves the session out, for hand-off to a session registry or for
    /// reconnecting on a fresh transport.
    pub fn take_session(&mut self) -> Option<Session> {
        self.session.take()
    }

    /// Replaces the durable state of the current session with a prior
    /// session's state (server side, non-clean reconnect).
    pub fn restore_session(&mut self, prior: Session) -> Result<(), EndpointError> {
        let session = self.session.as_mut().ok_or(EndpointError::NotConnected)?;
        session.restore_from(prior);
        Ok(())
    }

    fn codec(&self) -> Codec {
        Codec {
            version: self.protocol,
            id_width: self
                .session
                .as_ref()
                .map(|s| s.id_width())
                .unwrap_or(self.default_id_width),
        }
    }

    // ---- handler registration -------------------------------------------

    pub fn set_connect_handler(
        &mut self,
        h: impl FnMut(&mut Self, Connect) -> bool + Send + 'static,
    ) {
        self.handlers.connect = Some(Box::new(h));
    }

    pub fn set_connack_handler(
        &mut self,
        h: impl FnMut(&mut Self, ConnAck) -> bool + Send + 'static,
    ) {
        self.handlers.connack = Some(Box::new(h));
    }

    pub fn set_publish_handler(
        &mut self,
        h: impl FnMut(&mut Self, Publish) -> bool + Send + 'static,
    ) {
        self.handlers.publish = Some(Box::new(h));
    }

    pub fn set_puback_handler(
        &mut self,
        h: impl FnMut(&mut Self, PubAck) -> bool + Send + 'static,
    ) {
        self.handlers.puback = Some(Box::new(h));
    }

    pub fn set_pubrec_handler(
        &mut self,
        h: impl FnMut(&mut Self, PubRec) -> bool + Send + 'static,
    ) {
        self.handlers.pubrec = Some(Box::new(h));
    }

    pub fn set_pubrel_handler(
        &mut self,
        h: impl FnMut(&mut Self, PubRel) -> bool + Send + 'static,
    ) {
        self.handlers.pubrel = Some(Box::new(h));
    }

    pub fn set_pubcomp_handler(
        &mut self,
        h: impl FnMut(&mut Self, PubComp) -> bool + Send + 'static,
    ) {
        self.handlers.pubcomp = Some(Box::new(h));
    }

    pub fn set_subscribe_handler(
        &mut self,
        h: impl FnMut(&mut Self, Subscribe) -> bool + Send + 'static,
    ) {
        self.handlers.subscribe = Some(Box::new(h));
    }

    pub fn set_suback_handler(
        &mut self,
        h: impl FnMut(&mut Self, SubAck) -> bool + Send + 'static,
    ) {
        self.handlers.suback = Some(Box::new(h));
    }

    pub fn set_unsubscribe_handler(
        &mut self,
        h: impl FnMut(&mut Self, Unsubscribe) -> bool + Send + 'static,
    ) {
        self.handlers.unsubscribe = Some(Box::new(h));
    }

    pub fn set_unsuback_handler(
        &mut self,
        h: impl FnMut(&mut Self, UnsubAck) -> bool + Send + 'static,
    ) {
        self.handlers.unsuback = Some(Box::new(h));
    }

    pub fn set_pingreq_handler(&mut self, h: impl FnMut(&mut Self) -> bool + Send + 'static) {
        self.handlers.pingreq = Some(Box::new(h));
    }

    pub fn set_pingresp_handler(&mut self, h: impl FnMut(&mut Self) -> bool + Send + 'static) {
        self.handlers.pingresp = Some(Box::new(h));
    }

    pub fn set_disconnect_handler(
        &mut self,
        h: impl FnMut(&mut Self, Disconnect) -> bool + Send + 'static,
    ) {
        self.handlers.disconnect = Some(Box::new(h));
    }

    pub fn set_auth_handler(&mut self, h: impl FnMut(&mut Self, Auth) -> bool + Send + 'static) {
        self.handlers.auth = Some(Box::new(h));
    }

    pub fn set_close_handler(&mut self, h: impl FnMut(&mut Self) -> bool + Send + 'static) {
        self.handlers.close = Some(Box::new(h));
    }

    pub fn set_error_handler(
        &mut self,
        h: impl FnMut(&mut Self, EndpointError) -> bool + Send + 'static,
    ) {
        self.handlers.error = Some(Box::new(h));
    }

    // ---- request operations ---------------------------------------------

    /// Sends CONNECT built from the session (client side).
    pub fn connect(&mut self) -> Result<(), EndpointError> {
        if self.role != Role::Client {
            return Err(EndpointError::Protocol(ProtocolViolation::ConnectExpected));
        }
        if matches!(
            self.state,
            EndpointState::Connecting | EndpointState::Connected
        ) {
            return Err(EndpointError::Protocol(ProtocolViolation::DuplicateConnect));
        }
        let session = self.session.as_ref().ok_or(EndpointError::NotConnected)?;
        // Announce our own receive limit before the server can talk back.
        if let Some(limit) = session.connect_properties().iter().find_map(|p| match p {
            Property::MaximumPacketSize(v) => Some(*v),
            _ => None,
        }) {
            self.reader.set_max_packet_size(limit);
        }
        let connect = Packet::Connect(session.to_connect(self.protocol));
        let bytes = connect.encode(self.codec())?;
        self.outbound.push_back(bytes.freeze());
        self.state = EndpointState::Connecting;
        info!(
            "connecting client_id={:?} clean={}",
            self.session.as_ref().map(|s| s.client_id().to_owned()),
            self.session
                .as_ref()
                .map(|s| s.clean_session())
                .unwrap_or(false)
        );
        Ok(())
    }

    /// Starts serving the connection (server side): the next inbound packet
    /// must be CONNECT.
    pub fn start(&mut self) -> Result<(), EndpointError> {
        if self.role != Role::Server || self.state != EndpointState::Detached {
            return Err(EndpointError::Protocol(ProtocolViolation::DuplicateConnect));
        }
        self.state = EndpointState::Connecting;
        Ok(())
    }

    /// Publishes with an automatically allocated packet id. Returns the id,
    /// or 0 for QoS 0.
    pub fn publish(
        &mut self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> Result<u32, EndpointError> {
        self.publish_with_properties(topic, payload, qos, retain, Vec::new())
    }

    pub fn publish_with_properties(
        &mut self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
        properties: Vec<Property>,
    ) -> Result<u32, EndpointError> {
        self.ensure_active()?;
        let codec = self.codec();
        let mut publish = Publish::new(topic, payload, qos);
        publish.retain = retain;
        publish.properties = properties;

        if qos == QoS::AtMostOnce {
            let bytes = publish.encode(codec)?;
            self.queue_bytes(bytes)?;
            return Ok(0);
        }

        let id = {
            let session = self.session.as_mut().ok_or(EndpointError::NotConnected)?;
            session
                .alloc
                .acquire()
                .ok_or(EndpointError::PacketIdsExhausted)?
        };
        publish.packet_id = Some(id);
        match self.queue_publish_in_flight(publish, codec) {
            Ok(()) => Ok(id),
            Err(e) => {
                if let Some(session) = self.session.as_mut() {
                    session.alloc.release(id);
                }
                Err(e)
            }
        }
    }

    /// QoS 0 publish, fire and forget.
    pub fn publish_at_most_once(
        &mut self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        retain: bool,
    ) -> Result<(), EndpointError> {
        self.publish(topic, payload, QoS::AtMostOnce, retain)
            .map(|_| ())
    }

    /// QoS 1 publish; returns the allocated packet id.
    pub fn publish_at_least_once(
        &mut self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        retain: bool,
    ) -> Result<u32, EndpointError> {
        self.publish(topic, payload, QoS::AtLeastOnce, retain)
    }

    /// QoS 2 publish; returns the allocated packet id.
    pub fn publish_exactly_once(
        &mut self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        retain: bool,
    ) -> Result<u32, EndpointError> {
        self.publish(topic, payload, QoS::ExactlyOnce, retain)
    }

    /// Publishes with a caller-chosen packet id. Fails with `PacketIdInUse`
    /// if the id belongs to a live handshake.
    pub fn acquired_publish(
        &mut self,
        packet_id: u32,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), EndpointError> {
        self.ensure_active()?;
        let codec = self.codec();
        let mut publish = Publish::new(topic, payload, qos);
        publish.retain = retain;

        if qos == QoS::AtMostOnce {
            let bytes = publish.encode(codec)?;
            return self.queue_bytes(bytes);
        }

        self.reserve_id(packet_id)?;
        publish.packet_id = Some(packet_id);
        match self.queue_publish_in_flight(publish, codec) {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Some(session) = self.session.as_mut() {
                    session.alloc.release(packet_id);
                }
                Err(e)
            }
        }
    }

    /// Subscribes to the given filters; returns the packet id.
    pub fn subscribe(
        &mut self,
        entries: Vec<(String, SubscribeOptions)>,
    ) -> Result<u32, EndpointError> {
        self.subscribe_with_properties(entries, Vec::new())
    }

    pub fn subscribe_with_properties(
        &mut self,
        entries: Vec<(String, SubscribeOptions)>,
        properties: Vec<Property>,
    ) -> Result<u32, EndpointError> {
        self.ensure_active()?;
        let id = {
            let session = self.session.as_mut().ok_or(EndpointError::NotConnected)?;
            session
                .alloc
                .acquire()
                .ok_or(EndpointError::PacketIdsExhausted)?
        };
        match self.queue_subscribe(id, entries, properties) {
            Ok(()) => Ok(id),
            Err(e) => {
                if let Some(session) = self.session.as_mut() {
                    session.alloc.release(id);
                }
                Err(e)
            }
        }
    }

    pub fn acquired_subscribe(
        &mut self,
        packet_id: u32,
        entries: Vec<(String, SubscribeOptions)>,
    ) -> Result<(), EndpointError> {
        self.ensure_active()?;
        self.reserve_id(packet_id)?;
        match self.queue_subscribe(packet_id, entries, Vec::new()) {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Some(session) = self.session.as_mut() {
                    session.alloc.release(packet_id);
                }
                Err(e)
            }
        }
    }

    /// Unsubscribes from the given filters; returns the packet id.
    pub fn unsubscribe(&mut self, filters: Vec<String>) -> Result<u32, EndpointError> {
        self.ensure_active()?;
        let id = {
            let session = self.session.as_mut().ok_or(EndpointError::NotConnected)?;
            session
                .alloc
                .acquire()
                .ok_or(EndpointError::PacketIdsExhausted)?
        };
        match self.queue_unsubscribe(id, filters) {
            Ok(()) => Ok(id),
            Err(e) => {
                if let Some(session) = self.session.as_mut() {
                    session.alloc.release(id);
                }
                Err(e)
            }
        }
    }

    pub fn acquired_unsubscribe(
        &mut self,
        packet_id: u32,
        filters: Vec<String>,
    ) -> Result<(), EndpointError> {
        self.ensure_active()?;
        self.reserve_id(packet_id)?;
        match self.queue_unsubscribe(packet_id, filters) {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Some(session) = self.session.as_mut() {
                    session.alloc.release(packet_id);
                }
                Err(e)
            }
        }
    }

    /// Sends DISCONNECT and waits for the peer to close the stream. With a
    /// timeout, the transport is closed forcibly once the grace period
    /// elapses.
    pub fn disconnect(&mut self, timeout_ms: Option<u64>) -> Result<(), EndpointError> {
        self.disconnect_with(Disconnect::normal(), timeout_ms)
    }

    pub fn disconnect_with(
        &mut self,
        packet: Disconnect,
        timeout_ms: Option<u64>,
    ) -> Result<(), EndpointError> {
        if !matches!(
            self.state,
            EndpointState::Connecting | EndpointState::Connected
        ) {
            return Err(EndpointError::NotConnected);
        }
        self.queue_packet(&Packet::Disconnect(packet))?;
        self.state = EndpointState::Disconnecting;
        self.ping_deadline = None;
        self.ping_every_ms = None;
        if let Some(ms) = timeout_ms {
            self.disconnect_deadline = Some(self.clock.now_millis() + ms);
        }
        info!("disconnecting (graceful)");
        Ok(())
    }

    /// Closes the transport without a DISCONNECT. The broker will publish
    /// the will.
    pub fn force_disconnect(&mut self) {
        self.close_requested = true;
        self.cancel_timers();
    }

    /// Server side: answers the pending CONNECT. Accepting with
    /// `session_present` replays the restored session's in-flight store.
    pub fn connack(&mut self, session_present: bool, code: u8) -> Result<(), EndpointError> {
        self.connack_with_properties(session_present, code, Vec::new())
    }

    pub fn connack_with_properties(
        &mut self,
        session_present: bool,
        code: u8,
        properties: Vec<Property>,
    ) -> Result<(), EndpointError> {
        if self.role != Role::Server || !self.got_connect {
            return Err(EndpointError::NotConnected);
        }
        let packet = ConnAck {
            session_present,
            code,
            properties,
        };
        self.queue_packet(&Packet::ConnAck(packet))?;
        if code == 0 {
            self.state = EndpointState::Connected;
            info!(
                "accepted client_id={:?} session_present={}",
                self.session.as_ref().map(|s| s.client_id().to_owned()),
                session_present
            );
            if session_present {
                self.replay_in_flight();
            }
        } else {
            debug!("refusing connection with code {:#04x}", code);
            self.close_requested = true;
        }
        Ok(())
    }

    /// Server side: acknowledges a SUBSCRIBE. Grants (codes below 0x80) are
    /// recorded in the subscription table with the granted QoS.
    pub fn suback(&mut self, packet_id: u32, codes: Vec<u8>) -> Result<(), EndpointError> {
        let entries = self.pending_peer_subscribe.remove(&packet_id);
        if let (Some(entries), Some(session)) = (entries, self.session.as_mut()) {
            for (entry, code) in entries.iter().zip(codes.iter()) {
                if *code < 0x80 {
                    let mut options = entry.options;
                    if let Ok(qos) = QoS::try_from(*code & 0b11) {
                        options.qos = qos;
                    }
                    session.subscriptions.insert(entry.filter.clone(), options);
                }
            }
        }
        self.queue_packet(&Packet::SubAck(SubAck::new(packet_id, codes)))
    }

    /// Server side: acknowledges an UNSUBSCRIBE. For v5, pass one reason
    /// code per filter; v3.1.1 acknowledges unconditionally.
    pub fn unsuback(&mut self, packet_id: u32) -> Result<(), EndpointError> {
        self.unsuback_with_codes(packet_id, Vec::new())
    }

    pub fn unsuback_with_codes(
        &mut self,
        packet_id: u32,
        codes: Vec<u8>,
    ) -> Result<(), EndpointError> {
        let filters = self.pending_peer_unsubscribe.remove(&packet_id);
        if let (Some(filters), Some(session)) = (filters, self.session.as_mut()) {
            if codes.is_empty() {
                for filter in &filters {
                    session.subscriptions.remove(filter);
                }
            } else {
                for (filter, code) in filters.iter().zip(codes.iter()) {
                    if *code < 0x80 {
                        session.subscriptions.remove(filter);
                    }
                }
            }
        }
        let mut packet = UnsubAck::new(packet_id);
        packet.codes = codes;
        self.queue_packet(&Packet::UnsubAck(packet))
    }

    // ---- manual acknowledgement operations --------------------------------

    /// Acknowledges an inbound QoS 1 publish.
    pub fn puback(&mut self, packet_id: u32) -> Result<(), EndpointError> {
        self.queue_packet(&Packet::PubAck(PubAck::new(packet_id)))
    }

    /// First acknowledgement of an inbound QoS 2 publish.
    pub fn pubrec(&mut self, packet_id: u32) -> Result<(), EndpointError> {
        self.queue_packet(&Packet::PubRec(PubRec::new(packet_id)))
    }

    /// Releases an outbound QoS 2 publish after its PUBREC. The PUBREL
    /// image joins the in-flight store until PUBCOMP arrives.
    pub fn pubrel(&mut self, packet_id: u32) -> Result<(), EndpointError> {
        let codec = self.codec();
        let image = PubRel::new(packet_id).encode(codec)?;
        self.queue_bytes(image.clone())?;
        if let Some(session) = self.session.as_mut() {
            session.store.insert(packet_id, AckKind::PubComp, image);
        }
        Ok(())
    }

    /// Completes an inbound QoS 2 exchange after its PUBREL.
    pub fn pubcomp(&mut self, packet_id: u32) -> Result<(), EndpointError> {
        if let Some(session) = self.session.as_mut() {
            session.qos2_received.remove(&packet_id);
        }
        self.queue_packet(&Packet::PubComp(PubComp::new(packet_id)))
    }

    // ---- outbound plumbing ------------------------------------------------

    fn ensure_active(&self) -> Result<(), EndpointError> {
        match self.state {
            EndpointState::Connecting
            | EndpointState::Connected => Ok(()),
            _ => Err(EndpointError::NotConnected),
        }
    }

    fn reserve_id(&mut self, packet_id: u32) -> Result<(), EndpointError> {
        let session = self.session.as_mut().ok_or(EndpointError::NotConnected)?;
        if !session.alloc.reserve(packet_id) {
            return Err(EndpointError::PacketIdInUse { packet_id });
        }
        Ok(())
    }

    fn queue_bytes(&mut self, bytes: BytesMut) -> Result<(), EndpointError> {
        if let Some(limit) = self.peer_max_packet_size {
            if bytes.len() as u32 > limit {
                return Err(EndpointError::PacketTooLarge {
                    size: bytes.len() as u32,
                    limit,
                });
            }
        }
        self.outbound.push_back(bytes.freeze());
        Ok(())
    }

    fn queue_packet(&mut self, packet: &Packet) -> Result<(), EndpointError> {
        let bytes = packet.encode(self.codec())?;
        trace!("send {:?}", packet.packet_type());
        self.queue_bytes(bytes)
    }

    /// Writes the first transmission and caches the same image (DUP still
    /// clear) in the in-flight store.
    fn queue_publish_in_flight(
        &mut self,
        publish: Publish,
        codec: Codec,
    ) -> Result<(), EndpointError> {
        let id = publish.packet_id.ok_or(CodecError::MissingPacketId)?;
        let kind = match publish.qos {
            QoS::AtLeastOnce => AckKind::PubAck,
            QoS::ExactlyOnce => AckKind::PubRec,
            QoS::AtMostOnce => return Err(CodecError::MissingPacketId.into()),
        };
        let image = publish.encode(codec)?;
        self.queue_bytes(image.clone())?;
        if let Some(session) = self.session.as_mut() {
            session.store.insert(id, kind, image);
        }
        Ok(())
    }

    fn queue_subscribe(
        &mut self,
        packet_id: u32,
        entries: Vec<(String, SubscribeOptions)>,
        properties: Vec<Property>,
    ) -> Result<(), EndpointError> {
        let packet = Subscribe {
            packet_id,
            entries: entries
                .iter()
                .map(|(filter, options)| SubscribeEntry {
                    filter: filter.clone(),
                    options: *options,
                })
                .collect(),
            properties,
        };
        self.queue_packet(&Packet::Subscribe(packet))?;
        if let Some(session) = self.session.as_mut() {
            // Tracked for id uniqueness and SUBACK pairing; not retransmitted.
            session.store.insert(packet_id, AckKind::SubAck, BytesMut::new());
            session.pending_subscribe.insert(packet_id, entries);
        }
        Ok(())
    }

    fn queue_unsubscribe(
        &mut self,
        packet_id: u32,
        filters: Vec<String>,
    ) -> Result<(), EndpointError> {
        let packet = Unsubscribe {
            packet_id,
            filters: filters.clone(),
            properties: Vec::new(),
        };
        self.queue_packet(&Packet::Unsubscribe(packet))?;
        if let Some(session) = self.session.as_mut() {
            session
                .store
                .insert(packet_id, AckKind::UnsubAck, BytesMut::new());
            session.pending_unsubscribe.insert(packet_id, filters);
        }
        Ok(())
    }

    /// Walks the in-flight store in insertion order and queues every entry
    /// for retransmission. PUBLISH images get DUP set first; PUBREL images
    /// go out as they are. Entries with nothing to retransmit (SUBSCRIBE /
    /// UNSUBSCRIBE expectations) are dropped, as are images the peer's new
    /// maximum packet size can no longer carry.
    fn replay_in_flight(&mut self) {
        let limit = self.peer_max_packet_size;
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let mut publish_ids = Vec::new();
        let mut dropped = Vec::new();
        let mut oversize = Vec::new();
        session.store.for_each_in_order(|entry| {
            if entry.bytes().is_empty() {
                dropped.push((entry.seq(), entry.packet_id()));
                return;
            }
            if let Some(limit) = limit {
                if entry.bytes().len() as u32 > limit {
                    dropped.push((entry.seq(), entry.packet_id()));
                    oversize.push((entry.bytes().len() as u32, limit));
                    return;
                }
            }
            if matches!(entry.expected(), AckKind::PubAck | AckKind::PubRec) {
                publish_ids.push(entry.packet_id());
            }
        });

        for id in publish_ids {
            session.store.mark_dup_for_publish(id);
        }
        for (seq, id) in dropped {
            session.store.remove_seq(seq);
            if !session.store.contains_id(id) {
                session.alloc.release(id);
            }
        }
        session.pending_subscribe.clear();
        session.pending_unsubscribe.clear();

        let mut images = Vec::new();
        session.store.for_each_in_order(|entry| {
            images.push(Bytes::copy_from_slice(entry.bytes()));
        });
        debug!("replaying {} in-flight packets", images.len());
        self.outbound.extend(images);

        for (size, limit) in oversize {
            warn!("dropping in-flight packet of {} bytes over peer limit {}", size, limit);
            let err = EndpointError::PacketTooLarge { size, limit };
            fire!(self, error, err);
        }
    }

    fn cancel_timers(&mut self) {
        self.ping_deadline = None;
        self.ping_every_ms = None;
        self.idle_deadline = None;
        self.disconnect_deadline = None;
    }

    fn arm_keep_alive(&mut self) {
        let keep_alive = self
            .session
            .as_ref()
            .map(|s| s.keep_alive_sec())
            .unwrap_or(0);
        match self.role {
            Role::Client => {
                let interval = match self.ping_interval_override_ms {
                    Some(ms) if ms > 0 => Some(ms),
                    Some(_) => None,
                    None if keep_alive > 0 => Some(u64::from(keep_alive) * 1000 / 2),
                    None => None,
                };
                self.ping_every_ms = interval;
                self.ping_deadline = interval.map(|ms| self.clock.now_millis() + ms);
            }
            Role::Server => {
                if keep_alive > 0 {
                    self.idle_deadline =
                        Some(self.clock.now_millis() + u64::from(keep_alive) * 1500);
                }
            }
        }
    }

    fn touch_idle_deadline(&mut self) {
        if self.idle_deadline.is_some() {
            let keep_alive = self
                .session
                .as_ref()
                .map(|s| s.keep_alive_sec())
                .unwrap_or(0);
            self.idle_deadline = Some(self.clock.now_millis() + u64::from(keep_alive) * 1500);
        }
    }

    fn next_deadline(&self) -> Option<u64> {
        [self.ping_deadline, self.idle_deadline, self.disconnect_deadline]
            .into_iter()
            .flatten()
            .min()
    }

    // ---- inbound dispatch -------------------------------------------------

    fn check_allowed(&self, packet_type: PacketType) -> Result<(), ProtocolViolation> {
        match self.role {
            Role::Client => match packet_type {
                PacketType::Connect
                | PacketType::Subscribe
                | PacketType::Unsubscribe
                | PacketType::PingReq => {
                    Err(ProtocolViolation::UnexpectedPacket { packet_type })
                }
                PacketType::ConnAck | PacketType::Auth | PacketType::Disconnect => Ok(()),
                _ => {
                    if matches!(
                        self.state,
                        EndpointState::Connected | EndpointState::Disconnecting
                    ) {
                        Ok(())
                    } else {
                        Err(ProtocolViolation::UnexpectedPacket { packet_type })
                    }
                }
            },
            Role::Server => {
                if !self.got_connect && packet_type != PacketType::Connect {
                    return Err(ProtocolViolation::ConnectExpected);
                }
                match packet_type {
                    PacketType::ConnAck
                    | PacketType::SubAck
                    | PacketType::UnsubAck
                    | PacketType::PingResp => {
                        Err(ProtocolViolation::UnexpectedPacket { packet_type })
                    }
                    PacketType::Connect | PacketType::Auth | PacketType::Disconnect => Ok(()),
                    _ => {
                        if matches!(
                            self.state,
                            EndpointState::Connected | EndpointState::Disconnecting
                        ) {
                            Ok(())
                        } else {
                            Err(ProtocolViolation::UnexpectedPacket { packet_type })
                        }
                    }
                }
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<(), EndpointError> {
        let packet = Packet::decode(frame.header, frame.body, self.codec())?;
        trace!("recv {:?}", packet.packet_type());
        self.check_allowed(packet.packet_type())?;
        match packet {
            Packet::Connect(p) => self.handle_connect(p),
            Packet::ConnAck(p) => self.handle_connack(p),
            Packet::Publish(p) => self.handle_publish(p),
            Packet::PubAck(p) => self.handle_puback(p),
            Packet::PubRec(p) => self.handle_pubrec(p),
            Packet::PubRel(p) => self.handle_pubrel(p),
            Packet::PubComp(p) => self.handle_pubcomp(p),
            Packet::Subscribe(p) => self.handle_subscribe(p),
            Packet::SubAck(p) => self.handle_suback(p),
            Packet::Unsubscribe(p) => self.handle_unsubscribe(p),
            Packet::UnsubAck(p) => self.handle_unsuback(p),
            Packet::PingReq => self.handle_pingreq(),
            Packet::PingResp => self.handle_pingresp(),
            Packet::Disconnect(p) => self.handle_disconnect(p),
            Packet::Auth(p) => self.handle_auth(p),
        }
    }

    fn handle_connect(&mut self, connect: Connect) -> Result<(), EndpointError> {
        if self.got_connect {
            return Err(ProtocolViolation::DuplicateConnect.into());
        }
        self.got_connect = true;
        self.protocol = connect.protocol;

        if connect.protocol == Protocol::V311
            && connect.client_id.is_empty()
            && !connect.clean_start
        {
            // A nameless client cannot have a resumable session.
            self.queue_packet(&Packet::ConnAck(ConnAck {
                session_present: false,
                code: ConnectReturnCode::IdentifierRejected as u8,
                properties: Vec::new(),
            }))?;
            return Err(EndpointError::IdentifierRejected);
        }

        if connect.protocol == Protocol::V5 {
            self.peer_max_packet_size = connect.properties.iter().find_map(|p| match p {
                Property::MaximumPacketSize(v) => Some(*v),
                _ => None,
            });
        }

        self.session = Some(Session::from_connect(&connect, self.default_id_width));
        self.arm_keep_alive();
        fire!(self, connect, connect);
        Ok(())
    }

    fn handle_connack(&mut self, connack: ConnAck) -> Result<(), EndpointError> {
        if self.state != EndpointState::Connecting {
            return Err(ProtocolViolation::UnexpectedPacket {
                packet_type: PacketType::ConnAck,
            }
            .into());
        }

        if self.protocol == Protocol::V5 {
            self.apply_connack_properties(&connack.properties);
        }

        if connack.is_accepted() {
            self.state = EndpointState::Connected;
            info!(
                "connected session_present={} code={:#04x}",
                connack.session_present, connack.code
            );
            let clean = self
                .session
                .as_ref()
                .map(|s| s.clean_session())
                .unwrap_or(true);
            if clean {
                if let Some(session) = self.session.as_mut() {
                    session.clear_state();
                }
            } else {
                self.replay_in_flight();
            }
            self.arm_keep_alive();
            fire!(self, connack, connack);
            Ok(())
        } else {
            let code = connack.code;
            fire!(self, connack, connack);
            let err = if code == ConnectReturnCode::IdentifierRejected as u8
                || code == ReasonCode::CLIENT_IDENTIFIER_NOT_VALID.0
            {
                EndpointError::IdentifierRejected
            } else {
                EndpointError::ConnectionRefused { code }
            };
            Err(err)
        }
    }

    fn apply_connack_properties(&mut self, properties: &[Property]) {
        for property in properties {
            match property {
                Property::ServerKeepAlive(secs) => {
                    if let Some(session) = self.session.as_mut() {
                        session.set_keep_alive_sec(*secs);
                    }
                }
                Property::AssignedClientIdentifier(id) => {
                    if let Some(session) = self.session.as_mut() {
                        session.set_client_id(id.clone());
                    }
                }
                Property::MaximumPacketSize(limit) => {
                    self.peer_max_packet_size = Some(*limit);
                }
                _ => {}
            }
        }
    }

    fn handle_publish(&mut self, publish: Publish) -> Result<(), EndpointError> {
        match publish.qos {
            QoS::AtMostOnce => {
                fire!(self, publish, publish);
            }
            QoS::AtLeastOnce => {
                let id = publish.packet_id.ok_or(CodecError::MissingPacketId)?;
                if self.ack_mode == AckMode::Auto {
                    self.puback(id)?;
                }
                // At-least-once: the handler may legitimately see the same
                // message again; nothing gates redelivery here.
                fire!(self, publish, publish);
            }
            QoS::ExactlyOnce => {
                let id = publish.packet_id.ok_or(CodecError::MissingPacketId)?;
                let session = self.session.as_mut().ok_or(EndpointError::NotConnected)?;
                let first_delivery = session.qos2_received.insert(id);
                if first_delivery {
                    fire!(self, publish, publish);
                } else {
                    trace!("suppressing duplicate QoS 2 publish id={}", id);
                }
                if self.ack_mode == AckMode::Auto {
                    self.pubrec(id)?;
                }
            }
        }
        Ok(())
    }

    fn handle_puback(&mut self, puback: PubAck) -> Result<(), EndpointError> {
        let id = puback.packet_id;
        if let Some(session) = self.session.as_mut() {
            if session.store.remove_matching(id, AckKind::PubAck).is_some() {
                session.alloc.release(id);
            } else {
                warn!("PUBACK for unknown packet id {}", id);
            }
        }
        fire!(self, puback, puback);
        Ok(())
    }

    fn handle_pubrec(&mut self, pubrec: PubRec) -> Result<(), EndpointError> {
        let id = pubrec.packet_id;
        if let Some(session) = self.session.as_mut() {
            if session.store.remove_matching(id, AckKind::PubRec).is_none() {
                warn!("PUBREC for unknown packet id {}", id);
            }
        }
        if self.ack_mode == AckMode::Auto {
            self.pubrel(id)?;
        }
        fire!(self, pubrec, pubrec);
        Ok(())
    }

    fn handle_pubrel(&mut self, pubrel: PubRel) -> Result<(), EndpointError> {
        let id = pubrel.packet_id;
        if self.ack_mode == AckMode::Auto {
            self.pubcomp(id)?;
        }
        fire!(self, pubrel, pubrel);
        Ok(())
    }

    fn handle_pubcomp(&mut self, pubcomp: PubComp) -> Result<(), EndpointError> {
        let id = pubcomp.packet_id;
        if let Some(session) = self.session.as_mut() {
            if session.store.remove_matching(id, AckKind::PubComp).is_some() {
                session.alloc.release(id);
            } else {
                warn!("PUBCOMP for unknown packet id {}", id);
            }
        }
        fire!(self, pubcomp, pubcomp);
        Ok(())
    }

    fn handle_subscribe(&mut self, subscribe: Subscribe) -> Result<(), EndpointError> {
        self.pending_peer_subscribe
            .insert(subscribe.packet_id, subscribe.entries.clone());
        fire!(self, subscribe, subscribe);
        Ok(())
    }

    fn handle_suback(&mut self, suback: SubAck) -> Result<(), EndpointError> {
        let id = suback.packet_id;
        if let Some(session) = self.session.as_mut() {
            if session.store.remove_matching(id, AckKind::SubAck).is_some() {
                session.alloc.release(id);
            }
            if let Some(entries) = session.pending_subscribe.remove(&id) {
                for ((filter, options), code) in entries.into_iter().zip(suback.codes.iter()) {
                    if *code < 0x80 {
                        let mut granted = options;
                        if let Ok(qos) = QoS::try_from(*code & 0b11) {
                            granted.qos = qos;
                        }
                        session.subscriptions.insert(filter, granted);
                    }
                }
            }
        }
        fire!(self, suback, suback);
        Ok(())
    }

    fn handle_unsubscribe(&mut self, unsubscribe: Unsubscribe) -> Result<(), EndpointError> {
        self.pending_peer_unsubscribe
            .insert(unsubscribe.packet_id, unsubscribe.filters.clone());
        fire!(self, unsubscribe, unsubscribe);
        Ok(())
    }

    fn handle_unsuback(&mut self, unsuback: UnsubAck) -> Result<(), EndpointError> {
        let id = unsuback.packet_id;
        if let Some(session) = self.session.as_mut() {
            if session
                .store
                .remove_matching(id, AckKind::UnsubAck)
                .is_some()
            {
                session.alloc.release(id);
            }
            if let Some(filters) = session.pending_unsubscribe.remove(&id) {
                if unsuback.codes.is_empty() {
                    for filter in &filters {
                        session.subscriptions.remove(filter);
                    }
                } else {
                    for (filter, code) in filters.iter().zip(unsuback.codes.iter()) {
                        if *code < 0x80 {
                            session.subscriptions.remove(filter);
                        }
                    }
                }
            }
        }
        fire!(self, unsuback, unsuback);
        Ok(())
    }

    fn handle_pingreq(&mut self) -> Result<(), EndpointError> {
        self.queue_packet(&Packet::PingResp)?;
        fire!(self, pingreq);
        Ok(())
    }

    fn handle_pingresp(&mut self) -> Result<(), EndpointError> {
        fire!(self, pingresp);
        Ok(())
    }

    fn handle_disconnect(&mut self, disconnect: Disconnect) -> Result<(), EndpointError> {
        info!("peer disconnected gracefully: {:#04x}", disconnect.reason.0);
        if self.role == Role::Server {
            // A graceful disconnect suppresses the will, unless the v5 peer
            // asked for it explicitly.
            let keep_will = self.protocol == Protocol::V5
                && disconnect.reason == ReasonCode::DISCONNECT_WITH_WILL;
            if !keep_will {
                if let Some(session) = self.session.as_mut() {
                    session.clear_will();
                }
            }
        }
        self.state = EndpointState::Disconnected;
        self.close_requested = true;
        self.cancel_timers();
        fire!(self, disconnect, disconnect);
        Ok(())
    }

    fn handle_auth(&mut self, auth: Auth) -> Result<(), EndpointError> {
        fire!(self, auth, auth);
        Ok(())
    }

    // ---- the event loop ---------------------------------------------------

    /// Drives the connection: flushes queued packets, reads frames,
    /// dispatches handlers and runs the timers. Returns `Ok` on a clean
    /// close and the terminating error otherwise.
    pub async fn run(&mut self) -> Result<(), EndpointError> {
        loop {
            if let Err(e) = self.flush().await {
                return self.fail(e).await;
            }
            if self.close_requested || self.state == EndpointState::Disconnected {
                return self.finish_closed().await;
            }

            let wake = {
                let deadline = self.next_deadline();
                let reader = &mut self.reader;
                let transport = &mut self.transport;
                let clock = &self.clock;
                match deadline {
                    None => Wake::Frame(reader.next_frame(transport).await),
                    Some(at) => {
                        let now = clock.now_millis();
                        if at <= now {
                            Wake::Timer
                        } else {
                            let frame = std::pin::pin!(reader.next_frame(transport));
                            let sleep = std::pin::pin!(clock.sleep_millis(at - now));
                            match select(frame, sleep).await {
                                Either::Left((result, _)) => Wake::Frame(result),
                                Either::Right(((), _)) => Wake::Timer,
                            }
                        }
                    }
                }
            };

            match wake {
                Wake::Frame(Ok(frame)) => {
                    if self.role == Role::Server {
                        self.touch_idle_deadline();
                    }
                    if let Err(e) = self.handle_frame(frame) {
                        return self.terminate_protocol(e).await;
                    }
                }
                Wake::Frame(Err(e)) => {
                    if self.state == EndpointState::Disconnecting
                        && matches!(
                            &e,
                            EndpointError::Transport(te) if te.is_disconnection()
                        )
                    {
                        // The peer closed in response to our DISCONNECT.
                        return self.finish_closed().await;
                    }
                    return self.fail(e).await;
                }
                Wake::Timer => {
                    if let Some(result) = self.handle_deadlines().await {
                        return result;
                    }
                }
            }
        }
    }

    /// Returns `Some` when a deadline ends the connection.
    async fn handle_deadlines(&mut self) -> Option<Result<(), EndpointError>> {
        let now = self.clock.now_millis();

        if let (Some(at), Some(every)) = (self.ping_deadline, self.ping_every_ms) {
            if now >= at {
                trace!("keep-alive ping");
                if let Err(e) = self.queue_packet(&Packet::PingReq) {
                    return Some(self.fail(e).await);
                }
                // Pings are purely periodic; send activity never reschedules
                // them.
                let mut next = at + every;
                while next <= now {
                    next += every;
                }
                self.ping_deadline = Some(next);
            }
        }

        if let Some(at) = self.idle_deadline {
            if now >= at {
                warn!("idle timeout: no packet within 1.5x keep-alive");
                return Some(self.fail(EndpointError::Timeout(TimeoutKind::KeepAlive)).await);
            }
        }

        if let Some(at) = self.disconnect_deadline {
            if now >= at {
                debug!("disconnect grace period elapsed, closing");
                let err = EndpointError::Timeout(TimeoutKind::Disconnect);
                fire!(self, error, err);
                return Some(self.finish_closed().await);
            }
        }

        None
    }

    async fn flush(&mut self) -> Result<(), EndpointError> {
        while let Some(buf) = self.outbound.front() {
            self.transport.write_all(buf).await?;
            self.outbound.pop_front();
        }
        Ok(())
    }

    async fn finish_closed(&mut self) -> Result<(), EndpointError> {
        let _ = self.flush().await;
        let _ = self.transport.close().await;
        self.state = EndpointState::Disconnected;
        self.cancel_timers();
        self.close_requested = false;
        fire!(self, close);
        Ok(())
    }

    /// Codec or protocol violation: tell a v5 peer why, then drop the
    /// connection.
    async fn terminate_protocol(&mut self, err: EndpointError) -> Result<(), EndpointError> {
        warn!("terminating connection: {}", err);
        if self.protocol == Protocol::V5
            && matches!(
                self.state,
                EndpointState::Connected | EndpointState::Disconnecting
            )
        {
            let reason = match &err {
                EndpointError::Malformed(e) => ReasonCode::from(*e),
                EndpointError::PacketTooLarge { .. } => ReasonCode::PACKET_TOO_LARGE,
                EndpointError::Protocol(_) => ReasonCode::PROTOCOL_ERROR,
                _ => ReasonCode::UNSPECIFIED_ERROR,
            };
            let _ = self.queue_packet(&Packet::Disconnect(Disconnect::with_reason(reason)));
        }
        let _ = self.flush().await;
        let _ = self.transport.close().await;
        self.state = EndpointState::Disconnected;
        self.cancel_timers();
        fire!(self, error, err.clone());
        Err(err)
    }

    async fn fail(&mut self, err: EndpointError) -> Result<(), EndpointError> {
        let _ = self.transport.close().await;
        self.state = EndpointState::Disconnected;
        self.cancel_timers();
        fire!(self, error, err.clone());
        if let EndpointError::Transport(te) = &err {
            if te.is_disconnection() {
                fire!(self, close);
            }
        }
        Err(err)
    }

    #[cfg(test)]
    pub(crate) fn queued_packets(&self) -> Vec<Bytes> {
        self.outbound.iter().cloned().collect()
    }

    #[cfg(test)]
    pub(crate) fn drain_queue(&mut self) -> Vec<Bytes> {
        self.outbound.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::error::TransportError;

    struct NullTransport;

    impl Transport for NullTransport {
        async fn read(&mut self, _buf: &mut [u8]) -> Result<usize, TransportError> {
            Ok(0)
        }

        async fn write_all(&mut self, _buf: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    struct NullClock;

    impl Clock for NullClock {
        fn now_millis(&self) -> u64 {
            0
        }

        async fn sleep_millis(&self, _millis: u64) {}
    }

    type TestEndpoint = Endpoint<NullTransport, NullClock>;

    fn client(clean: bool) -> TestEndpoint {
        let mut session = Session::new("cid1");
        session.set_clean_session(clean);
        session.set_keep_alive_sec(30);
        Endpoint::client(NullTransport, NullClock, session)
    }

    fn feed(endpoint: &mut TestEndpoint, packet: Packet) -> Result<(), EndpointError> {
        let bytes = packet.encode(endpoint.codec()).unwrap();
        let mut reader = FrameReader::new();
        reader.feed(&bytes);
        let frame = reader.poll_frame().unwrap().unwrap();
        endpoint.handle_frame(frame)
    }

    fn establish(endpoint: &mut TestEndpoint, session_present: bool) {
        endpoint.connect().unwrap();
        endpoint.drain_queue();
        feed(
            endpoint,
            Packet::ConnAck(ConnAck {
                session_present,
                code: 0,
                properties: Vec::new(),
            }),
        )
        .unwrap();
        endpoint.drain_queue();
    }

    fn decode_all(bufs: &[Bytes], codec: Codec) -> Vec<Packet> {
        bufs.iter()
            .map(|b| {
                let mut wire = b.clone();
                Packet::from_bytes(&mut wire, codec).unwrap()
            })
            .collect()
    }

    #[test]
    fn connect_queues_connect_packet() {
        let mut endpoint = client(true);
        endpoint.connect().unwrap();
        assert_eq!(endpoint.state(), EndpointState::Connecting);
        let packets = decode_all(&endpoint.queued_packets(), Codec::v311());
        match &packets[..] {
            [Packet::Connect(c)] => {
                assert_eq!(c.client_id, "cid1");
                assert!(c.clean_start);
                assert_eq!(c.keep_alive, 30);
            }
            other => panic!("expected one CONNECT, got {:?}", other),
        }
    }

    #[test]
    fn qos1_handshake_releases_id_on_puback() {
        let mut endpoint = client(true);
        establish(&mut endpoint, false);

        let id = endpoint.publish("t", &b"m"[..], QoS::AtLeastOnce, false).unwrap();
        assert_eq!(id, 1);
        {
            let session = endpoint.session().unwrap();
            assert!(session.in_flight().contains(id, AckKind::PubAck));
            assert!(session.alloc.contains(id));
        }

        feed(&mut endpoint, Packet::PubAck(PubAck::new(id))).unwrap();
        let session = endpoint.session().unwrap();
        assert!(session.in_flight().is_empty());
        assert!(!session.alloc.contains(id));
    }

    #[test]
    fn qos2_publisher_walks_both_phases() {
        let mut endpoint = client(true);
        establish(&mut endpoint, false);

        let id = endpoint.publish("t", &b"m"[..], QoS::ExactlyOnce, false).unwrap();
        endpoint.drain_queue();

        feed(&mut endpoint, Packet::PubRec(PubRec::new(id))).unwrap();
        {
            let session = endpoint.session().unwrap();
            assert!(!session.in_flight().contains(id, AckKind::PubRec));
            assert!(session.in_flight().contains(id, AckKind::PubComp));
            assert!(session.alloc.contains(id));
        }
        let packets = decode_all(&endpoint.drain_queue(), Codec::v311());
        assert!(matches!(&packets[..], [Packet::PubRel(p)] if p.packet_id == id));

        feed(&mut endpoint, Packet::PubComp(PubComp::new(id))).unwrap();
        let session = endpoint.session().unwrap();
        assert!(session.in_flight().is_empty());
        assert!(!session.alloc.contains(id));
    }

    #[test]
    fn inbound_qos1_acks_and_redelivers() {
        let mut endpoint = client(true);
        establish(&mut endpoint, false);
        let deliveries = Arc::new(AtomicUsize::new(0));
        let counter = deliveries.clone();
        endpoint.set_publish_handler(move |_, publish| {
            assert_eq!(publish.topic, "t");
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        let mut publish = Publish::new("t", &b"m"[..], QoS::AtLeastOnce);
        publish.packet_id = Some(5);
        feed(&mut endpoint, Packet::Publish(publish.clone())).unwrap();
        // At-least-once: a repeat with the same id is delivered again.
        publish.dup = true;
        feed(&mut endpoint, Packet::Publish(publish)).unwrap();

        assert_eq!(deliveries.load(Ordering::SeqCst), 2);
        let packets = decode_all(&endpoint.drain_queue(), Codec::v311());
        assert!(matches!(
            &packets[..],
            [Packet::PubAck(a), Packet::PubAck(b)] if a.packet_id == 5 && b.packet_id == 5
        ));
    }

    #[test]
    fn inbound_qos2_suppresses_duplicates() {
        let mut endpoint = client(true);
        establish(&mut endpoint, false);
        let deliveries = Arc::new(AtomicUsize::new(0));
        let counter = deliveries.clone();
        endpoint.set_publish_handler(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        let mut publish = Publish::new("t", &b"m"[..], QoS::ExactlyOnce);
        publish.packet_id = Some(7);
        feed(&mut endpoint, Packet::Publish(publish.clone())).unwrap();
        publish.dup = true;
        feed(&mut endpoint, Packet::Publish(publish)).unwrap();

        // Delivered once, acknowledged twice.
        assert_eq!(deliveries.load(Ordering::SeqCst), 1);
        let packets = decode_all(&endpoint.drain_queue(), Codec::v311());
        assert!(matches!(
            &packets[..],
            [Packet::PubRec(a), Packet::PubRec(b)] if a.packet_id == 7 && b.packet_id == 7
        ));
        assert!(endpoint.session().unwrap().qos2_received.contains(&7));

        feed(&mut endpoint, Packet::PubRel(PubRel::new(7))).unwrap();
        let packets = decode_all(&endpoint.drain_queue(), Codec::v311());
        assert!(matches!(&packets[..], [Packet::PubComp(p)] if p.packet_id == 7));
        assert!(!endpoint.session().unwrap().qos2_received.contains(&7));
    }

    #[test]
    fn reconnect_replays_in_order_with_dup() {
        let mut endpoint = client(false);
        establish(&mut endpoint, false);
        let qos1_id = endpoint.publish("a", &b"1"[..], QoS::AtLeastOnce, false).unwrap();
        let qos2_id = endpoint.publish("b", &b"2"[..], QoS::ExactlyOnce, false).unwrap();
        let sub_id = endpoint
            .subscribe(vec![("c".to_owned(), SubscribeOptions::at_most_once())])
            .unwrap();

        let session = endpoint.take_session().unwrap();
        let mut endpoint = Endpoint::client(NullTransport, NullClock, session);
        endpoint.connect().unwrap();
        endpoint.drain_queue();
        feed(
            &mut endpoint,
            Packet::ConnAck(ConnAck {
                session_present: true,
                code: 0,
                properties: Vec::new(),
            }),
        )
        .unwrap();

        let packets = decode_all(&endpoint.drain_queue(), Codec::v311());
        match &packets[..] {
            [Packet::Publish(first), Packet::Publish(second)] => {
                assert_eq!(first.packet_id, Some(qos1_id));
                assert!(first.dup, "replayed QoS 1 publish must carry DUP");
                assert_eq!(second.packet_id, Some(qos2_id));
                assert!(second.dup, "replayed QoS 2 publish must carry DUP");
            }
            other => panic!("expected two PUBLISH replays, got {:?}", other),
        }
        // The subscribe expectation is not retransmitted and its id is free
        // again.
        let session = endpoint.session().unwrap();
        assert!(!session.alloc.contains(sub_id));
        assert!(!session.in_flight().contains_id(sub_id));
    }

    #[test]
    fn pubrel_replays_without_dup() {
        let mut endpoint = client(false);
        establish(&mut endpoint, false);
        let id = endpoint.publish("t", &b"m"[..], QoS::ExactlyOnce, false).unwrap();
        feed(&mut endpoint, Packet::PubRec(PubRec::new(id))).unwrap();
        endpoint.drain_queue();

        let session = endpoint.take_session().unwrap();
        let mut endpoint = Endpoint::client(NullTransport, NullClock, session);
        endpoint.connect().unwrap();
        endpoint.drain_queue();
        feed(
            &mut endpoint,
            Packet::ConnAck(ConnAck {
                session_present: true,
                code: 0,
                properties: Vec::new(),
            }),
        )
        .unwrap();

        let packets = decode_all(&endpoint.drain_queue(), Codec::v311());
        assert!(matches!(&packets[..], [Packet::PubRel(p)] if p.packet_id == id));
    }

    #[test]
    fn clean_start_acceptance_empties_store() {
        let mut endpoint = client(false);
        establish(&mut endpoint, false);
        endpoint.publish("t", &b"m"[..], QoS::AtLeastOnce, false).unwrap();

        let mut session = endpoint.take_session().unwrap();
        session.set_clean_session(true);
        let mut endpoint = Endpoint::client(NullTransport, NullClock, session);
        establish(&mut endpoint, false);

        assert!(endpoint.session().unwrap().in_flight().is_empty());
        assert_eq!(endpoint.session().unwrap().alloc.in_use(), 0);
    }

    #[test]
    fn suback_reflects_only_granted_entries() {
        let mut endpoint = client(true);
        establish(&mut endpoint, false);
        let id = endpoint
            .subscribe(vec![
                ("ok".to_owned(), SubscribeOptions::with_qos(QoS::ExactlyOnce)),
                ("denied".to_owned(), SubscribeOptions::at_most_once()),
            ])
            .unwrap();
        endpoint.drain_queue();

        feed(
            &mut endpoint,
            Packet::SubAck(SubAck::new(id, vec![0x01, 0x80])),
        )
        .unwrap();

        let session = endpoint.session().unwrap();
        let granted = session.subscriptions().get("ok").expect("granted entry");
        assert_eq!(granted.qos, QoS::AtLeastOnce);
        assert!(!session.subscriptions().contains("denied"));
        assert!(!session.alloc.contains(id));
    }

    #[test]
    fn unsuback_removes_filters() {
        let mut endpoint = client(true);
        establish(&mut endpoint, false);
        let sub_id = endpoint
            .subscribe(vec![("t".to_owned(), SubscribeOptions::at_most_once())])
            .unwrap();
        feed(&mut endpoint, Packet::SubAck(SubAck::new(sub_id, vec![0x00]))).unwrap();
        assert!(endpoint.session().unwrap().subscriptions().contains("t"));

        let unsub_id = endpoint.unsubscribe(vec!["t".to_owned()]).unwrap();
        feed(&mut endpoint, Packet::UnsubAck(UnsubAck::new(unsub_id))).unwrap();
        assert!(!endpoint.session().unwrap().subscriptions().contains("t"));
    }

    #[test]
    fn server_rejects_empty_client_id_with_non_clean_session() {
        let mut endpoint = Endpoint::server(NullTransport, NullClock);
        endpoint.start().unwrap();

        let connect = Connect {
            protocol: Protocol::V311,
            client_id: String::new(),
            clean_start: false,
            keep_alive: 10,
            will: None,
            username: None,
            password: None,
            properties: Vec::new(),
        };
        let err = feed(&mut endpoint, Packet::Connect(connect)).unwrap_err();
        assert_eq!(err, EndpointError::IdentifierRejected);

        let packets = decode_all(&endpoint.drain_queue(), Codec::v311());
        assert!(matches!(
            &packets[..],
            [Packet::ConnAck(c)]
                if c.code == ConnectReturnCode::IdentifierRejected as u8 && !c.session_present
        ));
        assert!(endpoint.session().is_none());
    }

    #[test]
    fn server_accepts_connect_and_tracks_peer_subscriptions() {
        let mut endpoint = Endpoint::server(NullTransport, NullClock);
        endpoint.start().unwrap();

        let connect = Connect {
            protocol: Protocol::V311,
            client_id: "peer".to_owned(),
            clean_start: true,
            keep_alive: 10,
            will: None,
            username: None,
            password: None,
            properties: Vec::new(),
        };
        feed(&mut endpoint, Packet::Connect(connect)).unwrap();
        endpoint.connack(false, 0).unwrap();
        assert_eq!(endpoint.state(), EndpointState::Connected);
        endpoint.drain_queue();

        let subscribe = Subscribe {
            packet_id: 1,
            entries: vec![SubscribeEntry {
                filter: "topic1".to_owned(),
                options: SubscribeOptions::at_most_once(),
            }],
            properties: Vec::new(),
        };
        feed(&mut endpoint, Packet::Subscribe(subscribe)).unwrap();
        endpoint.suback(1, vec![0x00]).unwrap();

        let session = endpoint.session().unwrap();
        assert!(session.subscriptions().contains("topic1"));
        let packets = decode_all(&endpoint.drain_queue(), Codec::v311());
        assert!(matches!(
            &packets[..],
            [Packet::SubAck(s)] if s.packet_id == 1 && s.codes == vec![0x00]
        ));
    }

    #[test]
    fn oversized_topic_fails_without_queueing() {
        let mut endpoint = client(true);
        establish(&mut endpoint, false);
        let topic = "x".repeat(65_536);
        let err = endpoint
            .publish(topic, &b"m"[..], QoS::AtMostOnce, false)
            .unwrap_err();
        assert_eq!(
            err,
            EndpointError::Malformed(CodecError::StringTooLong { length: 65_536 })
        );
        assert!(endpoint.queued_packets().is_empty());
    }

    #[test]
    fn acquired_publish_rejects_live_id() {
        let mut endpoint = client(true);
        establish(&mut endpoint, false);
        let id = endpoint.publish("t", &b"m"[..], QoS::AtLeastOnce, false).unwrap();
        let err = endpoint
            .acquired_publish(id, "t", &b"m"[..], QoS::AtLeastOnce, false)
            .unwrap_err();
        assert_eq!(err, EndpointError::PacketIdInUse { packet_id: id });

        endpoint
            .acquired_publish(id + 1, "t", &b"m"[..], QoS::AtLeastOnce, false)
            .unwrap();
    }

    #[test]
    fn publish_before_connack_is_a_protocol_error() {
        let mut endpoint = client(true);
        endpoint.connect().unwrap();
        let mut publish = Publish::new("t", &b"m"[..], QoS::AtMostOnce);
        publish.dup = false;
        let err = feed(&mut endpoint, Packet::Publish(publish)).unwrap_err();
        assert_eq!(
            err,
            EndpointError::Protocol(ProtocolViolation::UnexpectedPacket {
                packet_type: PacketType::Publish
            })
        );
    }

    #[test]
    fn connack_refusal_maps_identifier_rejected() {
        let mut endpoint = client(false);
        endpoint.connect().unwrap();
        let err = feed(
            &mut endpoint,
            Packet::ConnAck(ConnAck {
                session_present: false,
                code: ConnectReturnCode::IdentifierRejected as u8,
                properties: Vec::new(),
            }),
        )
        .unwrap_err();
        assert_eq!(err, EndpointError::IdentifierRejected);
    }

    #[test]
    fn handler_returning_false_detaches() {
        let mut endpoint = client(true);
        establish(&mut endpoint, false);
        let deliveries = Arc::new(AtomicUsize::new(0));
        let counter = deliveries.clone();
        endpoint.set_publish_handler(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            false
        });

        let publish = Publish::new("t", &b"m"[..], QoS::AtMostOnce);
        feed(&mut endpoint, Packet::Publish(publish.clone())).unwrap();
        feed(&mut endpoint, Packet::Publish(publish)).unwrap();
        assert_eq!(deliveries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn v5_server_keep_alive_property_overrides_session() {
        let mut endpoint = client(true);
        endpoint.set_protocol_version(Protocol::V5);
        endpoint.connect().unwrap();
        endpoint.drain_queue();
        feed(
            &mut endpoint,
            Packet::ConnAck(ConnAck {
                session_present: false,
                code: 0,
                properties: vec![Property::ServerKeepAlive(5)],
            }),
        )
        .unwrap();
        assert_eq!(endpoint.session().unwrap().keep_alive_sec(), 5);
    }
}
