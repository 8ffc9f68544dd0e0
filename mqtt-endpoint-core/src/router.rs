//! Broker routing interface.
//!
//! A server endpoint only manages its own connection; fan-out to other
//! endpoints, retained messages and wildcard matching live behind this
//! trait. The glue code that owns the endpoints calls into it from the
//! publish / subscribe handlers.

use bytes::Bytes;

use crate::protocol::QoS;
use crate::subscription::SubscribeOptions;

pub trait Router {
    /// Routes a message published by `src` (a client id) to every matching
    /// subscriber.
    fn route_publish(&mut self, topic: &str, payload: &Bytes, qos: QoS, retain: bool, src: &str);

    /// Registers a subscription and returns the QoS the broker grants for
    /// it.
    fn route_subscribe(&mut self, client_id: &str, filter: &str, options: SubscribeOptions)
        -> QoS;

    /// Removes a subscription. Returns whether it existed.
    fn route_unsubscribe(&mut self, client_id: &str, filter: &str) -> bool;
}
