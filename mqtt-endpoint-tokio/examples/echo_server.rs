//! Single-process MQTT echo server.
//!
//! Every connection gets its own server endpoint. Subscriptions are granted
//! through a `Router` implementation and publishes are echoed back to the
//! publishing connection at the QoS it asked for. Sessions outlive
//! connections through a shared in-memory registry, so a non-clean client
//! that reconnects gets `session_present=true` and its in-flight state
//! replayed.
//!
//! Usage: echo_server [BIND_ADDR]

use std::sync::{Arc, Mutex};

use log::{info, warn};
use mqtt_endpoint_tokio::{
    make_server_endpoint, Clock, MemorySessionRegistry, QoS, Router, SessionRegistry,
    SubscribeOptions, TokioClock,
};
use tokio::net::TcpListener;

/// Grants whatever was requested, capped at QoS 1.
struct CappedRouter;

impl Router for CappedRouter {
    fn route_publish(
        &mut self,
        topic: &str,
        _payload: &bytes::Bytes,
        qos: QoS,
        _retain: bool,
        src: &str,
    ) {
        info!("route publish topic={} qos={:?} from={}", topic, qos, src);
    }

    fn route_subscribe(
        &mut self,
        client_id: &str,
        filter: &str,
        options: SubscribeOptions,
    ) -> QoS {
        info!("route subscribe filter={} from={}", filter, client_id);
        options.qos.min(QoS::AtLeastOnce)
    }

    fn route_unsubscribe(&mut self, client_id: &str, filter: &str) -> bool {
        info!("route unsubscribe filter={} from={}", filter, client_id);
        true
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:1883".to_owned());
    let listener = TcpListener::bind(&addr).await?;
    info!("listening on {}", addr);

    let registry = Arc::new(Mutex::new(MemorySessionRegistry::new()));
    let router = Arc::new(Mutex::new(CappedRouter));

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        stream.set_nodelay(true)?;
        info!("accepted {}", peer_addr);

        let registry = registry.clone();
        let router = router.clone();
        tokio::spawn(async move {
            let clock = TokioClock::new();
            let mut endpoint = make_server_endpoint(stream);

            endpoint.set_connect_handler({
                let registry = registry.clone();
                let clock = clock.clone();
                move |ep, connect| {
                    let mut registry = registry.lock().unwrap();
                    if connect.clean_start {
                        registry.evict(&connect.client_id);
                        ep.connack(false, 0).unwrap();
                    } else {
                        match registry.take(&connect.client_id, clock.now_millis()) {
                            Some(prior) => {
                                ep.restore_session(prior).unwrap();
                                ep.connack(true, 0).unwrap();
                            }
                            None => ep.connack(false, 0).unwrap(),
                        }
                    }
                    true
                }
            });

            endpoint.set_subscribe_handler({
                let router = router.clone();
                move |ep, subscribe| {
                    let client_id = ep
                        .session()
                        .map(|s| s.client_id().to_owned())
                        .unwrap_or_default();
                    let mut router = router.lock().unwrap();
                    let codes = subscribe
                        .entries
                        .iter()
                        .map(|entry| {
                            router.route_subscribe(&client_id, &entry.filter, entry.options)
                                as u8
                        })
                        .collect();
                    ep.suback(subscribe.packet_id, codes).unwrap();
                    true
                }
            });

            endpoint.set_unsubscribe_handler({
                let router = router.clone();
                move |ep, unsubscribe| {
                    let client_id = ep
                        .session()
                        .map(|s| s.client_id().to_owned())
                        .unwrap_or_default();
                    let mut router = router.lock().unwrap();
                    for filter in &unsubscribe.filters {
                        router.route_unsubscribe(&client_id, filter);
                    }
                    ep.unsuback(unsubscribe.packet_id).unwrap();
                    true
                }
            });

            endpoint.set_publish_handler({
                let router = router.clone();
                move |ep, publish| {
                    let client_id = ep
                        .session()
                        .map(|s| s.client_id().to_owned())
                        .unwrap_or_default();
                    router.lock().unwrap().route_publish(
                        &publish.topic,
                        &publish.payload,
                        publish.qos,
                        publish.retain,
                        &client_id,
                    );
                    // Echo back on the same connection at the same QoS.
                    if let Err(e) =
                        ep.publish(publish.topic.clone(), publish.payload.clone(), publish.qos, false)
                    {
                        warn!("echo failed: {}", e);
                    }
                    true
                }
            });

            let result = endpoint.run().await;
            if let Err(e) = result {
                warn!("{}: connection ended with error: {}", peer_addr, e);
            }
            // Keep the session for a future reconnect unless it expires.
            if let Some(session) = endpoint.take_session() {
                if !session.clean_session() {
                    registry.lock().unwrap().put(session, clock.now_millis());
                }
            }
        });
    }
}
