//! Minimal MQTT client: subscribes to a topic, publishes one message to it,
//! prints what comes back, then disconnects.
//!
//! Usage: tcp_client [HOST:PORT] [TOPIC]

use mqtt_endpoint_tokio::{connect_tcp, Endpoint, QoS, Session, SubscribeOptions, TokioClock};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:1883".to_owned());
    let topic = args.next().unwrap_or_else(|| "hello/mqtt".to_owned());

    let transport = connect_tcp(&addr).await?;
    let mut session = Session::new("mqtt-endpoint-example");
    session.set_clean_session(true);
    session.set_keep_alive_sec(30);

    let mut endpoint = Endpoint::client(transport, TokioClock::new(), session);

    let subscribe_topic = topic.clone();
    endpoint.set_connack_handler(move |ep, connack| {
        println!(
            "connected: session_present={} code={:#04x}",
            connack.session_present, connack.code
        );
        if connack.is_accepted() {
            ep.subscribe(vec![(
                subscribe_topic.clone(),
                SubscribeOptions::with_qos(QoS::AtLeastOnce),
            )])
            .unwrap();
        }
        true
    });

    let publish_topic = topic.clone();
    endpoint.set_suback_handler(move |ep, suback| {
        println!("subscribed: codes={:?}", suback.codes);
        ep.publish(
            publish_topic.clone(),
            &b"hello from mqtt-endpoint"[..],
            QoS::AtLeastOnce,
            false,
        )
        .unwrap();
        true
    });

    endpoint.set_publish_handler(|ep, publish| {
        println!(
            "received: topic={} payload={:?} qos={:?}",
            publish.topic,
            String::from_utf8_lossy(&publish.payload),
            publish.qos
        );
        ep.disconnect(Some(3_000)).unwrap();
        true
    });

    endpoint.set_close_handler(|_| {
        println!("connection closed");
        true
    });

    endpoint.connect()?;
    endpoint.run().await?;
    Ok(())
}
