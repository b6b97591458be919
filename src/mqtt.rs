//! Retained-message cleanup on the broker.
//!
//! Telegraf replays retained decoder topics after a rename, which
//! resurrects ghost series that were just deleted from the bucket. The
//! cleanup subscribes to a filter, collects every retained topic seen in
//! a short window, then republishes each with an empty retained payload
//! to drop it from the broker.

use rumqttc::{Client, Event, MqttOptions, Packet, QoS};
use std::io::Write;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_BROKER_HOST: &str = "localhost";
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// How long to listen for retained messages after subscribing.
const COLLECT_WINDOW: Duration = Duration::from_secs(3);
const POLL_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum MqttError {
    #[error("broker connection failed: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("mqtt request failed: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Match a topic against an MQTT filter with `+` and `#` wildcards.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');
    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Clear all retained messages matching `filter`. Returns the cleared
/// topics. Progress goes to `out` so the admin CLI can show what it
/// touched.
pub fn clear_retained(
    host: &str,
    port: u16,
    filter: &str,
    out: &mut impl Write,
) -> Result<Vec<String>, MqttError> {
    let client_id = format!("iot-ops-admin-{}", std::process::id());
    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(Duration::from_secs(5));

    let (client, mut connection) = Client::new(options, 64);
    client.subscribe(filter, QoS::AtLeastOnce)?;

    writeln!(out, "Collecting retained messages on '{filter}'...")?;
    let mut topics = Vec::new();
    let deadline = Instant::now() + COLLECT_WINDOW;
    while Instant::now() < deadline {
        let event = match connection.recv_timeout(POLL_TIMEOUT) {
            Ok(event) => event?,
            Err(_) => continue,
        };
        if let Event::Incoming(Packet::Publish(publish)) = event {
            // Live (non-retained) traffic on the same filter is not ours to clear
            if publish.retain && topic_matches(filter, &publish.topic) {
                debug!(topic = %publish.topic, "retained message found");
                topics.push(publish.topic.clone());
            }
        }
    }

    for topic in &topics {
        client.publish(topic.as_str(), QoS::AtLeastOnce, true, Vec::new())?;
        writeln!(out, "  cleared {topic}")?;
    }
    // drain acks for the publishes before disconnecting
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if connection.recv_timeout(POLL_TIMEOUT).is_err() {
            break;
        }
    }
    client.disconnect()?;

    writeln!(out, "Cleared {} retained message(s)", topics.len())?;
    Ok(topics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matches_exact() {
        assert!(topic_matches("a/b/c", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
        assert!(!topic_matches("a/b", "a/b/c"));
    }

    #[test]
    fn test_topic_matches_plus() {
        assert!(topic_matches("a/+/c", "a/b/c"));
        assert!(!topic_matches("a/+/c", "a/b/d"));
        assert!(!topic_matches("a/+/c", "a/c"));
    }

    #[test]
    fn test_topic_matches_hash() {
        assert!(topic_matches("a/#", "a/b/c/d"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("a/#", "b/c"));
    }

    #[test]
    fn test_topic_matches_decoder_cleanup_filter() {
        let filter = "demo_showsite/dpx_ops_decoder/+/+/old_fridge/#";
        assert!(topic_matches(
            filter,
            "demo_showsite/dpx_ops_decoder/dpx_ops_1/kitchen/old_fridge/AABBCCDDEEFF/temperature"
        ));
        assert!(!topic_matches(
            filter,
            "demo_showsite/dpx_ops_decoder/dpx_ops_1/kitchen/fridge_sensor/AABBCCDDEEFF/temperature"
        ));
    }
}
