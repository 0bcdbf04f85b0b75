/// Events delivered by the pub/sub transport for the device channels.
use chrono::{DateTime, Local};

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// The channel subscription for a device was acknowledged.
    SubscriptionSucceeded { device_id: u8 },
    /// The channel subscription failed or the connection dropped.
    SubscriptionError { device_id: u8, reason: String },
    /// An application-level message arrived on a device channel.
    Message {
        device_id: u8,
        event: String,
        payload: String,
        received_at: DateTime<Local>,
    },
}

impl GatewayEvent {
    /// Convenience constructor stamping the current time.
    pub fn message(device_id: u8, event: &str, payload: &str) -> Self {
        Self::Message {
            device_id,
            event: event.to_string(),
            payload: payload.to_string(),
            received_at: Local::now(),
        }
    }
}

/// Split an MQTT topic of the form `<channel>/<event>`.
pub fn split_topic(topic: &str) -> Option<(&str, &str)> {
    let (channel, event) = topic.rsplit_once('/')?;
    if channel.is_empty() || event.is_empty() {
        return None;
    }
    Some((channel, event))
}
