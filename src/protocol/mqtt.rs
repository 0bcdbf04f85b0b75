/// MQTT-backed transport gateway
///
/// Every roster device publishes on `<channel>/<event>`. The gateway
/// subscribes `<channel>/#` for all devices on each (re)connect, reports
/// subscription acknowledgements, and forwards every publish as a
/// [`GatewayEvent::Message`]. It can also publish commands directly on
/// `<channel>/command` when the deployment bypasses the HTTP relay.
use anyhow::{anyhow, Result};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use rumqttc::{Client, Event, MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode};

use super::{
    device::DeviceRoster,
    gateway::{split_topic, GatewayEvent},
};
use crate::api::{traits::CommandSink, types::DeviceCommand};

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Broker connection parameters.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
}

impl MqttSettings {
    /// Build settings from an `mqtt://host:port` URL.
    pub fn from_url(raw: &str, client_prefix: &str, keep_alive: Duration) -> Result<Self> {
        let parsed = url::Url::parse(raw).map_err(|e| anyhow!("Invalid MQTT URL: {e}"))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| anyhow!("MQTT URL has no host: {raw}"))?
            .to_string();
        let port = parsed.port().unwrap_or(1883);
        Ok(Self {
            host,
            port,
            client_id: format!("{client_prefix}{}", uuid::Uuid::new_v4()),
            keep_alive,
        })
    }
}

/// Running MQTT gateway. Dropping it does not stop the worker; call [`MqttGateway::stop`].
pub struct MqttGateway {
    client: Client,
    roster: DeviceRoster,
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MqttGateway {
    /// Connect to the broker and start forwarding events to `on_event`.
    pub fn spawn<F>(settings: MqttSettings, roster: DeviceRoster, on_event: F) -> Result<Self>
    where
        F: Fn(GatewayEvent) + Send + 'static,
    {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(settings.keep_alive);

        let capacity = 10 + roster.len() * 2;
        let (client, mut connection) = Client::new(options, capacity);
        let running = Arc::new(AtomicBool::new(true));

        log::info!(
            "MQTT: connecting to {}:{} as {}",
            settings.host,
            settings.port,
            settings.client_id
        );

        let worker_client = client.clone();
        let worker_roster = roster.clone();
        let worker_running = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("mqtt-gateway".to_string())
            .spawn(move || {
                let mut router = SubscriptionRouter::new(worker_roster);
                for notification in connection.iter() {
                    if !worker_running.load(Ordering::SeqCst) {
                        break;
                    }
                    match notification {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            log::info!("MQTT: connected, subscribing device channels");
                            router.subscribe_all(&worker_client, &on_event);
                        }
                        Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                            router.bind_pkid(pkid);
                        }
                        Ok(Event::Incoming(Packet::SubAck(ack))) => {
                            for event in router.acknowledge(ack.pkid, &ack.return_codes) {
                                on_event(event);
                            }
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            let payload = String::from_utf8_lossy(&publish.payload);
                            match router.route_publish(&publish.topic, &payload) {
                                Some(event) => on_event(event),
                                None => log::debug!(
                                    "MQTT: ignoring publish on unknown topic '{}'",
                                    publish.topic
                                ),
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            log::warn!("MQTT connection error: {e}");
                            for id in router.roster.ids() {
                                on_event(GatewayEvent::SubscriptionError {
                                    device_id: id,
                                    reason: e.to_string(),
                                });
                            }
                            thread::sleep(RECONNECT_DELAY);
                        }
                    }
                }
                log::info!("MQTT: gateway worker stopped");
            })?;

        Ok(Self {
            client,
            roster,
            running,
            handle: Some(handle),
        })
    }

    /// A command sink publishing on `<channel>/command`.
    pub fn command_publisher(&self) -> MqttCommandPublisher {
        MqttCommandPublisher {
            client: self.client.clone(),
            roster: self.roster.clone(),
        }
    }

    /// Disconnect and wait for the worker thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Err(e) = self.client.disconnect() {
            log::debug!("MQTT: disconnect request failed: {e}");
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("MQTT: gateway worker panicked");
            }
        }
    }
}

/// Tracks which subscribe packet belongs to which device.
struct SubscriptionRouter {
    roster: DeviceRoster,
    queued: VecDeque<u8>,
    in_flight: HashMap<u16, u8>,
}

impl SubscriptionRouter {
    fn new(roster: DeviceRoster) -> Self {
        Self {
            roster,
            queued: VecDeque::new(),
            in_flight: HashMap::new(),
        }
    }

    fn subscribe_all<F: Fn(GatewayEvent)>(&mut self, client: &Client, on_event: &F) {
        self.queued.clear();
        self.in_flight.clear();
        for device in self.roster.devices() {
            let topic = format!("{}/#", device.channel);
            match client.try_subscribe(&topic, QoS::AtMostOnce) {
                Ok(()) => self.queued.push_back(device.id),
                Err(e) => {
                    log::error!("MQTT: failed to subscribe '{topic}': {e}");
                    on_event(GatewayEvent::SubscriptionError {
                        device_id: device.id,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    /// Subscribe packets leave in request order.
    fn bind_pkid(&mut self, pkid: u16) {
        if let Some(device_id) = self.queued.pop_front() {
            self.in_flight.insert(pkid, device_id);
        }
    }

    fn acknowledge(&mut self, pkid: u16, codes: &[SubscribeReasonCode]) -> Vec<GatewayEvent> {
        let Some(device_id) = self.in_flight.remove(&pkid) else {
            return Vec::new();
        };
        let failed = codes
            .iter()
            .any(|c| matches!(c, SubscribeReasonCode::Failure));
        if failed {
            log::warn!("MQTT: broker rejected subscription for device {device_id}");
            vec![GatewayEvent::SubscriptionError {
                device_id,
                reason: "subscription rejected by broker".to_string(),
            }]
        } else {
            log::debug!("MQTT: subscription acknowledged for device {device_id}");
            vec![GatewayEvent::SubscriptionSucceeded { device_id }]
        }
    }

    fn route_publish(&self, topic: &str, payload: &str) -> Option<GatewayEvent> {
        let (channel, event) = split_topic(topic)?;
        let device_id = self.roster.id_for_channel(channel)?;
        if event == "command" {
            // Our own outbound commands echo back through the wildcard subscription.
            return None;
        }
        Some(GatewayEvent::message(device_id, event, payload))
    }
}

/// Publishes commands straight onto the device channels.
#[derive(Clone)]
pub struct MqttCommandPublisher {
    client: Client,
    roster: DeviceRoster,
}

impl CommandSink for MqttCommandPublisher {
    fn send_command(&self, command: &DeviceCommand) -> Result<()> {
        let device = self
            .roster
            .get(command.device_id)
            .ok_or_else(|| anyhow!("Unknown device {}", command.device_id))?;
        let topic = format!("{}/command", device.channel);
        let body = serde_json::to_vec(command)?;
        self.client
            .try_publish(&topic, QoS::AtMostOnce, false, body)
            .map_err(|e| anyhow!("Failed to publish on '{topic}': {e}"))
    }
}
