/// Device roster shared by the gateway callbacks and the session engine
///
/// The roster is fixed at startup (ids `1..=count`). Records are never
/// removed, only their transient display state is reset between sessions.
use chrono::{DateTime, Local};
use serde::Serialize;

/// Default prefix used to derive a device's channel name.
pub const DEFAULT_CHANNEL_PREFIX: &str = "esp32-";

/// One addressable microcontroller unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub id: u8,
    pub channel: String,
    /// Set when the channel subscription has been acknowledged.
    pub connected: bool,
    /// Updated on any inbound event for this device.
    pub last_seen: Option<DateTime<Local>>,
    /// Whether the session currently waits on this device.
    pub active: bool,
    pub last_response: Option<String>,
}

impl Device {
    fn new(id: u8, prefix: &str) -> Self {
        Self {
            id,
            channel: channel_name(prefix, id),
            connected: false,
            last_seen: None,
            active: false,
            last_response: None,
        }
    }
}

/// Build the channel name a device publishes on.
pub fn channel_name(prefix: &str, id: u8) -> String {
    format!("{prefix}{id}")
}

#[derive(Debug, Clone)]
pub struct DeviceRoster {
    devices: Vec<Device>,
}

impl DeviceRoster {
    /// Create a roster with devices `1..=count`.
    pub fn new(count: u8, prefix: &str) -> Self {
        let devices = (1..=count).map(|id| Device::new(id, prefix)).collect();
        Self { devices }
    }

    pub fn contains(&self, id: u8) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: u8) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    fn get_mut(&mut self, id: u8) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.id == id)
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn ids(&self) -> Vec<u8> {
        self.devices.iter().map(|d| d.id).collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Resolve a channel name back to its device id.
    pub fn id_for_channel(&self, channel: &str) -> Option<u8> {
        self.devices
            .iter()
            .find(|d| d.channel == channel)
            .map(|d| d.id)
    }

    pub fn set_connected(&mut self, id: u8, connected: bool) {
        if let Some(device) = self.get_mut(id) {
            device.connected = connected;
        }
    }

    pub fn touch(&mut self, id: u8, at: DateTime<Local>) {
        if let Some(device) = self.get_mut(id) {
            device.last_seen = Some(at);
        }
    }

    pub fn set_last_response(&mut self, id: u8, response: &str) {
        if let Some(device) = self.get_mut(id) {
            device.last_response = Some(response.to_string());
        }
    }

    /// Mark `id` as the single active device, clearing every other flag.
    pub fn mark_active(&mut self, id: u8) {
        for device in &mut self.devices {
            device.active = device.id == id;
        }
    }

    pub fn clear_active(&mut self) {
        for device in &mut self.devices {
            device.active = false;
        }
    }

    pub fn active_device(&self) -> Option<u8> {
        self.devices.iter().find(|d| d.active).map(|d| d.id)
    }

    /// Reset per-session display state. Connection state is kept.
    pub fn reset_transient(&mut self) {
        for device in &mut self.devices {
            device.active = false;
            device.last_response = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_channels() {
        let roster = DeviceRoster::new(5, DEFAULT_CHANNEL_PREFIX);
        assert_eq!(roster.len(), 5);
        assert_eq!(roster.ids(), vec![1, 2, 3, 4, 5]);
        assert_eq!(roster.get(3).map(|d| d.channel.as_str()), Some("esp32-3"));
        assert_eq!(roster.id_for_channel("esp32-5"), Some(5));
        assert_eq!(roster.id_for_channel("esp32-6"), None);
        assert!(!roster.contains(0));
    }

    #[test]
    fn test_single_active_device() {
        let mut roster = DeviceRoster::new(3, "dev");
        roster.mark_active(2);
        roster.mark_active(3);
        assert_eq!(roster.active_device(), Some(3));
        assert_eq!(roster.devices().iter().filter(|d| d.active).count(), 1);
    }

    #[test]
    fn test_reset_keeps_connection() {
        let mut roster = DeviceRoster::new(2, "dev");
        roster.set_connected(1, true);
        roster.mark_active(1);
        roster.set_last_response(1, "acierto");
        roster.reset_transient();

        let device = roster.get(1).unwrap();
        assert!(device.connected);
        assert!(!device.active);
        assert!(device.last_response.is_none());
    }
}
