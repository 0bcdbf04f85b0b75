/// Command dispatch to a single device
///
/// Validates the target against the roster, stamps a sequence number and
/// hands the command to the configured [`CommandSink`]. Failures come back as
/// [`SessionError::Delivery`]; what happens next (logging, waiting for the
/// timeout) is up to the caller.
use super::error::SessionError;
use crate::api::{traits::CommandSink, types::DeviceCommand};
use crate::protocol::device::DeviceRoster;

pub struct CommandDispatcher {
    sink: Box<dyn CommandSink>,
    include_channel: bool,
    next_seq: u64,
}

impl CommandDispatcher {
    pub fn new(sink: Box<dyn CommandSink>, include_channel: bool) -> Self {
        Self {
            sink,
            include_channel,
            next_seq: 0,
        }
    }

    /// Send `command` to `device_id`. Returns the sequence number used.
    ///
    /// A sequence number is consumed even when delivery fails; it stays
    /// available through [`CommandDispatcher::last_seq`].
    pub fn send(
        &mut self,
        roster: &DeviceRoster,
        device_id: u8,
        command: &str,
    ) -> Result<u64, SessionError> {
        self.next_seq += 1;
        let seq = self.next_seq;

        let device = roster.get(device_id).ok_or_else(|| SessionError::Delivery {
            device_id,
            reason: "device is not part of the roster".to_string(),
        })?;

        let outbound = DeviceCommand {
            device_id,
            command: command.to_string(),
            channel: self.include_channel.then(|| device.channel.clone()),
            seq,
        };

        log::debug!("Dispatching '{command}' to device {device_id} (seq {seq})");
        self.sink
            .send_command(&outbound)
            .map_err(|e| SessionError::Delivery {
                device_id,
                reason: e.to_string(),
            })?;
        Ok(seq)
    }

    pub fn last_seq(&self) -> u64 {
        self.next_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct SharedSink(Arc<Mutex<Vec<DeviceCommand>>>);

    impl CommandSink for SharedSink {
        fn send_command(&self, command: &DeviceCommand) -> anyhow::Result<()> {
            self.0.lock().push(command.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl CommandSink for FailingSink {
        fn send_command(&self, _command: &DeviceCommand) -> anyhow::Result<()> {
            bail!("gateway unreachable")
        }
    }

    #[test]
    fn test_send_stamps_sequence_and_channel() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let roster = DeviceRoster::new(3, "esp32-");
        let mut dispatcher = CommandDispatcher::new(Box::new(SharedSink(sent.clone())), true);

        assert_eq!(dispatcher.send(&roster, 2, "start"), Ok(1));
        assert_eq!(dispatcher.send(&roster, 3, "start"), Ok(2));

        let sent = sent.lock();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].channel.as_deref(), Some("esp32-2"));
        assert_eq!(sent[1].seq, 2);
    }

    #[test]
    fn test_unknown_device_and_sink_failure() {
        let roster = DeviceRoster::new(3, "esp32-");
        let mut dispatcher = CommandDispatcher::new(Box::new(FailingSink), false);

        let err = dispatcher.send(&roster, 9, "start").unwrap_err();
        assert!(matches!(err, SessionError::Delivery { device_id: 9, .. }));

        let err = dispatcher.send(&roster, 1, "start").unwrap_err();
        assert_eq!(dispatcher.last_seq(), 2);
        assert!(err.to_string().contains("gateway unreachable"));
    }
}
