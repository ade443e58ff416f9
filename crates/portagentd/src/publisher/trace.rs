//! Publisher that turns packets into tracing events.

use portagent_core::Packet;
use tracing::{debug, info, warn};

use super::{PublishError, Publisher, PublisherType};

/// Emits status reports at `info`, faults at `warn` and instrument
/// traffic at `debug`. Driver packets are left to the default handlers.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPublisher;

impl TracingPublisher {
    pub fn new() -> Self {
        Self
    }
}

impl Publisher for TracingPublisher {
    fn publisher_type(&self) -> PublisherType {
        PublisherType::Tracing
    }

    fn handle_instrument_data(&mut self, packet: &Packet) -> Result<(), PublishError> {
        debug!(
            len = packet.len(),
            payload = %packet.escaped_payload(),
            "Instrument data"
        );
        Ok(())
    }

    fn handle_command(&mut self, packet: &Packet) -> Result<(), PublishError> {
        debug!(
            len = packet.len(),
            payload = %packet.escaped_payload(),
            "Instrument command"
        );
        Ok(())
    }

    fn handle_status(&mut self, packet: &Packet) -> Result<(), PublishError> {
        info!(status = %String::from_utf8_lossy(packet.payload()), "Port agent status");
        Ok(())
    }

    fn handle_fault(&mut self, packet: &Packet) -> Result<(), PublishError> {
        warn!(fault = %String::from_utf8_lossy(packet.payload()), "Port agent fault");
        Ok(())
    }
}
