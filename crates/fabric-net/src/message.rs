use fabric_activemsg::PayloadSource;

use crate::module::ActiveMessageImpl;

/// An outgoing active message, possibly spread over several backends.
///
/// The header and payload are written once, into the first backend's send
/// object, and copied to the others at commit. Dropping a message that was
/// never committed cancels it.
pub struct ActiveMessage {
    parts: Vec<Box<dyn ActiveMessageImpl>>,
    max_payload_size: usize,
    payload_size: usize,
}

impl ActiveMessage {
    pub(crate) fn new(parts: Vec<Box<dyn ActiveMessageImpl>>, max_payload_size: usize) -> Self {
        assert!(!parts.is_empty(), "active message without a send object");
        Self {
            parts,
            max_payload_size,
            payload_size: 0,
        }
    }

    /// Number of backend send objects behind this message.
    pub fn fanout(&self) -> usize {
        self.parts.len()
    }

    pub fn header_mut(&mut self) -> &mut [u8] {
        self.parts[0].header_mut()
    }

    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// Append `payload` to the message body.
    ///
    /// # Panics
    ///
    /// If the body would exceed `max_payload_size`.
    pub fn add_payload(&mut self, payload: PayloadSource<'_>) {
        let size = payload.size();
        let end = self.payload_size + size;
        assert!(
            end <= self.max_payload_size,
            "payload of {} bytes exceeds message limit of {} ({} already used)",
            size,
            self.max_payload_size,
            self.payload_size
        );
        payload.copy_data(&mut self.parts[0].payload_mut()[self.payload_size..end]);
        self.payload_size = end;
    }

    /// Send the message.
    pub fn commit(mut self) {
        let mut parts = std::mem::take(&mut self.parts).into_iter();
        let Some(mut first) = parts.next() else {
            return;
        };
        let payload_size = self.payload_size;
        for mut part in parts {
            part.header_mut().copy_from_slice(first.header_mut());
            part.payload_mut()[..payload_size]
                .copy_from_slice(&first.payload_mut()[..payload_size]);
            part.commit(payload_size);
        }
        first.commit(payload_size);
    }

    /// Drop the message without sending it.
    pub fn cancel(mut self) {
        self.cancel_parts();
    }

    fn cancel_parts(&mut self) {
        for part in self.parts.drain(..) {
            part.cancel();
        }
    }
}

impl Drop for ActiveMessage {
    fn drop(&mut self) {
        if !self.parts.is_empty() {
            tracing::debug!(parts = self.parts.len(), "cancelling uncommitted active message");
            self.cancel_parts();
        }
    }
}
