use logdist_common::config::{
    MAX_LOG_MESSAGE_LENGTH, MAX_MESSAGES_PER_PACKET, MAX_PACKET_SIZE_BYTES,
};
use logdist_common::{DistributorError, LogPacket, Result};

/// Stateless packet validation. Safe to share across tasks.
#[derive(Debug, Default, Clone, Copy)]
pub struct PacketValidator;

impl PacketValidator {
    pub fn new() -> Self {
        Self
    }

    /// Checks a packet against the message-count, per-message and
    /// total-size limits. The first violated limit wins.
    pub fn validate(&self, packet: &LogPacket) -> Result<()> {
        if packet.messages.is_empty() {
            return Err(DistributorError::EmptyMessages);
        }
        if packet.messages.len() > MAX_MESSAGES_PER_PACKET {
            return Err(DistributorError::TooManyMessages {
                count: packet.messages.len(),
                max: MAX_MESSAGES_PER_PACKET,
            });
        }

        let mut total_size = 0;
        for msg in &packet.messages {
            if msg.message.len() > MAX_LOG_MESSAGE_LENGTH {
                return Err(DistributorError::MessageTooLong {
                    len: msg.message.len(),
                    max: MAX_LOG_MESSAGE_LENGTH,
                });
            }
            total_size += msg.message.len();
        }

        if total_size > MAX_PACKET_SIZE_BYTES {
            return Err(DistributorError::PacketTooLarge {
                size: total_size,
                max: MAX_PACKET_SIZE_BYTES,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logdist_common::LogMessage;

    fn packet_with_bodies(bodies: &[&str]) -> LogPacket {
        LogPacket::new(
            bodies
                .iter()
                .map(|b| LogMessage::new("info", *b, "test", None))
                .collect(),
        )
    }

    #[test]
    fn test_valid_packet_passes() {
        let validator = PacketValidator::new();
        let packet = packet_with_bodies(&["hello", "world"]);
        assert!(validator.validate(&packet).is_ok());
    }

    #[test]
    fn test_empty_packet_rejected() {
        let validator = PacketValidator::new();
        let packet = LogPacket::new(vec![]);
        assert!(matches!(
            validator.validate(&packet),
            Err(DistributorError::EmptyMessages)
        ));
    }

    #[test]
    fn test_too_many_messages_rejected() {
        let validator = PacketValidator::new();
        let messages = (0..MAX_MESSAGES_PER_PACKET + 1)
            .map(|i| LogMessage::new("info", format!("msg {i}"), "test", None))
            .collect();
        let packet = LogPacket::new(messages);
        assert!(matches!(
            validator.validate(&packet),
            Err(DistributorError::TooManyMessages { count, .. }) if count == MAX_MESSAGES_PER_PACKET + 1
        ));
    }

    #[test]
    fn test_oversized_message_rejected() {
        let validator = PacketValidator::new();
        let body = "x".repeat(MAX_LOG_MESSAGE_LENGTH + 1);
        let packet = packet_with_bodies(&[&body]);
        assert!(matches!(
            validator.validate(&packet),
            Err(DistributorError::MessageTooLong { .. })
        ));
    }

    #[test]
    fn test_message_at_limit_passes() {
        let validator = PacketValidator::new();
        let body = "x".repeat(MAX_LOG_MESSAGE_LENGTH);
        let packet = packet_with_bodies(&[&body]);
        assert!(validator.validate(&packet).is_ok());
    }

    #[test]
    fn test_oversized_packet_rejected() {
        let validator = PacketValidator::new();
        // Each body is under the per-message cap but together they blow
        // the packet budget.
        let body = "x".repeat(MAX_LOG_MESSAGE_LENGTH);
        let bodies: Vec<String> = (0..MAX_PACKET_SIZE_BYTES / MAX_LOG_MESSAGE_LENGTH + 1)
            .map(|_| body.clone())
            .collect();
        let refs: Vec<&str> = bodies.iter().map(String::as_str).collect();
        let packet = packet_with_bodies(&refs);
        assert!(matches!(
            validator.validate(&packet),
            Err(DistributorError::PacketTooLarge { .. })
        ));
    }
}
