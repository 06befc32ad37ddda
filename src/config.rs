use std::time::Duration;
use anyhow::bail;
use crate::message::{Message, MAX_BACKLOG_LEN};
use crate::security::SEALED_ENVELOPE_OVERHEAD;

#[derive(Clone, Debug)]
pub struct RudpConfig {
    /// This is the payload size inside datagrams that RUDP assumes. RUDP never splits a message
    ///  across datagrams, so this size must be supported by all network connections between
    ///  the peers.
    ///
    /// With full Ethernet frames and no optional IP headers, this payload is `1500 - 20 - 8 = 1472`
    ///  for IPV4 and `1500 - 40 - 8 = 1452` for IPV6.
    ///
    /// Choosing this value too big causes packets to be dropped, choosing it too small limits
    ///  payload size and the number of unacknowledged entries that can be bundled.
    pub max_packet_size: usize,

    /// Identifies the application protocol. Packets with a different id are dropped.
    pub protocol_id: u16,

    /// number of sent entries retained for bundling until they are acknowledged; a power of two
    pub send_buffer_capacity: usize,
    /// number of received sequences remembered for generating acks and for deduplication;
    ///  a power of two
    pub receive_buffer_capacity: usize,

    /// upper bound for the number of entries (including the current one) in a single message
    pub max_backlog_len: usize,

    pub checksum_enabled: bool,

    /// Enables the key exchange handshake and AES-GCM sealing of all regular traffic. Both
    ///  peers must agree on this.
    pub encryption_enabled: bool,

    /// time to wait for the peer's reply to a handshake request before re-sending it
    pub handshake_timeout: Duration,
    pub handshake_attempts: u32,
}

impl RudpConfig {
    /// ipv4 with end-to-end full Ethernet MTU, without optional headers
    pub fn default_ipv4() -> RudpConfig {
        RudpConfig {
            max_packet_size: 1472,
            protocol_id: 0x5255,
            send_buffer_capacity: 1024,
            receive_buffer_capacity: 1024,
            max_backlog_len: MAX_BACKLOG_LEN,
            checksum_enabled: true,
            encryption_enabled: true,
            handshake_timeout: Duration::from_millis(500),
            handshake_attempts: 5,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_packet_size < 100 {
            bail!("max packet size is too small");
        }
        if self.max_packet_size > 65507 {
            bail!("max packet size exceeds the maximum UDP payload");
        }
        for (name, capacity) in [("send", self.send_buffer_capacity), ("receive", self.receive_buffer_capacity)] {
            if !capacity.is_power_of_two() || capacity <= 32 || capacity > u16::MAX as usize + 1 {
                bail!("{} buffer capacity must be a power of two in 64..=65536, was {}", name, capacity);
            }
        }
        if self.max_backlog_len == 0 || self.max_backlog_len > MAX_BACKLOG_LEN {
            bail!("max backlog length must be in 1..={}", MAX_BACKLOG_LEN);
        }
        if self.handshake_attempts == 0 {
            bail!("at least one handshake attempt is required");
        }

        Ok(())
    }

    /// the space available for the encoded message inside a datagram
    pub fn max_encoded_message_len(&self) -> usize {
        if self.encryption_enabled {
            self.max_packet_size - SEALED_ENVELOPE_OVERHEAD
        }
        else {
            self.max_packet_size - 1
        }
    }

    /// the largest payload that can be sent, i.e. the payload of a message without backlog
    pub fn max_payload_len(&self) -> usize {
        let overhead = Message::encoded_len_for([0]);
        // payloads are padded to whole words
        ((self.max_encoded_message_len() - overhead) / 4 * 4).min(u16::MAX as usize)
    }
}
