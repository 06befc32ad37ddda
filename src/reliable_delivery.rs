//! Sequence bookkeeping for one peer.
//!
//! Every outgoing message gets the next sequence number and carries, newest first, all earlier
//!  entries that were not acknowledged yet, as far back as the send buffer reaches and within the
//!  configured limits. There is no retransmission timer: lost data is re-sent with the next
//!  message that goes out. When a message is acknowledged, so is everything it carried.
//!
//! Every message also acknowledges what was received from the peer: the newest received sequence
//!  and a bitmask for the 31 sequences before it.
//!
//! ```ascii
//! last_acked_sequence = n, last_acked_bits = ...1101_0
//!                                              |||| |
//!                                              |||| +- bit 0: unused
//!                                              |||+--- n-1 received
//!                                              ||+---- n-2 missing
//!                                              |+----- n-3 received
//!                                              +------ n-4 received
//! ```

use std::sync::Arc;
use tokio::time::Instant;
use tracing::trace;
use crate::config::RudpConfig;
use crate::error::RudpError;
use crate::events::{EventSink, ProtocolEvent};
use crate::message::Message;
use crate::message_header::{MessageHeader, MessageType};
use crate::packet_datum::PacketDatum;
use crate::sequence_buffer::{is_sequence_newer, SequenceRingBuffer};
use crate::util::safe_converter::PrecheckedCast;

/// the number of sequences before `last_acked_sequence` that an ack bitmask covers
pub const ACK_HORIZON: u16 = 31;

/// what a received message changed
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReceiveOutcome {
    /// own sequences that the message acknowledged for the first time
    pub newly_acked: Vec<u16>,
    /// entries that were not received before, oldest first
    pub fresh: Vec<PacketDatum>,
}

pub struct ReliableDeliveryEngine {
    config: Arc<RudpConfig>,
    /// the most recently allocated sequence; the first message is sent as #1
    sequence: u16,
    /// the newest sequence received from the peer
    last_acked_sequence: u16,
    send_buffer: SequenceRingBuffer<PacketDatum>,
    /// per sent message, the earlier sequences it re-sent
    bundles: SequenceRingBuffer<Vec<u16>>,
    receive_buffer: SequenceRingBuffer<PacketDatum>,
    event_sink: Arc<dyn EventSink>,
}

impl ReliableDeliveryEngine {
    pub fn new(config: Arc<RudpConfig>, event_sink: Arc<dyn EventSink>) -> anyhow::Result<ReliableDeliveryEngine> {
        Ok(ReliableDeliveryEngine {
            sequence: 0,
            last_acked_sequence: 0,
            send_buffer: SequenceRingBuffer::new(config.send_buffer_capacity)?,
            bundles: SequenceRingBuffer::new(config.send_buffer_capacity)?,
            receive_buffer: SequenceRingBuffer::new(config.receive_buffer_capacity)?,
            config,
            event_sink,
        })
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn last_acked_sequence(&self) -> u16 {
        self.last_acked_sequence
    }

    pub fn sent_datum(&self, sequence: u16) -> Option<&PacketDatum> {
        self.send_buffer.get(sequence)
    }

    pub fn received_datum(&self, sequence: u16) -> Option<&PacketDatum> {
        self.receive_buffer.get(sequence)
    }

    /// Forgets all state, starting over with sequence #1.
    pub fn reset(&mut self) {
        self.sequence = 0;
        self.last_acked_sequence = 0;
        self.send_buffer.clear();
        self.bundles.clear();
        self.receive_buffer.clear();
    }

    fn next_datum(&mut self, mut datum: PacketDatum, acked: bool) -> PacketDatum {
        self.sequence = self.sequence.wrapping_add(1);
        datum.sequence = self.sequence;
        datum.acked = acked;
        datum.send_time = Instant::now();

        self.send_buffer.put(datum.sequence, datum.clone());
        datum
    }

    fn build_message(&self, message_type: MessageType, backlog: Vec<PacketDatum>) -> Message {
        Message {
            header: MessageHeader {
                sequence: self.sequence,
                last_acked_sequence: self.last_acked_sequence,
                last_acked_bits: self.generate_previous_acked_bits(),
                message_type,
                protocol_id: self.config.protocol_id,
                checksum: 0,
            },
            backlog,
        }
    }

    /// Assigns the next sequence to `datum` and builds the message that carries it, bundling
    ///  earlier entries that are still unacknowledged.
    pub fn mark_sent(&mut self, datum: PacketDatum, message_type: MessageType) -> Message {
        let datum = self.next_datum(datum, false);
        let current = datum.sequence;

        let max_encoded_len = self.config.max_encoded_message_len();
        let mut payload_lens = vec![datum.payload.len()];
        let mut backlog = vec![datum];

        for offset in 1..self.send_buffer.capacity() {
            if backlog.len() >= self.config.max_backlog_len {
                break;
            }

            let prev = current.wrapping_sub(offset.prechecked_cast());
            let Some(unacked) = self.send_buffer.get(prev).filter(|d| !d.acked) else {
                continue;
            };

            payload_lens.push(unacked.payload.len());
            if Message::encoded_len_for(payload_lens.iter().copied()) > max_encoded_len {
                trace!("#{} does not fit into message #{} - not bundling it", prev, current);
                payload_lens.pop();
                continue;
            }
            backlog.push(unacked.clone());
        }

        let resent = backlog[1..].iter().map(|d| d.sequence).collect::<Vec<_>>();
        if !resent.is_empty() {
            trace!("message #{} re-sends {:?}", current, resent);
            self.event_sink.on_event(ProtocolEvent::PacketLossDetected { sequence: current, resent: resent.clone() });
        }
        self.bundles.put(current, resent);

        self.build_message(message_type, backlog)
    }

    /// Like [Self::mark_sent], but the datum is stored as acknowledged right away, so it is never
    ///  bundled into later messages. Nothing else is bundled either.
    pub fn mark_sent_acked(&mut self, datum: PacketDatum, message_type: MessageType) -> Message {
        let datum = self.next_datum(datum, true);
        self.build_message(message_type, vec![datum])
    }

    fn ack_sent(&mut self, sequence: u16, newly_acked: &mut Vec<u16>) {
        if !self.ack_single(sequence, newly_acked) {
            return;
        }

        // the peer received whatever the message re-sent
        let bundled = self.bundles.get(sequence).cloned().unwrap_or_default();
        for resent in bundled {
            self.ack_single(resent, newly_acked);
        }
    }

    /// returns `true` if the entry was acknowledged by this call
    fn ack_single(&mut self, sequence: u16, newly_acked: &mut Vec<u16>) -> bool {
        match self.buffered_sent_datum(sequence) {
            Ok(datum) => {
                if datum.acked {
                    return false;
                }
                datum.acked = true;
                newly_acked.push(sequence);
                true
            }
            Err(e) => {
                trace!("ack: {} - ignoring", e);
                false
            }
        }
    }

    fn buffered_sent_datum(&mut self, sequence: u16) -> Result<&mut PacketDatum, RudpError> {
        self.send_buffer.get_mut(sequence)
            .ok_or(RudpError::StaleSequence { sequence })
    }

    /// Applies the acknowledgements that `message` carries to the send buffer, and records its
    ///  entries in the receive buffer. Processing the same message again changes nothing.
    pub fn mark_received(&mut self, message: &Message) -> ReceiveOutcome {
        let mut outcome = ReceiveOutcome::default();

        let last_acked = message.header.last_acked_sequence;
        self.ack_sent(last_acked, &mut outcome.newly_acked);
        for offset in 1..=ACK_HORIZON {
            if message.header.last_acked_bits & (1 << offset) != 0 {
                self.ack_sent(last_acked.wrapping_sub(offset), &mut outcome.newly_acked);
            }
        }

        for datum in message.backlog.iter().rev() {
            if self.receive_buffer.contains(datum.sequence) {
                trace!("#{} was received before - skipping", datum.sequence);
                continue;
            }

            let mut datum = datum.clone();
            datum.acked = true;
            self.receive_buffer.put(datum.sequence, datum.clone());
            outcome.fresh.push(datum);
        }

        if is_sequence_newer(message.header.sequence, self.last_acked_sequence) {
            self.last_acked_sequence = message.header.sequence;
        }

        outcome
    }

    /// bit `i` (1..=31) is set iff the sequence `i` before `last_acked_sequence` was received
    pub fn generate_previous_acked_bits(&self) -> u32 {
        let mut bits = 0;
        for offset in 1..=ACK_HORIZON {
            let acked = self.receive_buffer.get(self.last_acked_sequence.wrapping_sub(offset))
                .map(|d| d.acked)
                .unwrap_or(false);
            if acked {
                bits |= 1 << offset;
            }
        }
        bits
    }
}
