use std::sync::Arc;
use std::time::Duration;
use anyhow::bail;
use bytes::{Bytes, BytesMut};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, span, trace, warn, Instrument, Level};
use uuid::Uuid;
use crate::config::RudpConfig;
use crate::envelope::Envelope;
use crate::error::RudpError;
use crate::events::{EventSink, ProtocolEvent};
use crate::message::Message;
use crate::message_header::MessageType;
use crate::packet_datum::PacketDatum;
use crate::reliable_delivery::ReliableDeliveryEngine;
use crate::security::{KeyPair, NonceSequence, Security, SessionKeys, SEALED_ENVELOPE_OVERHEAD};
use crate::transport::ByteTransport;
use crate::util::rolling_average::RollingAverage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    KeyExchangePending,
    Ready,
}

/// ProtocolManager is the place where all parts of the protocol come together for one peer: it
///  performs the handshake, turns payloads into sealed packets and back, acknowledges what it
///  receives and measures the round trip time from the peer's acks.
///
/// It is driven by the application calling [ProtocolManager::send] and
///  [ProtocolManager::receive]; nothing happens in between.
pub struct ProtocolManager {
    config: Arc<RudpConfig>,
    engine: ReliableDeliveryEngine,
    transport: Box<dyn ByteTransport>,
    security: Arc<dyn Security>,
    event_sink: Arc<dyn EventSink>,
    state: ConnectionState,
    is_server: bool,
    key_pair: Option<KeyPair>,
    peer_public_key: Option<Bytes>,
    session_keys: Option<SessionKeys>,
    nonces: NonceSequence,
    /// in nanoseconds
    rtt: RollingAverage<3>,
    receive_buf: Vec<u8>,
}

impl ProtocolManager {
    pub fn new(
        config: Arc<RudpConfig>,
        transport: Box<dyn ByteTransport>,
        security: Arc<dyn Security>,
        event_sink: Arc<dyn EventSink>,
    ) -> anyhow::Result<ProtocolManager> {
        config.validate()?;

        Ok(ProtocolManager {
            engine: ReliableDeliveryEngine::new(config.clone(), event_sink.clone())?,
            receive_buf: vec![0; config.max_packet_size],
            config,
            transport,
            security,
            event_sink,
            state: ConnectionState::Disconnected,
            is_server: false,
            key_pair: None,
            peer_public_key: None,
            session_keys: None,
            nonces: NonceSequence::new(),
            rtt: RollingAverage::new(),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn engine(&self) -> &ReliableDeliveryEngine {
        &self.engine
    }

    /// the moving average of the last three round trip samples
    pub fn rtt(&self) -> Option<Duration> {
        self.rtt.mean()
            .map(|nanos| Duration::from_nanos(nanos.round() as u64))
    }

    /// Connects to a peer that is waiting in [ProtocolManager::accept]. With encryption enabled,
    ///  this includes the key exchange, and failure to complete it fails the connection.
    pub async fn connect(&mut self, address: &str, port: u16) -> anyhow::Result<()> {
        self.transport.connect(address, port).await?;
        self.is_server = false;
        self.engine.reset();

        if !self.config.encryption_enabled {
            warn!("connected to {}:{} without encryption - this is for debugging purposes and not recommended for production use", address, port);
            self.state = ConnectionState::Ready;
            return Ok(());
        }

        self.key_pair = Some(self.security.generate_key_pair());
        self.session_keys = None;
        self.state = ConnectionState::KeyExchangePending;

        for attempt in 1..=self.config.handshake_attempts {
            debug!("handshake attempt {} with {}:{}", attempt, address, port);
            self.send_public_key(MessageType::RequestPubKey).await?;

            match timeout(self.config.handshake_timeout, self.await_public_key(MessageType::SendPubKey)).await {
                Ok(Ok(peer_public_key)) => {
                    return self.complete_client_handshake(peer_public_key);
                }
                Ok(Err(e)) => {
                    self.state = ConnectionState::Disconnected;
                    return Err(e);
                }
                Err(_) => debug!("no handshake reply after {:?}", self.config.handshake_timeout),
            }
        }

        self.state = ConnectionState::Disconnected;
        Err(RudpError::HandshakeFailure { reason: format!("no reply after {} attempts", self.config.handshake_attempts) }.into())
    }

    fn complete_client_handshake(&mut self, peer_public_key: Bytes) -> anyhow::Result<()> {
        let Some(key_pair) = &self.key_pair else {
            bail!("this is a bug: no key pair during handshake");
        };

        match self.security.generate_client_transmission_keys(key_pair, &peer_public_key) {
            Ok(keys) => {
                self.session_keys = Some(keys);
                self.peer_public_key = Some(peer_public_key);
                self.nonces = NonceSequence::new();
                self.state = ConnectionState::Ready;
                info!("handshake complete");
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(Self::as_handshake_failure(e))
            }
        }
    }

    fn as_handshake_failure(e: anyhow::Error) -> anyhow::Error {
        if e.downcast_ref::<RudpError>().is_some() {
            e
        }
        else {
            RudpError::HandshakeFailure { reason: e.to_string() }.into()
        }
    }

    /// Waits for a peer to connect. With encryption enabled, this returns once a key exchange
    ///  request was answered.
    pub async fn accept(&mut self) -> anyhow::Result<()> {
        self.is_server = true;
        self.engine.reset();

        if !self.config.encryption_enabled {
            warn!("accepting without encryption - this is for debugging purposes and not recommended for production use");
            self.state = ConnectionState::Ready;
            return Ok(());
        }

        self.state = ConnectionState::KeyExchangePending;
        let peer_public_key = self.await_public_key(MessageType::RequestPubKey).await?;
        self.start_server_session(peer_public_key).await
    }

    async fn start_server_session(&mut self, peer_public_key: Bytes) -> anyhow::Result<()> {
        let key_pair = self.security.generate_key_pair();
        let keys = match self.security.generate_server_transmission_keys(&key_pair, &peer_public_key) {
            Ok(keys) => keys,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Err(Self::as_handshake_failure(e));
            }
        };

        self.key_pair = Some(key_pair);
        self.session_keys = Some(keys);
        self.peer_public_key = Some(peer_public_key);
        self.nonces = NonceSequence::new();
        self.engine.reset();
        self.state = ConnectionState::Ready;
        info!("key exchange complete, session started");

        self.send_public_key(MessageType::SendPubKey).await?;
        Ok(())
    }

    async fn send_public_key(&mut self, message_type: MessageType) -> anyhow::Result<usize> {
        let Some(key_pair) = &self.key_pair else {
            bail!("this is a bug: no key pair during handshake");
        };
        let message = Message::unsequenced(message_type, self.config.protocol_id, Bytes::copy_from_slice(&key_pair.public_key));
        self.transmit(message, false).await
    }

    async fn await_public_key(&mut self, message_type: MessageType) -> anyhow::Result<Bytes> {
        loop {
            let num_read = self.transport.receive(&mut self.receive_buf).await?;
            if let Some(message) = self.decode_handshake(&self.receive_buf[..num_read]) {
                if message.header.message_type == message_type {
                    return Ok(message.backlog[0].payload.clone());
                }
                debug!("expected {:?} during handshake, received {:?} - ignoring", message_type, message.header.message_type);
            }
        }
    }

    fn decode_handshake(&self, packet: &[u8]) -> Option<Message> {
        let encoded = match Envelope::deser(packet) {
            Ok(Envelope::Plaintext(encoded)) => encoded,
            Ok(Envelope::Sealed { .. }) => {
                debug!("sealed packet during handshake - dropping");
                return None;
            }
            Err(e) => {
                warn!("received packet with unparsable envelope during handshake: {} - dropping", e);
                return None;
            }
        };

        let message = match Message::decode(encoded) {
            Ok(message) => message,
            Err(e) => {
                warn!("received unparsable message during handshake: {} - dropping", e);
                return None;
            }
        };

        if !message.header.message_type.is_handshake() || message.backlog.len() != 1 {
            debug!("{:?} is not a handshake message - dropping", message.header.message_type);
            return None;
        }
        if !self.is_acceptable(&message) {
            return None;
        }
        Some(message)
    }

    /// protocol id and checksum validation; failures are per-packet drops
    fn is_acceptable(&self, message: &Message) -> bool {
        if message.header.protocol_id != self.config.protocol_id {
            warn!("received message with protocol id {:#06x}, expected {:#06x} - dropping", message.header.protocol_id, self.config.protocol_id);
            return false;
        }
        if self.config.checksum_enabled {
            if let Err(e) = message.verify_checksum() {
                debug!("{} - dropping", e);
                self.event_sink.on_event(ProtocolEvent::ChecksumFailed { sequence: message.header.sequence });
                return false;
            }
        }
        true
    }

    /// Sends `payload` in a new message, together with earlier payloads that were not
    ///  acknowledged yet. Returns the number of bytes handed to the transport.
    pub async fn send(&mut self, payload: &[u8]) -> anyhow::Result<usize> {
        if self.state != ConnectionState::Ready {
            return Err(RudpError::NotReady { operation: "send" }.into());
        }
        let max_payload_len = self.config.max_payload_len();
        if payload.len() > max_payload_len {
            return Err(RudpError::PayloadTooLarge { len: payload.len(), max: max_payload_len }.into());
        }

        let message = self.engine.mark_sent(PacketDatum::new(Bytes::copy_from_slice(payload)), MessageType::General);
        self.transmit(message, self.config.encryption_enabled).await
    }

    /// Acknowledges `received`, with a message of its own that is never bundled or acknowledged.
    pub async fn send_ack(&mut self, received: &Message) -> anyhow::Result<usize> {
        let ack = self.engine.mark_sent_acked(PacketDatum::new(Bytes::new()), MessageType::Ack);
        trace!("acknowledging #{} with #{}", received.header.sequence, ack.header.sequence);

        self.event_sink.on_event(ProtocolEvent::AckSent {
            sequence: ack.header.sequence,
            last_acked_sequence: ack.header.last_acked_sequence,
        });
        self.transmit(ack, self.config.encryption_enabled).await
    }

    async fn transmit(&mut self, mut message: Message, sealed: bool) -> anyhow::Result<usize> {
        if self.config.checksum_enabled {
            message.set_checksum();
        }
        let encoded = message.encode()?;

        let mut packet = BytesMut::with_capacity(encoded.len() + SEALED_ENVELOPE_OVERHEAD);
        if sealed {
            let nonce = self.nonces.next_nonce();
            let Some(keys) = &self.session_keys else {
                return Err(RudpError::NotReady { operation: "sealing a packet" }.into());
            };
            let ciphertext = self.security.encrypt_with_session_key(&keys.tx, &nonce, &encoded)?;
            Envelope::Sealed { nonce, ciphertext: &ciphertext }.ser(&mut packet);
        }
        else {
            Envelope::Plaintext(&encoded).ser(&mut packet);
        }

        trace!("sending #{} ({:?}, {} entries) as {} bytes", message.header.sequence, message.header.message_type, message.backlog.len(), packet.len());
        self.transport.send(&packet).await
    }

    /// Waits for the next packet and processes it, returning the payloads it delivered for the
    ///  first time (oldest first). Packets that are dropped, and acks, deliver nothing.
    pub async fn receive(&mut self) -> anyhow::Result<Vec<Bytes>> {
        if self.state != ConnectionState::Ready {
            return Err(RudpError::NotReady { operation: "receive" }.into());
        }

        let num_read = self.transport.receive(&mut self.receive_buf).await?;
        let packet = self.receive_buf[..num_read].to_vec();

        let correlation_id = Uuid::new_v4();
        let span = span!(Level::TRACE, "packet_received", ?correlation_id);
        self.on_packet(&packet).instrument(span).await
    }

    async fn on_packet(&mut self, packet: &[u8]) -> anyhow::Result<Vec<Bytes>> {
        trace!("received packet of {} bytes", packet.len());

        let envelope = match Envelope::deser(packet) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("received packet with unparsable envelope: {} - dropping", e);
                self.event_sink.on_event(ProtocolEvent::UnparsablePacket { len: packet.len() });
                return Ok(vec![]);
            }
        };

        match envelope {
            Envelope::Plaintext(encoded) => {
                // nothing protects a plaintext packet against corruption before it is decoded
                let message = match Message::decode(encoded) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("received unparsable message: {} - dropping", e);
                        self.event_sink.on_event(ProtocolEvent::UnparsablePacket { len: packet.len() });
                        return Ok(vec![]);
                    }
                };
                if message.header.message_type.is_handshake() {
                    self.on_handshake_message(message).await?;
                    return Ok(vec![]);
                }
                if self.config.encryption_enabled {
                    debug!("unsealed message #{} although encryption is enabled - dropping", message.header.sequence);
                    return Ok(vec![]);
                }
                self.on_message(message).await
            }
            Envelope::Sealed { nonce, ciphertext } => {
                let Some(keys) = &self.session_keys else {
                    debug!("sealed packet without session keys - dropping");
                    return Ok(vec![]);
                };

                let encoded = match self.security.decrypt_with_session_key(&keys.rx, &nonce, ciphertext) {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        debug!("cryptographically invalid: {} - dropping", e);
                        self.event_sink.on_event(ProtocolEvent::DecryptFailed);
                        return Ok(vec![]);
                    }
                };

                let message = Message::decode(&encoded)
                    .inspect_err(|e| warn!("authenticated message is unparsable: {}", e))?;
                if message.header.message_type.is_handshake() {
                    debug!("sealed handshake message - dropping");
                    return Ok(vec![]);
                }
                self.on_message(message).await
            }
        }
    }

    async fn on_handshake_message(&mut self, message: Message) -> anyhow::Result<()> {
        if !self.config.encryption_enabled || !self.is_server {
            debug!("unexpected {:?} - ignoring", message.header.message_type);
            return Ok(());
        }
        if message.header.message_type != MessageType::RequestPubKey || message.backlog.len() != 1 {
            debug!("unexpected {:?} - ignoring", message.header.message_type);
            return Ok(());
        }
        if !self.is_acceptable(&message) {
            return Ok(());
        }

        let peer_public_key = message.backlog[0].payload.clone();
        if self.peer_public_key.as_ref() == Some(&peer_public_key) {
            debug!("repeated key exchange request - re-sending reply");
            self.send_public_key(MessageType::SendPubKey).await?;
            Ok(())
        }
        else {
            info!("key exchange request with a new key - restarting the session");
            self.start_server_session(peer_public_key).await
        }
    }

    async fn on_message(&mut self, message: Message) -> anyhow::Result<Vec<Bytes>> {
        if !self.is_acceptable(&message) {
            return Ok(vec![]);
        }

        let outcome = self.engine.mark_received(&message);

        match message.header.message_type {
            MessageType::Ack => {
                let last_acked_sequence = message.header.last_acked_sequence;
                self.event_sink.on_event(ProtocolEvent::AckReceived { last_acked_sequence });

                if outcome.newly_acked.contains(&last_acked_sequence) {
                    if let Some(datum) = self.engine.sent_datum(last_acked_sequence) {
                        let sample = Instant::now() - datum.send_time;
                        self.rtt.add_value(sample.as_nanos() as f64);
                        if let Some(average) = self.rtt() {
                            self.event_sink.on_event(ProtocolEvent::RttCalculated { sample, average });
                        }
                    }
                }
                Ok(vec![])
            }
            MessageType::General => {
                let payloads = outcome.fresh.into_iter()
                    .map(|datum| {
                        self.event_sink.on_event(ProtocolEvent::PacketReceived { sequence: datum.sequence, payload_len: datum.payload.len() });
                        datum.payload
                    })
                    .collect();
                self.send_ack(&message).await?;
                Ok(payloads)
            }
            MessageType::RequestPubKey | MessageType::SendPubKey => Ok(vec![]),
        }
    }
}
