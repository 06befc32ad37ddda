#[cfg(test)] use mockall::automock;
use aead::{Aead, Key, KeyInit, Nonce};
use aes_gcm::Aes256Gcm;
use anyhow::{anyhow, bail};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::trace;
use crate::error::RudpError;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// envelope kind byte + nonce + AES-GCM tag
pub const SEALED_ENVELOPE_OVERHEAD: usize = 1 + NONCE_LEN + TAG_LEN;

pub type SessionKey = [u8; KEY_LEN];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPair {
    pub public_key: Vec<u8>,
    pub secret_key: Vec<u8>,
}

/// One key per direction, so that the two peers never encrypt with the same key and nonce.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionKeys {
    /// for decrypting what the peer sends
    pub rx: SessionKey,
    /// for encrypting what this side sends
    pub tx: SessionKey,
}

/// The cryptographic primitives used by the handshake and for sealing packets.
#[cfg_attr(test, automock)]
pub trait Security: Send + Sync + 'static {
    fn generate_key_pair(&self) -> KeyPair;

    fn generate_client_transmission_keys(&self, own: &KeyPair, peer_public_key: &[u8]) -> anyhow::Result<SessionKeys>;

    fn generate_server_transmission_keys(&self, own: &KeyPair, peer_public_key: &[u8]) -> anyhow::Result<SessionKeys>;

    fn encrypt_with_session_key(&self, key: &SessionKey, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// fails with [RudpError::DecryptFailure] if the ciphertext was not produced with this key
    ///  and nonce
    fn decrypt_with_session_key(&self, key: &SessionKey, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> anyhow::Result<Vec<u8>>;
}

/// AES-256-GCM sealing with session keys derived from a secret that both peers know in advance.
///
/// NB: This is *not* a Diffie-Hellman exchange. The exchanged 'public keys' are random values
///  that make every session's keys unique, but all confidentiality rests on the pre-shared
///  secret: anybody who knows it and observes a handshake can derive that session's keys.
pub struct PresharedKeySecurity {
    pre_shared_key: Vec<u8>,
}

impl PresharedKeySecurity {
    const CLIENT_TO_SERVER: &'static [u8] = b"rudp client->server";
    const SERVER_TO_CLIENT: &'static [u8] = b"rudp server->client";

    pub fn new(pre_shared_key: &[u8]) -> anyhow::Result<PresharedKeySecurity> {
        if pre_shared_key.len() < 16 {
            bail!("pre-shared key must have at least 16 bytes");
        }
        Ok(PresharedKeySecurity {
            pre_shared_key: pre_shared_key.to_vec(),
        })
    }

    fn derive_key(&self, client_public_key: &[u8], server_public_key: &[u8], direction: &[u8]) -> SessionKey {
        let mut hasher = Sha256::new();
        hasher.update(&self.pre_shared_key);
        hasher.update(client_public_key);
        hasher.update(server_public_key);
        hasher.update(direction);
        hasher.finalize().into()
    }

    fn check_public_key(key: &[u8]) -> anyhow::Result<()> {
        if key.len() != KEY_LEN {
            return Err(RudpError::HandshakeFailure { reason: format!("public key has {} bytes, expected {}", key.len(), KEY_LEN) }.into());
        }
        Ok(())
    }
}

impl Security for PresharedKeySecurity {
    fn generate_key_pair(&self) -> KeyPair {
        let mut public_key = vec![0u8; KEY_LEN];
        OsRng.fill_bytes(&mut public_key);
        KeyPair {
            public_key,
            secret_key: vec![],
        }
    }

    fn generate_client_transmission_keys(&self, own: &KeyPair, peer_public_key: &[u8]) -> anyhow::Result<SessionKeys> {
        Self::check_public_key(peer_public_key)?;
        Ok(SessionKeys {
            rx: self.derive_key(&own.public_key, peer_public_key, Self::SERVER_TO_CLIENT),
            tx: self.derive_key(&own.public_key, peer_public_key, Self::CLIENT_TO_SERVER),
        })
    }

    fn generate_server_transmission_keys(&self, own: &KeyPair, peer_public_key: &[u8]) -> anyhow::Result<SessionKeys> {
        Self::check_public_key(peer_public_key)?;
        Ok(SessionKeys {
            rx: self.derive_key(peer_public_key, &own.public_key, Self::CLIENT_TO_SERVER),
            tx: self.derive_key(peer_public_key, &own.public_key, Self::SERVER_TO_CLIENT),
        })
    }

    fn encrypt_with_session_key(&self, key: &SessionKey, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        cipher.encrypt(Nonce::<Aes256Gcm>::from_slice(nonce), plaintext)
            .map_err(|_| anyhow!("error encrypting buffer"))
    }

    fn decrypt_with_session_key(&self, key: &SessionKey, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> anyhow::Result<Vec<u8>> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        match cipher.decrypt(Nonce::<Aes256Gcm>::from_slice(nonce), ciphertext) {
            Ok(plaintext) => Ok(plaintext),
            Err(_) => {
                trace!("decryption failed for {} bytes of ciphertext", ciphertext.len());
                Err(RudpError::DecryptFailure.into())
            }
        }
    }
}

/// Nonces for one session key: a random prefix that is fixed per sequence, followed by a
///  counter. A nonce is never repeated as long as the counter does not wrap.
pub struct NonceSequence {
    nonce_fixed: u32,
    nonce_incremented: u64,
}

impl NonceSequence {
    pub fn new() -> NonceSequence {
        NonceSequence {
            nonce_fixed: OsRng.next_u32(),
            nonce_incremented: OsRng.next_u64(),
        }
    }

    pub fn next_nonce(&mut self) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        nonce[..4].copy_from_slice(&self.nonce_fixed.to_be_bytes());
        nonce[4..].copy_from_slice(&self.nonce_incremented.to_be_bytes());
        self.nonce_incremented = self.nonce_incremented.wrapping_add(1);
        nonce
    }
}

impl Default for NonceSequence {
    fn default() -> Self {
        Self::new()
    }
}
