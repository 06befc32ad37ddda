use anyhow::bail;
use bytes::{BufMut, BytesMut};
use crate::security::{NONCE_LEN, TAG_LEN};

/// The outermost layer of every datagram:
///
/// ```ascii
///  0: envelope kind (u8): 0 plaintext, 1 sealed
///  plaintext:
///   1: encoded message
///  sealed:
///   1: nonce (12 bytes)
///  13: AES-GCM encrypted message, including the 16 byte tag
/// ```
#[derive(Debug, PartialEq, Eq)]
pub enum Envelope<'a> {
    Plaintext(&'a [u8]),
    Sealed {
        nonce: [u8; NONCE_LEN],
        ciphertext: &'a [u8],
    },
}

impl <'a> Envelope<'a> {
    pub const KIND_PLAINTEXT: u8 = 0;
    pub const KIND_SEALED: u8 = 1;

    pub fn ser(&self, buf: &mut BytesMut) {
        match self {
            Envelope::Plaintext(message) => {
                buf.put_u8(Self::KIND_PLAINTEXT);
                buf.put_slice(message);
            }
            Envelope::Sealed { nonce, ciphertext } => {
                buf.put_u8(Self::KIND_SEALED);
                buf.put_slice(nonce);
                buf.put_slice(ciphertext);
            }
        }
    }

    pub fn deser(buf: &'a [u8]) -> anyhow::Result<Envelope<'a>> {
        let Some((&kind, rest)) = buf.split_first() else {
            bail!("empty packet");
        };

        match kind {
            Self::KIND_PLAINTEXT => Ok(Envelope::Plaintext(rest)),
            Self::KIND_SEALED => {
                if rest.len() < NONCE_LEN + TAG_LEN {
                    bail!("sealed packet of {} bytes is too short", buf.len());
                }
                let mut nonce = [0u8; NONCE_LEN];
                nonce.copy_from_slice(&rest[..NONCE_LEN]);
                Ok(Envelope::Sealed {
                    nonce,
                    ciphertext: &rest[NONCE_LEN..],
                })
            }
            other => bail!("unknown envelope kind {}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::plaintext(Envelope::Plaintext(b"abc"), vec![0, b'a', b'b', b'c'])]
    #[case::plaintext_empty(Envelope::Plaintext(b""), vec![0])]
    #[case::sealed(Envelope::Sealed { nonce: [9; NONCE_LEN], ciphertext: &[7; TAG_LEN + 1] },
        [vec![1], vec![9; NONCE_LEN], vec![7; TAG_LEN + 1]].concat())]
    fn test_ser(#[case] envelope: Envelope, #[case] expected: Vec<u8>) {
        let mut buf = BytesMut::new();
        envelope.ser(&mut buf);
        assert_eq!(buf.as_ref(), expected.as_slice());
        assert_eq!(Envelope::deser(&expected).unwrap(), envelope);
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::unknown_kind(vec![2, 1, 2, 3])]
    #[case::sealed_too_short(vec![1; NONCE_LEN + TAG_LEN])]
    fn test_deser_invalid(#[case] buf: Vec<u8>) {
        assert!(Envelope::deser(&buf).is_err());
    }
}
