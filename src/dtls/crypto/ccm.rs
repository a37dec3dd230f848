//! AES-128-CCM with an 8 byte tag, as used by the record layer.

use aes::Aes128;
use ccm::aead::consts::{U12, U8};
use ccm::aead::generic_array::GenericArray;
use ccm::aead::{AeadInPlace, KeyInit};
use ccm::Ccm;

use crate::dtls::record::{ContentType, ProtocolVersion, Sequence};
use crate::Error;

type Aes128Ccm8 = Ccm<Aes128, U8, U12>;

/// Explicit nonce carried in front of each encrypted record.
pub const EXPLICIT_NONCE_LEN: usize = 8;

pub const TAG_LEN: usize = 8;

/// Bytes an encrypted record adds to its plaintext.
pub const OVERHEAD: usize = EXPLICIT_NONCE_LEN + TAG_LEN;

/// Implicit part of the nonce, from the key block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iv(pub [u8; 4]);

/// `write_IV(4) ‖ epoch(2) ‖ seq(6)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce(pub [u8; 12]);

impl Nonce {
    pub fn new(iv: Iv, explicit: &[u8; EXPLICIT_NONCE_LEN]) -> Self {
        let mut nonce = [0u8; 12];
        nonce[..4].copy_from_slice(&iv.0);
        nonce[4..].copy_from_slice(explicit);
        Nonce(nonce)
    }
}

/// `epoch ‖ seq(8) ‖ type(1) ‖ version(2) ‖ length(2)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aad(pub [u8; 13]);

impl Aad {
    pub fn new(content_type: ContentType, sequence: Sequence, plaintext_len: u16) -> Self {
        let mut aad = [0u8; 13];
        aad[..8].copy_from_slice(&sequence.to_bytes());
        aad[8] = content_type.as_u8();
        aad[9..11].copy_from_slice(&ProtocolVersion::DTLS1_2.as_u16().to_be_bytes());
        aad[11..].copy_from_slice(&plaintext_len.to_be_bytes());
        Aad(aad)
    }
}

/// One direction's cipher state.
pub struct Cipher {
    aead: Aes128Ccm8,
    iv: Iv,
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

impl Cipher {
    pub fn new(key: &[u8; 16], iv: [u8; 4]) -> Result<Self, Error> {
        let aead = Aes128Ccm8::new_from_slice(key).map_err(|_| Error::BadParameter("aes key"))?;
        Ok(Cipher { aead, iv: Iv(iv) })
    }

    /// Encrypt `plaintext` into a record fragment:
    /// `explicit_nonce ‖ ciphertext ‖ tag`.
    pub fn seal(&self, content_type: ContentType, sequence: Sequence, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let explicit = sequence.to_bytes();
        let nonce = Nonce::new(self.iv, &explicit);
        let aad = Aad::new(content_type, sequence, plaintext.len() as u16);

        let mut out = Vec::with_capacity(OVERHEAD + plaintext.len());
        out.extend_from_slice(&explicit);
        out.extend_from_slice(plaintext);
        let tag = self
            .aead
            .encrypt_in_place_detached(
                GenericArray::from_slice(&nonce.0),
                &aad.0,
                &mut out[EXPLICIT_NONCE_LEN..],
            )
            .map_err(|_| Error::Parse("encrypt"))?;
        out.extend_from_slice(&tag);
        Ok(out)
    }

    /// Decrypt a record fragment. Fails on short input or a bad tag.
    pub fn open(&self, content_type: ContentType, sequence: Sequence, fragment: &[u8]) -> Result<Vec<u8>, Error> {
        let Some(plaintext_len) = fragment.len().checked_sub(OVERHEAD) else {
            return Err(Error::Parse("short record"));
        };
        let mut explicit = [0u8; EXPLICIT_NONCE_LEN];
        explicit.copy_from_slice(&fragment[..EXPLICIT_NONCE_LEN]);
        let nonce = Nonce::new(self.iv, &explicit);
        let aad = Aad::new(content_type, sequence, plaintext_len as u16);

        let (body, tag) = fragment[EXPLICIT_NONCE_LEN..].split_at(plaintext_len);
        let mut plaintext = body.to_vec();
        self.aead
            .decrypt_in_place_detached(
                GenericArray::from_slice(&nonce.0),
                &aad.0,
                &mut plaintext,
                GenericArray::from_slice(tag),
            )
            .map_err(|_| Error::Parse("bad record mac"))?;
        Ok(plaintext)
    }
}
