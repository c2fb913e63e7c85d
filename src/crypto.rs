use aes::cipher::{KeyIvInit, StreamCipher};
use aes::Aes128;

use crate::frame::FrameId;
use crate::CastError;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

const KEY_LEN: usize = 16;
const IV_LEN: usize = 16;

/// Frame payload encryption, AES-128 in counter mode.
///
/// Every frame is its own CTR stream: the nonce is the shared IV mask with
/// the frame id folded in, so packets can be decrypted as frames arrive,
/// in any order. Encrypt and decrypt are the same keystream XOR.
#[derive(Debug)]
pub struct TransportEncryptionHandler {
    key: Option<[u8; KEY_LEN]>,
    iv_mask: [u8; IV_LEN],
}

impl TransportEncryptionHandler {
    /// Passthrough handler for unencrypted streams.
    pub fn disabled() -> Self {
        TransportEncryptionHandler {
            key: None,
            iv_mask: [0; IV_LEN],
        }
    }

    pub fn new(key: &[u8], iv_mask: &[u8]) -> Result<Self, CastError> {
        let key: [u8; KEY_LEN] = key
            .try_into()
            .map_err(|_| CastError::InvalidConfiguration("aes key must be 16 bytes"))?;
        let iv_mask: [u8; IV_LEN] = iv_mask
            .try_into()
            .map_err(|_| CastError::InvalidConfiguration("iv mask must be 16 bytes"))?;

        Ok(TransportEncryptionHandler {
            key: Some(key),
            iv_mask,
        })
    }

    pub fn is_activated(&self) -> bool {
        self.key.is_some()
    }

    /// The per-frame nonce: the IV mask with the frame id XORed into bytes
    /// 8..12, big endian.
    fn nonce(&self, frame_id: FrameId) -> [u8; IV_LEN] {
        let mut nonce = self.iv_mask;
        for (b, id) in nonce[8..12].iter_mut().zip(frame_id.to_be_bytes()) {
            *b ^= id;
        }
        nonce
    }

    pub fn encrypt(&self, frame_id: FrameId, data: &[u8]) -> Vec<u8> {
        self.apply(frame_id, data)
    }

    pub fn decrypt(&self, frame_id: FrameId, data: &[u8]) -> Vec<u8> {
        self.apply(frame_id, data)
    }

    fn apply(&self, frame_id: FrameId, data: &[u8]) -> Vec<u8> {
        let Some(key) = &self.key else {
            return data.to_vec();
        };

        let nonce = self.nonce(frame_id);
        let mut cipher = Aes128Ctr::new(key.into(), (&nonce).into());

        let mut out = data.to_vec();
        cipher.apply_keystream(&mut out);
        out
    }
}
