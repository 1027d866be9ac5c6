use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use ipc_support::error::{IpcError, IpcResult};
use rand::RngCore;

use crate::codec::Codec;

pub const KEY_SIZE: usize = 32;
pub const IV_SIZE: usize = 16;

/// 48-byte wire form of a `(key, iv)` pair, used only by the bootstrap
/// handshake's legacy key pack: `Key(32) ‖ IV(16)`.
pub const KEY_PACK_SIZE: usize = KEY_SIZE + IV_SIZE;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Fills `out` with cryptographically secure random bytes.
pub fn random_bytes(out: &mut [u8]) {
    rand::rngs::OsRng.fill_bytes(out);
}

fn random_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    random_bytes(&mut key);
    key
}

fn random_iv() -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    random_bytes(&mut iv);
    iv
}

/// The 48-byte `Key ‖ IV` pack exchanged during bootstrap (§6).
#[derive(Clone, Copy)]
pub struct KeyPack {
    pub key: [u8; KEY_SIZE],
    pub iv: [u8; IV_SIZE],
}

impl KeyPack {
    pub fn to_bytes(&self) -> [u8; KEY_PACK_SIZE] {
        let mut out = [0u8; KEY_PACK_SIZE];
        out[..KEY_SIZE].copy_from_slice(&self.key);
        out[KEY_SIZE..].copy_from_slice(&self.iv);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> IpcResult<Self> {
        if bytes.len() != KEY_PACK_SIZE {
            return Err(IpcError::protocol(format!(
                "key pack must be {KEY_PACK_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        let mut iv = [0u8; IV_SIZE];
        key.copy_from_slice(&bytes[..KEY_SIZE]);
        iv.copy_from_slice(&bytes[KEY_SIZE..]);
        Ok(KeyPack { key, iv })
    }
}

/// AES-256-CBC codec with PKCS#7 padding and per-message IV rotation.
///
/// `encode` encrypts under the current IV, prepends it to the ciphertext,
/// then immediately regenerates a fresh IV so no two messages are ever
/// encrypted under the same `(key, iv)` pair (the legacy fixed-IV path
/// described in the distilled spec's open question is deliberately not
/// implemented; see DESIGN.md decision D1).
pub struct AesCbcCodec {
    key: [u8; KEY_SIZE],
    iv: [u8; IV_SIZE],
}

impl AesCbcCodec {
    /// Generates a fresh random key and IV.
    pub fn new() -> Self {
        AesCbcCodec {
            key: random_key(),
            iv: random_iv(),
        }
    }

    /// Adopts an existing key, generating a fresh IV (used when the
    /// combined channel constructs a codec from a received key pack).
    pub fn with_key(key: [u8; KEY_SIZE]) -> Self {
        AesCbcCodec { key, iv: random_iv() }
    }

    /// Reconstructs a codec from a received key pack, seeding the first
    /// `encode`'s IV with the transported value (D1): after that first
    /// call the codec rotates past it like any other message.
    pub fn from_key_pack(pack: &KeyPack) -> Self {
        AesCbcCodec {
            key: pack.key,
            iv: pack.iv,
        }
    }

    pub fn get_key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn set_key(&mut self, key: [u8; KEY_SIZE]) {
        self.key = key;
    }

    pub fn key_pack(&self) -> KeyPack {
        KeyPack {
            key: self.key,
            iv: self.iv,
        }
    }
}

impl Default for AesCbcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for AesCbcCodec {
    fn encode(&mut self, data: &[u8]) -> IpcResult<Vec<u8>> {
        if data.is_empty() {
            return Err(IpcError::codec("cannot encrypt empty input"));
        }

        let iv = self.iv;
        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(data);

        let mut out = Vec::with_capacity(IV_SIZE + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);

        // Never reuse an IV.
        self.iv = random_iv();

        Ok(out)
    }

    fn decode(&mut self, data: &[u8]) -> IpcResult<Vec<u8>> {
        if data.len() < IV_SIZE + 1 {
            return Err(IpcError::codec("ciphertext shorter than IV"));
        }

        let (iv, ciphertext) = data.split_at(IV_SIZE);
        let mut iv_arr = [0u8; IV_SIZE];
        iv_arr.copy_from_slice(iv);

        Aes256CbcDec::new(&self.key.into(), &iv_arr.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| IpcError::codec("AES padding mismatch"))
    }
}
