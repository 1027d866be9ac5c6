//! Codec pipeline (C1), AES-256-CBC encryption codec (C2) and DEFLATE
//! compression codec (C3).

pub mod codec;
pub mod compression;
pub mod crypto;

pub use codec::{Codec, CompositeCodec};
pub use compression::DeflateCodec;
pub use crypto::{AesCbcCodec, KeyPack, IV_SIZE, KEY_PACK_SIZE, KEY_SIZE};
