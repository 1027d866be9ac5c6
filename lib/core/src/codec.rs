use ipc_support::error::{IpcError, IpcResult};

/// A single transform in the send/receive pipeline.
///
/// `encode` runs on the send path, `decode` on the receive path.
/// Implementations must reject empty input to `encode`; `decode` of
/// `encode`'s output for the same non-empty input must always recover it.
pub trait Codec: Send {
    fn encode(&mut self, data: &[u8]) -> IpcResult<Vec<u8>>;
    fn decode(&mut self, data: &[u8]) -> IpcResult<Vec<u8>>;

    /// Dispatches to `encode` or `decode` based on `decode`.
    fn apply(&mut self, data: &[u8], decode: bool) -> IpcResult<Vec<u8>> {
        if decode {
            self.decode(data)
        } else {
            self.encode(data)
        }
    }
}

/// An ordered chain of codecs. `encode` applies them in order (first codec
/// in the list runs first on send, i.e. closest to the application
/// payload); `decode` applies them in reverse.
///
/// Mirrors `Channel`'s compose-then-write shape in the teacher, generalized
/// from a fixed compression+encryption pair to an arbitrary chain.
pub struct CompositeCodec {
    stages: Vec<Box<dyn Codec>>,
}

impl CompositeCodec {
    pub fn new(stages: Vec<Box<dyn Codec>>) -> Self {
        CompositeCodec { stages }
    }

    pub fn empty() -> Self {
        CompositeCodec { stages: Vec::new() }
    }

    pub fn push(&mut self, stage: Box<dyn Codec>) {
        self.stages.push(stage);
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl Codec for CompositeCodec {
    fn encode(&mut self, data: &[u8]) -> IpcResult<Vec<u8>> {
        if data.is_empty() {
            return Err(IpcError::codec("cannot encode empty input"));
        }
        let mut buf = data.to_vec();
        for stage in self.stages.iter_mut() {
            buf = stage.encode(&buf)?;
        }
        Ok(buf)
    }

    fn decode(&mut self, data: &[u8]) -> IpcResult<Vec<u8>> {
        if data.is_empty() {
            return Err(IpcError::codec("cannot decode empty input"));
        }
        let mut buf = data.to_vec();
        for stage in self.stages.iter_mut().rev() {
            buf = stage.decode(&buf)?;
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A trivial reversible codec used only to exercise ordering.
    struct Xor(u8);

    impl Codec for Xor {
        fn encode(&mut self, data: &[u8]) -> IpcResult<Vec<u8>> {
            if data.is_empty() {
                return Err(IpcError::codec("empty"));
            }
            Ok(data.iter().map(|b| b ^ self.0).collect())
        }

        fn decode(&mut self, data: &[u8]) -> IpcResult<Vec<u8>> {
            if data.is_empty() {
                return Err(IpcError::codec("empty"));
            }
            Ok(data.iter().map(|b| b ^ self.0).collect())
        }
    }

    /// A non-involutive codec (appends a tag on encode, strips it on
    /// decode) so ordering actually matters in the composite test below.
    struct Tag(u8);

    impl Codec for Tag {
        fn encode(&mut self, data: &[u8]) -> IpcResult<Vec<u8>> {
            if data.is_empty() {
                return Err(IpcError::codec("empty"));
            }
            let mut out = data.to_vec();
            out.push(self.0);
            Ok(out)
        }

        fn decode(&mut self, data: &[u8]) -> IpcResult<Vec<u8>> {
            if data.is_empty() || *data.last().unwrap() != self.0 {
                return Err(IpcError::codec("missing tag"));
            }
            Ok(data[..data.len() - 1].to_vec())
        }
    }

    #[test]
    fn empty_composite_is_identity() {
        let mut c = CompositeCodec::empty();
        assert_eq!(c.encode(b"hello").unwrap(), b"hello");
    }

    #[test]
    fn composite_round_trips() {
        let mut c = CompositeCodec::new(vec![Box::new(Xor(0x42)), Box::new(Tag(0xee))]);
        let encoded = c.encode(b"roundtrip").unwrap();
        assert_ne!(encoded, b"roundtrip");
        let decoded = c.decode(&encoded).unwrap();
        assert_eq!(decoded, b"roundtrip");
    }

    #[test]
    fn composite_applies_stages_in_order_on_encode_reverse_on_decode() {
        // Tag should be applied last on encode (outermost) and stripped
        // first on decode, or the trailing byte won't match.
        let mut c = CompositeCodec::new(vec![Box::new(Xor(0x11)), Box::new(Tag(0xaa))]);
        let encoded = c.encode(b"x").unwrap();
        assert_eq!(*encoded.last().unwrap(), 0xaa);
    }

    #[test]
    fn encode_rejects_empty_input() {
        let mut c = CompositeCodec::new(vec![Box::new(Xor(1))]);
        assert!(c.encode(&[]).is_err());
    }

    #[test]
    fn decode_rejects_empty_input() {
        let mut c = CompositeCodec::new(vec![Box::new(Xor(1))]);
        assert!(c.decode(&[]).is_err());
    }
}
