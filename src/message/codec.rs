use super::{pb, Message};
use crate::error::{BitswapError, Result};
use bytes::{Buf, BufMut, BytesMut};
use prost::Message as _;
use tokio_util::codec::{Decoder, Encoder};

/// Length-delimited protobuf framing for Bitswap messages.
///
/// Format: <unsigned varint body length><protobuf body>
///
/// Decoded items carry the full frame length (prefix included) so callers can
/// account received bytes.
#[derive(Debug, Clone, Copy)]
pub struct BitswapCodec {
    max_message_size: usize,
}

impl BitswapCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.max_message_size {
            return Err(BitswapError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }
}

impl Default for BitswapCodec {
    fn default() -> Self {
        Self::new(crate::MAX_MESSAGE_SIZE)
    }
}

impl Decoder for BitswapCodec {
    type Item = (Message, usize);
    type Error = BitswapError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let (length, prefix_len) = match unsigned_varint::decode::usize(src) {
            Ok((length, rest)) => (length, src.len() - rest.len()),
            Err(unsigned_varint::decode::Error::Insufficient) => return Ok(None),
            Err(e) => {
                return Err(BitswapError::ProtocolError(format!(
                    "Invalid length prefix: {}",
                    e
                )))
            }
        };

        // Reject before buffering the body
        self.check_size(length)?;

        let frame_len = prefix_len + length;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(prefix_len);
        let body = src.split_to(length).freeze();

        let proto = pb::Message::decode(body)?;
        let message = Message::try_from(proto)?;

        Ok(Some((message, frame_len)))
    }
}

impl Encoder<Message> for BitswapCodec {
    type Error = BitswapError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let proto = pb::Message::from(&item);
        let length = proto.encoded_len();
        self.check_size(length)?;

        let mut prefix = unsigned_varint::encode::usize_buffer();
        let prefix = unsigned_varint::encode::usize(length, &mut prefix);

        dst.reserve(prefix.len() + length);
        dst.put_slice(prefix);
        proto
            .encode(dst)
            .map_err(|e| BitswapError::ProtocolError(format!("Encode failed: {}", e)))?;

        Ok(())
    }
}
