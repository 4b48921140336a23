//! See [`Header`].

use crate::error::DatagramError;
use bytes::{Buf, BufMut};

/// Wire tag identifying which channel/ack pairing a datagram belongs to.
///
/// Assigned as the first byte of every [`Header`], matching the original
/// protocol's tag values so a reader familiar with the format recognizes the
/// numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChannelType {
    /// Unreliable, unordered delivery. No ACKs, no retransmission.
    Unreliable = 1,
    /// Reliable, unordered delivery. Data-bearing.
    Reliable = 2,
    /// Acknowledgment of a [`ChannelType::Reliable`] datagram.
    ReliableAck = 3,
    /// Reliable, ordered delivery. Data-bearing.
    Ordered = 4,
    /// Acknowledgment of a [`ChannelType::Ordered`] datagram.
    OrderedAck = 5,
    /// Initial handshake datagram, treated as a reliable one-shot.
    Discovery = 6,
}

impl ChannelType {
    /// Recovers a [`ChannelType`] from its wire tag byte.
    pub fn from_tag(tag: u8) -> Result<Self, DatagramError> {
        match tag {
            1 => Ok(Self::Unreliable),
            2 => Ok(Self::Reliable),
            3 => Ok(Self::ReliableAck),
            4 => Ok(Self::Ordered),
            5 => Ok(Self::OrderedAck),
            6 => Ok(Self::Discovery),
            other => Err(DatagramError::UnknownPacketType(other)),
        }
    }

    /// Wire tag byte for this variant.
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// `true` for the data-bearing variants (`Unreliable`, `Reliable`,
    /// `Ordered`, `Discovery`); `false` for the two ack variants.
    #[must_use]
    pub const fn is_data_bearing(self) -> bool {
        !matches!(self, Self::ReliableAck | Self::OrderedAck)
    }
}

/// Sequence id assigned by a channel to an outbound packet.
///
/// Widened to 64 bits relative to the original 32-bit counter (see
/// `DESIGN.md`'s resolution of the sequence-id-width open question): no
/// wraparound handling is needed at any sustained send rate, so ordering is
/// plain integer comparison rather than modular arithmetic.
pub type SeqId = u64;

/// Sender-relative monotonic microsecond timestamp, echoed verbatim in the
/// matching ACK to drive RTT estimation.
pub type Timestamp = u64;

/// Fixed-layout header prefixed to every datagram's payload, before
/// compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Which channel/ack pairing this datagram belongs to.
    pub channel_type: ChannelType,
    /// Application-assigned operation id; meaningful only for data-bearing
    /// types.
    pub channel_id: u16,
    /// Monotonic sequence id within (peer, channel).
    pub seq: SeqId,
    /// Sender's monotonic timestamp at creation, echoed back in the ACK.
    pub timestamp: Timestamp,
}

/// Byte length of the fixed header: 1 (tag) + 2 (channel id) + 8 (seq) + 8
/// (timestamp).
pub const HEADER_LEN: usize = 1 + 2 + 8 + 8;

impl Header {
    /// Encodes this header's fields into `dst`, little-endian, with no
    /// padding.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.channel_type.tag());
        dst.put_u16_le(self.channel_id);
        dst.put_u64_le(self.seq);
        dst.put_u64_le(self.timestamp);
    }

    /// Parses a header from the front of `src`, advancing it past the
    /// header bytes on success.
    pub fn decode(src: &mut impl Buf) -> Result<Self, DatagramError> {
        if src.remaining() < HEADER_LEN {
            return Err(DatagramError::TooShort);
        }
        let channel_type = ChannelType::from_tag(src.get_u8())?;
        let channel_id = src.get_u16_le();
        let seq = src.get_u64_le();
        let timestamp = src.get_u64_le();
        Ok(Self {
            channel_type,
            channel_id,
            seq,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ChannelType, Header, HEADER_LEN};
    use bytes::BytesMut;

    #[test]
    fn round_trips() {
        let header = Header {
            channel_type: ChannelType::Ordered,
            channel_id: 42,
            seq: 123_456_789,
            timestamp: 987_654_321,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(HEADER_LEN, buf.len());

        let mut cursor = buf.freeze();
        let decoded = Header::decode(&mut cursor).expect("decode");
        assert_eq!(header, decoded);
    }

    #[test]
    fn rejects_short_input() {
        let mut buf = bytes::Bytes::from_static(&[1, 2, 3]);
        assert!(Header::decode(&mut buf).is_err());
    }

    #[test]
    fn rejects_unknown_tag() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[99u8]);
        buf.resize(HEADER_LEN, 0);
        let mut frozen = buf.freeze();
        assert!(Header::decode(&mut frozen).is_err());
    }
}
