//! Packet framing
//!
//! Every packet travels in one frame:
//!
//! ```text
//! DLE id size payload... checksum DLE ETX
//! ```
//!
//! - `DLE` (0x10) opens and, followed by `ETX` (0x03), closes the frame
//! - `size` is the payload length in bytes
//! - any literal `DLE` in size, payload or checksum is sent twice
//! - `checksum` is the two's complement of `id + size + Σpayload`, so the
//!   byte sum of id, size, payload and checksum is zero modulo 256
//!
//! [`FrameDecoder`] is a byte-at-a-time state machine. It never blocks and
//! never fails: a malformed frame is reported as [`DecodeEvent::Corrupt`]
//! carrying the frame id so the caller can answer with a NAK.

use crate::error::ParseError;

/// Frame delimiter / escape byte
pub const DLE: u8 = 0x10;
/// Frame terminator (after DLE)
pub const ETX: u8 = 0x03;
/// Acknowledge packet id
pub const PID_ACK: u8 = 6;
/// Negative-acknowledge packet id
pub const PID_NAK: u8 = 21;
/// Capability (protocol array) packet id
pub const PID_PROTOCOL_ARRAY: u8 = 253;
/// Product request packet id
pub const PID_PRODUCT_REQUEST: u8 = 254;
/// Product data packet id
pub const PID_PRODUCT_DATA: u8 = 255;

/// Largest payload a size byte can announce
pub const MAX_PAYLOAD: usize = 255;

/// A single protocol packet
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Packet {
    /// Packet id
    pub id: u8,
    /// Payload bytes (at most 255)
    pub payload: Vec<u8>,
}

impl Packet {
    /// Create a packet
    pub fn new(id: u8, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    /// Create a packet without payload
    pub fn empty(id: u8) -> Self {
        Self::new(id, Vec::new())
    }

    /// Acknowledge `id`
    pub fn ack(id: u8) -> Self {
        Self::new(PID_ACK, vec![id])
    }

    /// Reject `id`
    pub fn nak(id: u8) -> Self {
        Self::new(PID_NAK, vec![id])
    }

    /// Whether this is an ACK or NAK
    pub fn is_handshake(&self) -> bool {
        self.id == PID_ACK || self.id == PID_NAK
    }

    /// The packet id an ACK/NAK refers to
    pub fn handshake_target(&self) -> Option<u8> {
        if self.is_handshake() {
            self.payload.first().copied()
        } else {
            None
        }
    }

    /// Checksum byte for this packet
    pub fn checksum(&self) -> u8 {
        checksum(self.id, &self.payload)
    }

    /// Encode to a complete, stuffed frame
    ///
    /// Fails when the payload does not fit the size byte.
    pub fn encode(&self) -> Result<Vec<u8>, ParseError> {
        let size = u8::try_from(self.payload.len()).map_err(|_| ParseError::PayloadTooLarge {
            id: self.id,
            len: self.payload.len(),
        })?;
        let mut frame = Vec::with_capacity(self.payload.len() + 8);

        frame.push(DLE);
        frame.push(self.id);
        push_stuffed(&mut frame, size);
        for &b in &self.payload {
            push_stuffed(&mut frame, b);
        }
        push_stuffed(&mut frame, checksum(self.id, &self.payload));
        frame.push(DLE);
        frame.push(ETX);
        Ok(frame)
    }

    /// Decode exactly one frame, for callers that already hold a whole frame
    pub fn decode(frame: &[u8]) -> Result<Packet, ParseError> {
        let mut decoder = FrameDecoder::new();
        for &b in frame {
            match decoder.push_byte(b) {
                Some(DecodeEvent::Packet(packet)) => return Ok(packet),
                Some(DecodeEvent::Corrupt { id, reason }) => {
                    return Err(ParseError::InvalidFrame { id, reason })
                }
                None => {}
            }
        }
        Err(ParseError::InvalidFrame {
            id: decoder.current_id().unwrap_or(0),
            reason: "truncated frame".into(),
        })
    }
}

fn push_stuffed(frame: &mut Vec<u8>, b: u8) {
    frame.push(b);
    if b == DLE {
        frame.push(DLE);
    }
}

/// Two's complement of the byte sum of id, size and payload
pub fn checksum(id: u8, payload: &[u8]) -> u8 {
    let sum = payload
        .iter()
        .fold(id.wrapping_add(payload.len() as u8), |acc, &b| {
            acc.wrapping_add(b)
        });
    sum.wrapping_neg()
}

/// Outcome of feeding bytes to a [`FrameDecoder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    /// A valid packet
    Packet(Packet),
    /// A malformed frame; `id` is the frame's packet id
    Corrupt { id: u8, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Looking for an opening DLE
    Hunt,
    /// Saw DLE, next byte is the id unless it is DLE or ETX
    Start,
    Size,
    SizeEscape,
    Payload,
    PayloadEscape,
    Checksum,
    ChecksumEscape,
    TrailerDle,
    TrailerEtx,
}

/// Streaming frame decoder
#[derive(Debug)]
pub struct FrameDecoder {
    state: State,
    id: u8,
    size: usize,
    payload: Vec<u8>,
    checksum: u8,
    raw: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Hunt,
            id: 0,
            size: 0,
            payload: Vec::with_capacity(MAX_PAYLOAD),
            checksum: 0,
            raw: Vec::with_capacity(MAX_PAYLOAD + 8),
        }
    }

    /// Whether a frame has been started but not finished
    pub fn in_frame(&self) -> bool {
        !matches!(self.state, State::Hunt | State::Start)
    }

    /// Id of the frame currently being read
    pub fn current_id(&self) -> Option<u8> {
        self.in_frame().then_some(self.id)
    }

    /// Raw bytes of the frame read so far (or just completed)
    pub fn raw_frame(&self) -> &[u8] {
        &self.raw
    }

    /// Drop any partial frame
    pub fn reset(&mut self) {
        self.state = State::Hunt;
        self.payload.clear();
        self.raw.clear();
    }

    /// Feed bytes, collecting every completed frame outcome
    pub fn push_bytes(&mut self, data: &[u8]) -> Vec<DecodeEvent> {
        data.iter().filter_map(|&b| self.push_byte(b)).collect()
    }

    /// Feed one byte
    pub fn push_byte(&mut self, b: u8) -> Option<DecodeEvent> {
        match self.state {
            State::Hunt => {
                if b == DLE {
                    self.raw.clear();
                    self.raw.push(b);
                    self.state = State::Start;
                }
                None
            }
            State::Start => {
                if b == DLE || b == ETX {
                    // Tail of an earlier damaged frame, or a doubled DLE
                    self.raw.clear();
                    self.state = State::Hunt;
                    return None;
                }
                self.raw.push(b);
                self.id = b;
                self.payload.clear();
                self.state = State::Size;
                None
            }
            State::Size => {
                self.raw.push(b);
                if b == DLE {
                    self.state = State::SizeEscape;
                    None
                } else {
                    self.begin_payload(b)
                }
            }
            State::SizeEscape => {
                self.raw.push(b);
                if b != DLE {
                    return Some(self.corrupt("unescaped DLE in size"));
                }
                self.begin_payload(DLE)
            }
            State::Payload => {
                self.raw.push(b);
                if b == DLE {
                    self.state = State::PayloadEscape;
                    None
                } else {
                    self.payload_byte(b);
                    None
                }
            }
            State::PayloadEscape => {
                self.raw.push(b);
                if b != DLE {
                    return Some(self.corrupt("unescaped DLE in payload"));
                }
                self.state = State::Payload;
                self.payload_byte(DLE);
                None
            }
            State::Checksum => {
                self.raw.push(b);
                if b == DLE {
                    self.state = State::ChecksumEscape;
                } else {
                    self.checksum = b;
                    self.state = State::TrailerDle;
                }
                None
            }
            State::ChecksumEscape => {
                self.raw.push(b);
                if b != DLE {
                    return Some(self.corrupt("unescaped DLE in checksum"));
                }
                self.checksum = DLE;
                self.state = State::TrailerDle;
                None
            }
            State::TrailerDle => {
                self.raw.push(b);
                if b != DLE {
                    return Some(self.corrupt("missing DLE before ETX"));
                }
                self.state = State::TrailerEtx;
                None
            }
            State::TrailerEtx => {
                self.raw.push(b);
                if b != ETX {
                    return Some(self.corrupt("missing ETX"));
                }
                Some(self.finish())
            }
        }
    }

    fn begin_payload(&mut self, size: u8) -> Option<DecodeEvent> {
        self.size = usize::from(size);
        self.state = if self.size == 0 {
            State::Checksum
        } else {
            State::Payload
        };
        None
    }

    fn payload_byte(&mut self, b: u8) {
        self.payload.push(b);
        if self.payload.len() == self.size {
            self.state = State::Checksum;
        }
    }

    fn corrupt(&mut self, reason: &str) -> DecodeEvent {
        self.state = State::Hunt;
        DecodeEvent::Corrupt {
            id: self.id,
            reason: reason.to_string(),
        }
    }

    fn finish(&mut self) -> DecodeEvent {
        self.state = State::Hunt;
        let expected = checksum(self.id, &self.payload);
        if expected != self.checksum {
            return DecodeEvent::Corrupt {
                id: self.id,
                reason: ParseError::ChecksumMismatch {
                    expected,
                    actual: self.checksum,
                }
                .to_string(),
            };
        }
        DecodeEvent::Packet(Packet::new(self.id, std::mem::take(&mut self.payload)))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn byte_sum(frame_packet: &Packet) -> u8 {
        frame_packet
            .payload
            .iter()
            .fold(
                frame_packet
                    .id
                    .wrapping_add(frame_packet.payload.len() as u8),
                |acc, &b| acc.wrapping_add(b),
            )
            .wrapping_add(frame_packet.checksum())
    }

    #[test]
    fn test_encode_product_request() {
        let frame = Packet::empty(PID_PRODUCT_REQUEST).encode().unwrap();
        assert_eq!(frame, vec![DLE, 0xFE, 0x00, 0x02, DLE, ETX]);
    }

    #[test]
    fn test_encode_stuffs_dle() {
        // Size 16 and a payload byte 16 are both doubled
        let packet = Packet::new(0x0A, vec![DLE; 16]);
        let frame = packet.encode().unwrap();
        assert_eq!(&frame[..4], &[DLE, 0x0A, DLE, DLE]);
        assert_eq!(frame.len(), 2 + 2 + 32 + 1 + 2);
        assert_eq!(Packet::decode(&frame).unwrap(), packet);
    }

    #[test]
    fn test_streaming_decode_partial() {
        let frame = Packet::new(35, vec![1, 2, 3]).encode().unwrap();
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push_bytes(&frame[..3]).is_empty());
        assert!(decoder.in_frame());
        assert_eq!(decoder.current_id(), Some(35));

        let events = decoder.push_bytes(&frame[3..]);
        assert_eq!(events, vec![DecodeEvent::Packet(Packet::new(35, vec![1, 2, 3]))]);
        assert!(!decoder.in_frame());
        assert_eq!(decoder.raw_frame(), frame.as_slice());
    }

    #[test]
    fn test_skips_stray_framing_noise() {
        let mut data = vec![DLE, ETX, 0x55, DLE, DLE];
        data.extend(Packet::ack(35).encode().unwrap());
        let mut decoder = FrameDecoder::new();
        let events = decoder.push_bytes(&data);
        assert_eq!(events, vec![DecodeEvent::Packet(Packet::ack(35))]);
    }

    #[test]
    fn test_bad_checksum_is_corrupt() {
        let mut frame = Packet::new(35, vec![1, 2, 3]).encode().unwrap();
        let cs = frame.len() - 3;
        frame[cs] = frame[cs].wrapping_add(1);
        let mut decoder = FrameDecoder::new();
        match decoder.push_bytes(&frame).as_slice() {
            [DecodeEvent::Corrupt { id, .. }] => assert_eq!(*id, 35),
            other => panic!("expected corrupt frame, got {:?}", other),
        }
    }

    #[test]
    fn test_unescaped_dle_in_payload_is_corrupt() {
        let data = [DLE, 51, 2, 7, DLE, 9, 0, DLE, ETX];
        let mut decoder = FrameDecoder::new();
        let events = decoder.push_bytes(&data);
        assert!(matches!(
            events.first(),
            Some(DecodeEvent::Corrupt { id: 51, .. })
        ));
    }

    #[test]
    fn test_missing_trailer_is_corrupt_then_recovers() {
        let mut good = Packet::new(12, vec![7, 0]).encode().unwrap();
        let mut data = good.clone();
        let last = data.len() - 1;
        data[last] = 0x42;
        data.append(&mut good);

        let mut decoder = FrameDecoder::new();
        let events = decoder.push_bytes(&data);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], DecodeEvent::Corrupt { id: 12, .. }));
        assert_eq!(events[1], DecodeEvent::Packet(Packet::new(12, vec![7, 0])));
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let packet = Packet::new(35, vec![0x20; MAX_PAYLOAD + 1]);
        assert_eq!(
            packet.encode(),
            Err(ParseError::PayloadTooLarge { id: 35, len: 256 })
        );
        assert!(Packet::new(35, vec![0x20; MAX_PAYLOAD]).encode().is_ok());
    }

    #[test]
    fn test_handshake_target() {
        assert_eq!(Packet::ack(35).handshake_target(), Some(35));
        assert_eq!(Packet::new(PID_NAK, vec![12, 0]).handshake_target(), Some(12));
        assert_eq!(Packet::new(35, vec![1]).handshake_target(), None);
    }

    proptest! {
        #[test]
        fn prop_checksum_sums_to_zero(id in any::<u8>(), payload in proptest::collection::vec(any::<u8>(), 0..255)) {
            let packet = Packet::new(id, payload);
            prop_assert_eq!(byte_sum(&packet), 0);
        }

        #[test]
        fn prop_escaping_roundtrip(
            id in any::<u8>().prop_filter("framing bytes", |b| *b != DLE && *b != ETX),
            mut payload in proptest::collection::vec(any::<u8>(), 0..200),
            positions in proptest::collection::vec(any::<prop::sample::Index>(), 0..20),
        ) {
            for pos in positions {
                if !payload.is_empty() {
                    let i = pos.index(payload.len());
                    payload[i] = DLE;
                }
            }
            let packet = Packet::new(id, payload);
            let mut decoder = FrameDecoder::new();
            let events = decoder.push_bytes(&packet.encode().unwrap());
            prop_assert_eq!(events, vec![DecodeEvent::Packet(packet)]);
        }
    }
}
