//! MPCI Packet Format
//!
//! A packet is a fixed prefix of nine 32-bit words followed by an operation
//! payload:
//!
//! ```text
//! word  field
//! 0     byte_order    BYTE_ORDER_MARK as written by the sender
//! 1     class         PacketClass of the manager that handles it
//! 2     length        prefix + payload bytes
//! 3     to_convert    leading payload bytes that are 32-bit words
//! 4     id            object the operation targets
//! 5     source_tid    requesting thread, responses go back to it
//! 6     return_code   status of a response
//! 7     timeout       ticks the requester waits, 0 = forever (advisory)
//! 8     sequence      request number, echoed by the response
//! ```
//!
//! Words travel in the sender's byte order. The receiver compares the mark
//! with its own and, if it reads back swapped, swaps the prefix and the
//! first `to_convert` bytes of the payload. Anything after that is opaque
//! bytes and crosses unchanged. The payload always starts with the
//! operation code; 64-bit values are sent as (high, low) word pairs.

use static_assertions::{const_assert, const_assert_eq};
use tandem_objects::status::{Result, StatusCode};
use tandem_objects::ObjectId;
use thiserror::Error;

/// Written as the first word of every packet
pub const BYTE_ORDER_MARK: u32 = 0x1234_5678;

/// Number of words in the packet prefix
pub const PREFIX_WORDS: usize = 9;

/// Size of the packet prefix in bytes
pub const PREFIX_SIZE: usize = 36;

/// Largest packet the interconnect carries
pub const MAXIMUM_PACKET_SIZE: usize = 128;

/// Largest operation payload
pub const MAXIMUM_PAYLOAD: usize = MAXIMUM_PACKET_SIZE - PREFIX_SIZE;

const_assert_eq!(PREFIX_SIZE, PREFIX_WORDS * 4);
const_assert!(MAXIMUM_PAYLOAD % 4 == 0);

/// Manager a packet belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum PacketClass {
    /// Not yet written by a manager
    Internal = 0,
    Tasks = 1,
    Semaphore = 2,
    Partition = 3,
}

impl PacketClass {
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Internal),
            1 => Some(Self::Tasks),
            2 => Some(Self::Semaphore),
            3 => Some(Self::Partition),
            _ => None,
        }
    }
}

/// Malformed or unexpected packets
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    #[error("frame of {0} bytes is shorter than the packet prefix")]
    Truncated(usize),

    #[error("frame of {0} bytes exceeds the maximum packet size")]
    Oversized(usize),

    #[error("unrecognized byte order mark {0:#010x}")]
    BadByteOrder(u32),

    #[error("length field {length} disagrees with a frame of {frame} bytes")]
    LengthMismatch { length: u32, frame: usize },

    #[error("conversion count {0} is not a word multiple inside the payload")]
    BadConvertCount(u32),

    #[error("unknown packet class {0}")]
    UnknownClass(u32),

    #[error("unknown operation {code} for {class:?}")]
    UnknownOperation { class: PacketClass, code: u32 },

    #[error("payload ended early")]
    PayloadTooShort,

    #[error("payload does not fit in a packet")]
    PayloadTooLong,

    #[error("word written after raw payload bytes")]
    WordAfterRaw,

    #[error("no packet buffer to receive into")]
    PoolExhausted,
}

impl From<PacketError> for StatusCode {
    fn from(error: PacketError) -> Self {
        match error {
            PacketError::PoolExhausted => StatusCode::NoMemory,
            _ => StatusCode::InternalError,
        }
    }
}

/// Operation payload of one manager
///
/// Each manager implements this for its operation enum. The encoder writes
/// everything after the operation code; the decoder is handed the code and
/// reads the rest.
pub trait Operation: Sized {
    /// Packet class carrying this manager's operations
    const CLASS: PacketClass;

    /// Operation code written as the first payload word
    fn code(&self) -> u32;

    /// Write the operation arguments
    fn encode_payload(&self, writer: &mut PayloadWriter<'_>) -> core::result::Result<(), PacketError>;

    /// Rebuild an operation from its code and arguments
    fn decode(code: u32, reader: &mut PayloadReader<'_>) -> core::result::Result<Self, PacketError>;
}

/// Appends words, then raw bytes, to a payload
pub struct PayloadWriter<'a> {
    buffer: &'a mut [u8; MAXIMUM_PAYLOAD],
    len: usize,
    words_end: usize,
}

impl<'a> PayloadWriter<'a> {
    fn new(buffer: &'a mut [u8; MAXIMUM_PAYLOAD]) -> Self {
        Self { buffer, len: 0, words_end: 0 }
    }

    /// Append a 32-bit word
    pub fn word(&mut self, value: u32) -> core::result::Result<(), PacketError> {
        if self.len != self.words_end {
            return Err(PacketError::WordAfterRaw);
        }
        self.put(&value.to_ne_bytes())?;
        self.words_end = self.len;
        Ok(())
    }

    /// Append a 64-bit value as (high, low)
    pub fn word64(&mut self, value: u64) -> core::result::Result<(), PacketError> {
        self.word((value >> 32) as u32)?;
        self.word(value as u32)
    }

    /// Append opaque bytes; no word may follow
    pub fn bytes(&mut self, bytes: &[u8]) -> core::result::Result<(), PacketError> {
        self.put(bytes)
    }

    fn put(&mut self, bytes: &[u8]) -> core::result::Result<(), PacketError> {
        let end = self.len + bytes.len();
        if end > MAXIMUM_PAYLOAD {
            return Err(PacketError::PayloadTooLong);
        }
        self.buffer[self.len..end].copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }
}

/// Reads words, then raw bytes, from a payload
pub struct PayloadReader<'a> {
    payload: &'a [u8],
    words_end: usize,
    position: usize,
}

impl<'a> PayloadReader<'a> {
    /// Read the next 32-bit word
    pub fn word(&mut self) -> core::result::Result<u32, PacketError> {
        let end = self.position + 4;
        if end > self.words_end {
            return Err(PacketError::PayloadTooShort);
        }
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.payload[self.position..end]);
        self.position = end;
        Ok(u32::from_ne_bytes(word))
    }

    /// Read a (high, low) pair
    pub fn word64(&mut self) -> core::result::Result<u64, PacketError> {
        let high = self.word()?;
        let low = self.word()?;
        Ok((u64::from(high) << 32) | u64::from(low))
    }

    /// Read `count` opaque bytes
    pub fn bytes(&mut self, count: usize) -> core::result::Result<&'a [u8], PacketError> {
        let end = self.position + count;
        if end > self.payload.len() {
            return Err(PacketError::PayloadTooShort);
        }
        let bytes = &self.payload[self.position..end];
        self.position = end;
        Ok(bytes)
    }
}

/// One packet in host byte order
#[derive(Clone)]
pub struct Packet {
    pub class: PacketClass,
    pub id: ObjectId,
    pub source_tid: ObjectId,
    pub return_code: u32,
    /// Requester's timeout in ticks
    ///
    /// Informational for the owner: the requester runs its own timer and
    /// the owner answers whatever this says.
    pub timeout: u32,
    pub sequence: u32,
    to_convert: u32,
    payload_len: usize,
    payload: [u8; MAXIMUM_PAYLOAD],
}

impl Packet {
    pub const fn new() -> Self {
        Self {
            class: PacketClass::Internal,
            id: ObjectId::NONE,
            source_tid: ObjectId::NONE,
            return_code: 0,
            timeout: 0,
            sequence: 0,
            to_convert: 0,
            payload_len: 0,
            payload: [0; MAXIMUM_PAYLOAD],
        }
    }

    /// Clear every field for reuse
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Total length on the wire
    #[inline]
    pub fn length(&self) -> usize {
        PREFIX_SIZE + self.payload_len
    }

    /// Payload bytes covered by byte-order conversion
    #[inline]
    pub fn to_convert(&self) -> u32 {
        self.to_convert
    }

    /// Result carried in `return_code`
    pub fn status(&self) -> Result<()> {
        StatusCode::from_wire(self.return_code)
    }

    pub fn set_status(&mut self, result: Result<()>) {
        self.return_code = StatusCode::to_wire(result);
    }

    /// Replace the payload with `operation` and set the class to match
    pub fn write_operation<O: Operation>(&mut self, operation: &O) -> core::result::Result<(), PacketError> {
        let mut writer = PayloadWriter::new(&mut self.payload);
        writer.word(operation.code())?;
        operation.encode_payload(&mut writer)?;

        let (len, words_end) = (writer.len, writer.words_end);
        self.class = O::CLASS;
        self.payload_len = len;
        self.to_convert = words_end as u32;
        Ok(())
    }

    /// Decode the payload as an operation of `O`
    pub fn read_operation<O: Operation>(&self) -> core::result::Result<O, PacketError> {
        if self.class != O::CLASS {
            return Err(PacketError::UnknownClass(self.class as u32));
        }
        let mut reader = PayloadReader {
            payload: &self.payload[..self.payload_len],
            words_end: self.to_convert as usize,
            position: 0,
        };
        let code = reader.word()?;
        O::decode(code, &mut reader)
    }

    /// Serialize in host byte order
    ///
    /// # Returns
    /// The encoded frame, a prefix of `buffer`
    pub fn encode<'b>(&self, buffer: &'b mut [u8; MAXIMUM_PACKET_SIZE]) -> &'b [u8] {
        let length = self.length();
        let prefix = [
            BYTE_ORDER_MARK,
            self.class as u32,
            length as u32,
            self.to_convert,
            self.id.raw(),
            self.source_tid.raw(),
            self.return_code,
            self.timeout,
            self.sequence,
        ];
        for (chunk, word) in buffer[..PREFIX_SIZE].chunks_exact_mut(4).zip(prefix) {
            chunk.copy_from_slice(&word.to_ne_bytes());
        }
        buffer[PREFIX_SIZE..length].copy_from_slice(&self.payload[..self.payload_len]);
        &buffer[..length]
    }

    /// Load a received frame, converting it to host byte order
    pub fn load(&mut self, frame: &[u8]) -> core::result::Result<(), PacketError> {
        let mut local = [0u8; MAXIMUM_PACKET_SIZE];
        let frame = normalize(frame, &mut local)?;

        let word = |index: usize| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&frame[index * 4..index * 4 + 4]);
            u32::from_ne_bytes(bytes)
        };

        let class = PacketClass::from_raw(word(1)).ok_or(PacketError::UnknownClass(word(1)))?;
        let payload = &frame[PREFIX_SIZE..];

        self.class = class;
        self.to_convert = word(3);
        self.id = ObjectId::from_raw(word(4));
        self.source_tid = ObjectId::from_raw(word(5));
        self.return_code = word(6);
        self.timeout = word(7);
        self.sequence = word(8);
        self.payload_len = payload.len();
        self.payload[..payload.len()].copy_from_slice(payload);
        Ok(())
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Packet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Packet")
            .field("class", &self.class)
            .field("id", &self.id)
            .field("source_tid", &self.source_tid)
            .field("return_code", &self.return_code)
            .field("sequence", &self.sequence)
            .field("length", &self.length())
            .finish()
    }
}

/// Validate `frame` and return it in host byte order
///
/// A frame already in host order is returned as is; a swapped one is
/// copied into `scratch` and converted there.
fn normalize<'f>(
    frame: &'f [u8],
    scratch: &'f mut [u8; MAXIMUM_PACKET_SIZE],
) -> core::result::Result<&'f [u8], PacketError> {
    check_frame(frame)?;

    let mark = read_word(frame, 0);
    if mark == BYTE_ORDER_MARK {
        check_layout(frame, |w| w)?;
        return Ok(frame);
    }
    if mark.swap_bytes() != BYTE_ORDER_MARK {
        return Err(PacketError::BadByteOrder(mark));
    }

    let scratch = &mut scratch[..frame.len()];
    scratch.copy_from_slice(frame);
    swap_frame(scratch)?;
    Ok(scratch)
}

/// Byte-swap a frame's prefix and word payload in place
///
/// Turns a frame written on a host of one byte order into the frame the
/// other byte order would have written.
pub fn swap_frame(frame: &mut [u8]) -> core::result::Result<(), PacketError> {
    check_frame(frame)?;
    let mark = read_word(frame, 0);
    if mark != BYTE_ORDER_MARK && mark.swap_bytes() != BYTE_ORDER_MARK {
        return Err(PacketError::BadByteOrder(mark));
    }

    // Read the conversion count before its own bytes are swapped
    let to_convert = if mark == BYTE_ORDER_MARK {
        read_word(frame, 3)
    } else {
        read_word(frame, 3).swap_bytes()
    };
    check_layout(frame, |w| if mark == BYTE_ORDER_MARK { w } else { w.swap_bytes() })?;

    let words_end = PREFIX_SIZE + to_convert as usize;
    for word in frame[..words_end].chunks_exact_mut(4) {
        word.reverse();
    }
    Ok(())
}

fn check_frame(frame: &[u8]) -> core::result::Result<(), PacketError> {
    if frame.len() < PREFIX_SIZE {
        return Err(PacketError::Truncated(frame.len()));
    }
    if frame.len() > MAXIMUM_PACKET_SIZE {
        return Err(PacketError::Oversized(frame.len()));
    }
    Ok(())
}

/// Check `length` and `to_convert`, reading words through `host`
fn check_layout(frame: &[u8], host: impl Fn(u32) -> u32) -> core::result::Result<(), PacketError> {
    let length = host(read_word(frame, 2));
    if length as usize != frame.len() {
        return Err(PacketError::LengthMismatch { length, frame: frame.len() });
    }
    let to_convert = host(read_word(frame, 3));
    if to_convert % 4 != 0 || PREFIX_SIZE + to_convert as usize > frame.len() {
        return Err(PacketError::BadConvertCount(to_convert));
    }
    Ok(())
}

fn read_word(frame: &[u8], index: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&frame[index * 4..index * 4 + 4]);
    u32::from_ne_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_objects::{NodeId, ObjectClass};

    /// Operation with a word, a 64-bit value and a raw tail
    #[derive(Debug, PartialEq)]
    enum SampleOp {
        Ping { value: u32, wide: u64, tail: [u8; 3] },
        Pong,
    }

    impl Operation for SampleOp {
        const CLASS: PacketClass = PacketClass::Tasks;

        fn code(&self) -> u32 {
            match self {
                Self::Ping { .. } => 0,
                Self::Pong => 1,
            }
        }

        fn encode_payload(&self, writer: &mut PayloadWriter<'_>) -> core::result::Result<(), PacketError> {
            match self {
                Self::Ping { value, wide, tail } => {
                    writer.word(*value)?;
                    writer.word64(*wide)?;
                    writer.bytes(tail)
                }
                Self::Pong => Ok(()),
            }
        }

        fn decode(code: u32, reader: &mut PayloadReader<'_>) -> core::result::Result<Self, PacketError> {
            match code {
                0 => {
                    let value = reader.word()?;
                    let wide = reader.word64()?;
                    let mut tail = [0u8; 3];
                    tail.copy_from_slice(reader.bytes(3)?);
                    Ok(Self::Ping { value, wide, tail })
                }
                1 => Ok(Self::Pong),
                code => Err(PacketError::UnknownOperation { class: Self::CLASS, code }),
            }
        }
    }

    fn sample() -> Packet {
        let mut packet = Packet::new();
        packet.id = ObjectId::new(ObjectClass::REGIONS, NodeId::new(2).unwrap(), 7);
        packet.source_tid = ObjectId::new(ObjectClass::TASKS, NodeId::FIRST, 3);
        packet.timeout = 25;
        packet.sequence = 41;
        packet
            .write_operation(&SampleOp::Ping {
                value: 0xDEAD_BEEF,
                wide: 0x0000_0001_8000_0040,
                tail: *b"abc",
            })
            .unwrap();
        packet
    }

    #[test]
    fn test_prefix_layout() {
        let packet = sample();
        let mut buffer = [0u8; MAXIMUM_PACKET_SIZE];
        let frame = packet.encode(&mut buffer);

        // op code + value + (high, low), then three raw bytes
        assert_eq!(packet.to_convert(), 16);
        assert_eq!(frame.len(), PREFIX_SIZE + 19);
        assert_eq!(read_word(frame, 0), BYTE_ORDER_MARK);
        assert_eq!(read_word(frame, 1), PacketClass::Tasks as u32);
        assert_eq!(read_word(frame, 2), frame.len() as u32);
        assert_eq!(read_word(frame, 8), 41);
    }

    #[test]
    fn test_host_order_frame_loads() {
        let packet = sample();
        let mut buffer = [0u8; MAXIMUM_PACKET_SIZE];
        let frame = packet.encode(&mut buffer);

        let mut received = Packet::new();
        received.load(frame).unwrap();
        assert_eq!(received.id, packet.id);
        assert_eq!(received.source_tid, packet.source_tid);
        assert_eq!(received.timeout, 25);
        assert_eq!(received.read_operation::<SampleOp>().unwrap(), sample().read_operation::<SampleOp>().unwrap());
    }

    #[test]
    fn test_foreign_order_frame_is_converted() {
        let packet = sample();
        let mut buffer = [0u8; MAXIMUM_PACKET_SIZE];
        let length = packet.encode(&mut buffer).len();
        let frame = &mut buffer[..length];
        swap_frame(frame).unwrap();

        assert_eq!(read_word(frame, 0), BYTE_ORDER_MARK.swap_bytes());
        // Raw tail untouched by the swap
        assert_eq!(&frame[length - 3..], b"abc");

        let mut received = Packet::new();
        received.load(frame).unwrap();
        assert_eq!(received.sequence, 41);
        assert_eq!(
            received.read_operation::<SampleOp>().unwrap(),
            SampleOp::Ping { value: 0xDEAD_BEEF, wide: 0x0000_0001_8000_0040, tail: *b"abc" }
        );
    }

    #[test]
    fn test_malformed_frames() {
        let mut received = Packet::new();
        assert_eq!(received.load(&[0u8; 8]), Err(PacketError::Truncated(8)));
        assert_eq!(received.load(&[0u8; 200]), Err(PacketError::Oversized(200)));
        assert_eq!(received.load(&[0u8; 36]), Err(PacketError::BadByteOrder(0)));

        let mut buffer = [0u8; MAXIMUM_PACKET_SIZE];
        let length = sample().encode(&mut buffer).len();
        assert_eq!(
            received.load(&buffer[..length - 1]),
            Err(PacketError::LengthMismatch { length: length as u32, frame: length - 1 })
        );

        buffer[4..8].copy_from_slice(&99u32.to_ne_bytes());
        assert_eq!(received.load(&buffer[..length]), Err(PacketError::UnknownClass(99)));
    }

    #[test]
    fn test_read_rejects_other_class_and_short_payload() {
        let mut packet = Packet::new();
        packet.class = PacketClass::Tasks;
        assert_eq!(packet.read_operation::<SampleOp>(), Err(PacketError::PayloadTooShort));

        packet.write_operation(&SampleOp::Pong).unwrap();
        packet.class = PacketClass::Partition;
        assert_eq!(packet.read_operation::<SampleOp>(), Err(PacketError::UnknownClass(3)));
    }

    #[test]
    fn test_word_after_raw_rejected() {
        let mut payload = [0u8; MAXIMUM_PAYLOAD];
        let mut writer = PayloadWriter::new(&mut payload);
        writer.bytes(b"x").unwrap();
        assert_eq!(writer.word(1), Err(PacketError::WordAfterRaw));
        assert_eq!(writer.bytes(&[0u8; MAXIMUM_PAYLOAD]), Err(PacketError::PayloadTooLong));
    }

    #[test]
    fn test_status_round_trip() {
        let mut packet = Packet::new();
        packet.set_status(Err(StatusCode::ObjectWasDeleted));
        assert_eq!(packet.status(), Err(StatusCode::ObjectWasDeleted));
        packet.set_status(Ok(()));
        assert_eq!(packet.status(), Ok(()));
    }
}
