//! Frame encoding and decoding.
//!
//! Header layout: `FIN | RSV1-3 | opcode(4)`, then `MASK | len(7)`, then an
//! optional 16- or 64-bit big-endian extended length, an optional 4-byte
//! masking key, and the payload.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Result, WsError};

/// Largest length that fits in the 7-bit field.
const MAX_SHORT_LEN: usize = 125;
/// 7-bit indicator selecting a 16-bit extended length.
const LEN_16: u8 = 126;
/// 7-bit indicator selecting a 64-bit extended length.
const LEN_64: u8 = 127;

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const OPCODE_BITS: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LEN_BITS: u8 = 0x7F;

/// Frame opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Continuation of a fragmented message.
    Continuation,
    /// UTF-8 text payload.
    Text,
    /// Binary payload.
    Binary,
    /// Close control frame.
    Close,
    /// Ping control frame.
    Ping,
    /// Pong control frame.
    Pong,
}

impl Opcode {
    /// Parse the low nibble of the first header byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    /// Wire value.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    /// Close, Ping and Pong.
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// A decoded frame. `payload` is always unmasked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: Opcode,
    /// Whether the frame arrived masked.
    pub masked: bool,
    /// Unmasked payload bytes.
    pub payload: Vec<u8>,
}

/// XOR `payload[i]` with `key[i % 4]`. Applying it twice is the identity.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Encode a single FIN frame, masking with a fresh random key when `mask` is set.
pub fn encode_frame(opcode: Opcode, payload: &[u8], mask: bool) -> Vec<u8> {
    let key = mask.then(rand::random::<[u8; 4]>);
    encode_frame_with_key(opcode, payload, key)
}

/// Encode a single FIN frame with an explicit masking key.
///
/// The length field always uses the smallest form that fits.
pub fn encode_frame_with_key(opcode: Opcode, payload: &[u8], key: Option<[u8; 4]>) -> Vec<u8> {
    let len = payload.len();
    let mut out = Vec::with_capacity(len + 14);
    out.push(FIN_BIT | opcode.as_u8());

    let mask_bit = if key.is_some() { MASK_BIT } else { 0 };
    if len <= MAX_SHORT_LEN {
        out.push(mask_bit | len as u8);
    } else if let Ok(short) = u16::try_from(len) {
        out.push(mask_bit | LEN_16);
        out.extend_from_slice(&short.to_be_bytes());
    } else {
        out.push(mask_bit | LEN_64);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    if let Some(key) = key {
        out.extend_from_slice(&key);
        let start = out.len();
        out.extend_from_slice(payload);
        apply_mask(&mut out[start..], key);
    } else {
        out.extend_from_slice(payload);
    }
    out
}

/// Read exactly one frame from `reader`.
///
/// Suspends until the header, extended length, masking key and payload have
/// all arrived. A stream that ends part-way yields [`WsError::IncompleteRead`].
/// Payloads larger than `max_payload` are rejected before any allocation.
pub async fn decode_frame<R>(reader: &mut R, max_payload: usize) -> Result<Frame>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut head = [0u8; 2];
    read_exact(reader, &mut head).await?;

    if head[0] & RSV_BITS != 0 {
        return Err(WsError::ProtocolViolation("reserved bits set".into()));
    }
    let fin = head[0] & FIN_BIT != 0;
    let raw_opcode = head[0] & OPCODE_BITS;
    let opcode = Opcode::from_u8(raw_opcode)
        .ok_or_else(|| WsError::ProtocolViolation(format!("unknown opcode {raw_opcode:#x}")))?;
    let masked = head[1] & MASK_BIT != 0;

    let declared = match head[1] & LEN_BITS {
        LEN_16 => {
            let mut buf = [0u8; 2];
            read_exact(reader, &mut buf).await?;
            u64::from(u16::from_be_bytes(buf))
        }
        LEN_64 => {
            let mut buf = [0u8; 8];
            read_exact(reader, &mut buf).await?;
            u64::from_be_bytes(buf)
        }
        short => u64::from(short),
    };
    let len = usize::try_from(declared)
        .ok()
        .filter(|len| *len <= max_payload)
        .ok_or_else(|| {
            WsError::ProtocolViolation(format!(
                "payload of {declared} bytes exceeds limit of {max_payload}"
            ))
        })?;

    if opcode.is_control() {
        if !fin {
            return Err(WsError::ProtocolViolation(format!("fragmented {opcode:?} frame")));
        }
        if len > MAX_SHORT_LEN {
            return Err(WsError::ProtocolViolation(format!(
                "{opcode:?} frame carries {len} bytes"
            )));
        }
    }

    let key = if masked {
        let mut key = [0u8; 4];
        read_exact(reader, &mut key).await?;
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; len];
    read_exact(reader, &mut payload).await?;
    if let Some(key) = key {
        apply_mask(&mut payload, key);
    }

    Ok(Frame {
        fin,
        opcode,
        masked,
        payload,
    })
}

async fn read_exact<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(WsError::IncompleteRead),
        Err(e) => Err(e.into()),
    }
}
