/// Wire protocol: length-prefixed JSON records over a connected stream
/// socket.
///
/// Each frame is a little-endian `u32` length followed by one encoded
/// record. Requests carry a call id that the response echoes, so a client
/// multiplexing calls can pair responses arriving out of order. The
/// payload limit applies to the random-byte and entropy payloads; the
/// frame limit adds headroom for the encoding overhead.
use crate::{EsdmError, EsdmResult, RPC_MAX_MSG_LEN};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::{Read, Write};

/// Upper bound of one encoded frame. A maximum payload of byte values
/// encodes to roughly four characters per byte plus record framing.
pub const MAX_FRAME_LEN: usize = RPC_MAX_MSG_LEN * 5 + 4096;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnprivRequest {
    Status,
    GetRandomBytes { len: usize },
    GetRandomBytesFull { len: usize, nonblock: bool },
    GetRandomBytesMin { len: usize },
    GetEntLvl,
    GetMinReseedSecs,
    WriteData { data: Vec<u8> },
    RndGetEntCnt,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PrivRequest {
    RndAddToEntCnt { delta_bits: u32 },
    RndAddEntropy { data: Vec<u8>, ent_bits: u32 },
    RndClearPool,
    RndReseedCrng,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Request<T> {
    pub id: u64,
    pub body: T,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Response {
    pub id: u64,
    /// Bytes produced on success, negated errno-style code on failure.
    pub ret: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Response {
    pub fn ok(id: u64, ret: i64) -> Self {
        Self {
            id,
            ret,
            data: Vec::new(),
            text: None,
        }
    }

    pub fn err(id: u64, e: &EsdmError) -> Self {
        Self {
            id,
            ret: -e.errno(),
            data: Vec::new(),
            text: None,
        }
    }
}

/// Encode one record into a length-prefixed frame.
pub fn encode<T: Serialize>(msg: &T) -> EsdmResult<Vec<u8>> {
    let body =
        serde_json::to_vec(msg).map_err(|e| EsdmError::InvalidArgument(e.to_string()))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(EsdmError::InvalidArgument(format!(
            "frame of {} bytes exceeds the {} byte limit",
            body.len(),
            MAX_FRAME_LEN
        )));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode one record body (without the length prefix).
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> EsdmResult<T> {
    serde_json::from_slice(body).map_err(|e| EsdmError::InvalidArgument(e.to_string()))
}

/// Validate a frame length read off the wire.
pub fn check_frame_len(len: usize) -> EsdmResult<usize> {
    if len > MAX_FRAME_LEN {
        return Err(EsdmError::InvalidArgument(format!(
            "peer announced a {len} byte frame"
        )));
    }
    Ok(len)
}

/// Blocking frame write (client side; the server assembles frames
/// itself to stay interruptible).
pub fn write_frame<T: Serialize>(w: &mut impl Write, msg: &T) -> EsdmResult<()> {
    let frame = encode(msg)?;
    w.write_all(&frame)?;
    w.flush()?;
    Ok(())
}

/// Blocking frame read (client side).
pub fn read_frame<T: DeserializeOwned>(r: &mut impl Read) -> EsdmResult<T> {
    let mut len_bytes = [0u8; 4];
    r.read_exact(&mut len_bytes)?;
    let len = check_frame_len(u32::from_le_bytes(len_bytes) as usize)?;
    let mut body = vec![0u8; len];
    r.read_exact(&mut body)?;
    decode(&body)
}
