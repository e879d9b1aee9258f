//! Binary message protocol: 4-byte big-endian header length + JSON header + raw payload.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::constants::{FRAME_DOWNLOAD_CHUNK, FRAME_UPLOAD_CHUNK};

/// Header for a chunk streamed from a client to a storage node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkHeader {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub upload_id: String,
    pub chunk_index: u32,
    /// SHA-256 hex digest of the payload (empty means no verification).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

impl UploadChunkHeader {
    pub fn new(upload_id: impl Into<String>, chunk_index: u32, checksum: String) -> Self {
        Self {
            msg_type: FRAME_UPLOAD_CHUNK.into(),
            upload_id: upload_id.into(),
            chunk_index,
            checksum,
        }
    }
}

/// Header for a chunk streamed from a storage node back to a client.
///
/// `id` is the id of the `download_stream` request the chunk answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadChunkHeader {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub id: String,
    pub chunk_index: u32,
    pub is_last: bool,
}

impl DownloadChunkHeader {
    pub fn new(id: impl Into<String>, chunk_index: u32, is_last: bool) -> Self {
        Self {
            msg_type: FRAME_DOWNLOAD_CHUNK.into(),
            id: id.into(),
            chunk_index,
            is_last,
        }
    }
}

/// Parsed binary message.
#[derive(Debug)]
pub enum BinaryMessage {
    UploadChunk {
        header: UploadChunkHeader,
        data: Vec<u8>,
    },
    DownloadChunk {
        header: DownloadChunkHeader,
        data: Vec<u8>,
    },
}

/// Splits a frame into its JSON header and raw payload.
fn split_frame(data: &[u8]) -> Result<(&[u8], &[u8]), ParseError> {
    let (len_bytes, rest) = data.split_first_chunk::<4>().ok_or(ParseError::TooShort)?;
    let header_len = u32::from_be_bytes(*len_bytes) as usize;
    if rest.len() < header_len {
        return Err(ParseError::HeaderTruncated {
            expected: header_len,
            got: rest.len(),
        });
    }
    Ok(rest.split_at(header_len))
}

fn decode_header<T: DeserializeOwned>(header: &[u8]) -> Result<T, ParseError> {
    serde_json::from_slice(header).map_err(|e| ParseError::InvalidJson(e.to_string()))
}

/// Decodes one binary frame: `[u32 BE header length][JSON header][payload]`.
pub fn parse_binary_message(data: &[u8]) -> Result<BinaryMessage, ParseError> {
    let (header, payload) = split_frame(data)?;
    let kind: FrameKind = decode_header(header)?;
    let data = payload.to_vec();
    match kind.frame_type.as_deref() {
        Some(FRAME_UPLOAD_CHUNK) => Ok(BinaryMessage::UploadChunk {
            header: decode_header(header)?,
            data,
        }),
        Some(FRAME_DOWNLOAD_CHUNK) => Ok(BinaryMessage::DownloadChunk {
            header: decode_header(header)?,
            data,
        }),
        other => Err(ParseError::UnknownType(other.unwrap_or_default().to_string())),
    }
}

/// Builds a frame from any serializable header and its payload bytes.
pub fn encode_binary_message<T: Serialize>(
    header: &T,
    payload: &[u8],
) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(header)?;
    let mut frame = Vec::with_capacity(4 + json.len() + payload.len());
    frame.extend((json.len() as u32).to_be_bytes());
    frame.extend(json);
    frame.extend_from_slice(payload);
    Ok(frame)
}

#[derive(Deserialize)]
struct FrameKind {
    #[serde(rename = "type")]
    frame_type: Option<String>,
}

/// Errors from binary message parsing.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("message too short (need at least 4 bytes)")]
    TooShort,

    #[error("header truncated: expected {expected} bytes, got {got}")]
    HeaderTruncated { expected: usize, got: usize },

    #[error("invalid header JSON: {0}")]
    InvalidJson(String),

    #[error("unknown binary frame type: {0:?}")]
    UnknownType(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_frame(header: &[u8], payload: &[u8]) -> Vec<u8> {
        [&(header.len() as u32).to_be_bytes()[..], header, payload].concat()
    }

    #[test]
    fn parse_upload_chunk() {
        let header = serde_json::to_vec(&serde_json::json!({
            "type": "upload_chunk",
            "uploadId": "u-1",
            "chunkIndex": 3,
            "checksum": "abc123"
        }))
        .unwrap();
        let payload = b"binary data here";

        let frame = raw_frame(&header, payload);
        match parse_binary_message(&frame).unwrap() {
            BinaryMessage::UploadChunk { header, data } => {
                assert_eq!(header.upload_id, "u-1");
                assert_eq!(header.chunk_index, 3);
                assert_eq!(header.checksum, "abc123");
                assert_eq!(data, payload);
            }
            other => panic!("expected UploadChunk, got {other:?}"),
        }
    }

    #[test]
    fn parse_download_chunk() {
        let header = DownloadChunkHeader::new("req-7", 0, true);
        let frame = encode_binary_message(&header, b"tail").unwrap();
        match parse_binary_message(&frame).unwrap() {
            BinaryMessage::DownloadChunk { header, data } => {
                assert_eq!(header.id, "req-7");
                assert!(header.is_last);
                assert_eq!(data, b"tail");
            }
            other => panic!("expected DownloadChunk, got {other:?}"),
        }
    }

    #[test]
    fn frame_shorter_than_length_prefix() {
        assert!(matches!(
            parse_binary_message(&[0, 0, 0]),
            Err(ParseError::TooShort)
        ));
    }

    #[test]
    fn declared_header_longer_than_frame() {
        let err = parse_binary_message(&[0, 0, 0, 100, 1, 2, 3, 4, 5]).unwrap_err();
        assert!(matches!(
            err,
            ParseError::HeaderTruncated {
                expected: 100,
                got: 5
            }
        ));
    }

    #[test]
    fn header_that_is_not_json() {
        let frame = raw_frame(b"{oops", b"payload");
        assert!(matches!(
            parse_binary_message(&frame),
            Err(ParseError::InvalidJson(_))
        ));
    }

    #[test]
    fn parse_unknown_type() {
        let frame = raw_frame(br#"{"type":"thumbnail_frame"}"#, b"");
        let result = parse_binary_message(&frame);
        assert!(matches!(result, Err(ParseError::UnknownType(t)) if t == "thumbnail_frame"));
    }

    #[test]
    fn empty_payload_and_no_checksum() {
        let header = UploadChunkHeader::new("u-2", 0, String::new());
        let frame = encode_binary_message(&header, &[]).unwrap();
        let header_json = String::from_utf8_lossy(&frame[4..]).to_string();
        assert!(!header_json.contains("checksum"));

        match parse_binary_message(&frame).unwrap() {
            BinaryMessage::UploadChunk { header, data } => {
                assert!(data.is_empty());
                assert!(header.checksum.is_empty());
            }
            other => panic!("expected UploadChunk, got {other:?}"),
        }
    }
}
