use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::constants::MessageType;

/// Failure carried by a reply: a wire error code and a human-readable text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("error {code}: {message}")]
pub struct WsError {
    pub code: i32,
    pub message: String,
}

/// Text-frame envelope shared by requests and replies.
///
/// A reply reuses its request's `id`. The payload stays raw JSON until the
/// receiver knows which type to decode it as.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WsError>,
}

impl Message {
    pub fn new<T: Serialize>(
        id: impl Into<String>,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        let payload = payload
            .map(|p| serde_json::to_string(p).and_then(RawValue::from_string))
            .transpose()?;
        Ok(Self {
            id: id.into(),
            msg_type,
            payload,
            error: None,
        })
    }

    /// Decodes the payload as `T`. `Ok(None)` when the message has none.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.payload
            .as_deref()
            .map(|raw| serde_json::from_str(raw.get()))
            .transpose()
    }

    /// An `error`-typed message with no payload.
    pub fn error(id: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            msg_type: MessageType::Error,
            payload: None,
            error: Some(WsError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn reply<T: Serialize>(
        &self,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        Message::new(&self.id, msg_type, payload)
    }

    pub fn reply_error(&self, code: i32, message: impl Into<String>) -> Self {
        Message::error(&self.id, code, message)
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Splits a reply into success or the failure it carries.
    pub fn into_result(self) -> Result<Self, WsError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::UploadStatsResponse;

    #[test]
    fn no_payload_and_no_error_are_omitted() {
        let msg = Message::new::<()>("m1", MessageType::UploadStreamEnd, None).unwrap();
        assert!(msg.payload.is_none());
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"id":"m1","type":"upload_stream_end"}"#);
    }

    #[test]
    fn payload_decodes_as_requested_type() {
        let stats = UploadStatsResponse {
            upload_id: "u-1".into(),
            chunks_count: 7,
            bytes_written: 26,
        };
        let msg = Message::new("m1", MessageType::UploadStats, Some(&stats)).unwrap();
        let wire = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&wire).unwrap();
        assert_eq!(back.parse_payload::<UploadStatsResponse>().unwrap(), Some(stats));
    }

    #[test]
    fn payload_of_wrong_shape_is_an_error() {
        let msg: Message =
            serde_json::from_str(r#"{"id":"x","type":"heartbeat","payload":{"nodeId":7}}"#)
                .unwrap();
        assert!(
            msg.parse_payload::<crate::messages::HeartbeatRequest>()
                .is_err()
        );
    }

    #[test]
    fn error_reply_keeps_request_id() {
        let req = Message::new::<()>("req-99", MessageType::GetUploadStatus, None).unwrap();
        let reply = req.reply_error(404, "Unknown uploadId: u-9");
        assert_eq!(reply.id, "req-99");
        assert_eq!(reply.msg_type, MessageType::Error);
        assert!(reply.is_error());

        let err = reply.into_result().unwrap_err();
        assert_eq!(err.code, 404);
        assert_eq!(err.to_string(), "error 404: Unknown uploadId: u-9");
    }

    #[test]
    fn success_reply_passes_through_into_result() {
        let req = Message::new::<()>("req-42", MessageType::Heartbeat, None).unwrap();
        let reply = req
            .reply(
                MessageType::HeartbeatResponse,
                Some(&serde_json::json!({"known": true})),
            )
            .unwrap();
        assert_eq!(reply.id, "req-42");
        let ok = reply.into_result().unwrap();
        assert_eq!(ok.msg_type, MessageType::HeartbeatResponse);
    }
}
