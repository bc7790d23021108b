use serde::Serialize;

use crate::errors::HubError;
use crate::protocol::close::CloseMessage;
use crate::protocol::hub_protocol::HubProtocolKind;
use crate::protocol::invoke::{CompletionMessage, InvocationMessage};
use crate::protocol::negotiate::{HandshakeRequest, HandshakeResponse, PingMessage};
use crate::protocol::streaming::{CancelInvocationMessage, StreamInvocationMessage, StreamItemMessage};

/// Every hub frame ends with this single-byte record separator.
pub(crate) const RECORD_SEPARATOR: char = '\u{001e}';

/// One decoded hub message, discriminated by the wire `type` field.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation(InvocationMessage),
    StreamItem(StreamItemMessage),
    Completion(CompletionMessage),
    StreamInvocation(StreamInvocationMessage),
    CancelInvocation(CancelInvocationMessage),
    Ping,
    Close(CloseMessage),
}

/// Codec for the text/JSON hub protocol: record-separated JSON objects.
pub(crate) struct MessageParser;

impl MessageParser {
    /// Splits a payload on the record separator, dropping empty chunks (a
    /// well-formed payload ends with a trailing separator).
    pub(crate) fn split_records(payload: &str) -> impl Iterator<Item = &str> {
        payload.split(RECORD_SEPARATOR).filter(|record| !record.is_empty())
    }

    /// Decodes a whole inbound batch. Any record that is not valid JSON, has
    /// no recognizable `type`, or misses a required field fails the entire
    /// call; partial successes are discarded so the caller never observes a
    /// half-applied batch.
    pub(crate) fn parse_messages(payload: &str) -> Result<Vec<HubMessage>, HubError> {
        let mut messages = Vec::new();

        for record in Self::split_records(payload) {
            messages.push(Self::parse_record(record)?);
        }

        Ok(messages)
    }

    fn parse_record(record: &str) -> Result<HubMessage, HubError> {
        let value: serde_json::Value = serde_json::from_str(record).map_err(HubError::malformed)?;
        let discriminant = value
            .get("type")
            .and_then(|t| t.as_u64())
            .ok_or_else(|| HubError::MalformedMessage(format!("record without a type field: {}", record)))?;

        let message = match discriminant {
            1 => HubMessage::Invocation(serde_json::from_value(value).map_err(HubError::malformed)?),
            2 => HubMessage::StreamItem(serde_json::from_value(value).map_err(HubError::malformed)?),
            3 => HubMessage::Completion(serde_json::from_value(value).map_err(HubError::malformed)?),
            4 => HubMessage::StreamInvocation(serde_json::from_value(value).map_err(HubError::malformed)?),
            5 => HubMessage::CancelInvocation(serde_json::from_value(value).map_err(HubError::malformed)?),
            6 => HubMessage::Ping,
            7 => HubMessage::Close(serde_json::from_value(value).map_err(HubError::malformed)?),
            other => {
                return Err(HubError::MalformedMessage(format!("unrecognized message type {}", other)));
            }
        };

        Ok(message)
    }

    /// Encodes a message kind the client legitimately sends: invocations,
    /// stream invocations, cancellations and keepalive pings. Server-only
    /// kinds are a programmer error.
    pub(crate) fn write_message(message: &HubMessage) -> Result<String, HubError> {
        let json = match message {
            HubMessage::Invocation(invocation) => Self::to_json(invocation)?,
            HubMessage::StreamInvocation(invocation) => Self::to_json(invocation)?,
            HubMessage::CancelInvocation(cancellation) => Self::to_json(cancellation)?,
            HubMessage::Ping => Self::to_json(&PingMessage::new())?,
            HubMessage::StreamItem(_) | HubMessage::Completion(_) | HubMessage::Close(_) => {
                return Err(HubError::InvalidOperation(
                    "only invocations, stream invocations, cancellations and pings are sent by a client".to_string(),
                ));
            }
        };

        Ok(format!("{}{}", json, RECORD_SEPARATOR))
    }

    /// Encodes the handshake request frame.
    pub(crate) fn write_handshake_request(protocol: HubProtocolKind) -> Result<String, HubError> {
        let request = HandshakeRequest::new(protocol.protocol_name().to_string(), protocol.version());
        let json = Self::to_json(&request)?;

        Ok(format!("{}{}", json, RECORD_SEPARATOR))
    }

    /// Decodes the handshake response record (already stripped of the
    /// separator).
    pub(crate) fn parse_handshake_response(record: &str) -> Result<HandshakeResponse, HubError> {
        serde_json::from_str(record).map_err(HubError::malformed)
    }

    pub(crate) fn to_json<T: Serialize>(data: &T) -> Result<String, HubError> {
        serde_json::to_string(data).map_err(HubError::serialization)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::protocol::invoke::InvocationMessage;

    fn parse_one(payload: &str) -> HubMessage {
        let mut messages = MessageParser::parse_messages(payload).unwrap();
        assert_eq!(messages.len(), 1);
        messages.remove(0)
    }

    #[test]
    fn invocation_encodes_the_documented_frame() {
        let invocation = InvocationMessage::new("1".to_string(), "Echo".to_string(), vec![json!("hi")], false);
        let frame = MessageParser::write_message(&HubMessage::Invocation(invocation)).unwrap();

        assert_eq!(
            frame,
            "{\"type\":1,\"invocationId\":\"1\",\"target\":\"Echo\",\"arguments\":[\"hi\"],\"nonBlocking\":false}\u{001e}"
        );
    }

    #[test]
    fn handshake_request_encodes_the_documented_frame() {
        let frame = MessageParser::write_handshake_request(HubProtocolKind::Json).unwrap();
        assert_eq!(frame, "{\"protocol\":\"json\",\"version\":1}\u{001e}");
    }

    #[test]
    fn encodable_kinds_round_trip() {
        let messages = vec![
            HubMessage::Invocation(InvocationMessage::new(
                "12".to_string(),
                "Send".to_string(),
                vec![json!("hello"), json!(42)],
                false,
            )),
            HubMessage::StreamInvocation(StreamInvocationMessage::new(
                "13".to_string(),
                "Counter".to_string(),
                vec![json!(10)],
            )),
            HubMessage::CancelInvocation(CancelInvocationMessage::new("13".to_string())),
            HubMessage::Ping,
        ];

        for message in messages {
            let frame = MessageParser::write_message(&message).unwrap();
            assert_eq!(parse_one(&frame), message);
        }
    }

    #[test]
    fn server_only_kinds_are_rejected_on_encode() {
        let completion = CompletionMessage::result("1".to_string(), Some(json!("hi")));
        let error = MessageParser::write_message(&HubMessage::Completion(completion)).unwrap_err();
        assert!(matches!(error, HubError::InvalidOperation(_)));

        let item = StreamItemMessage::new("1".to_string(), json!(1));
        let error = MessageParser::write_message(&HubMessage::StreamItem(item)).unwrap_err();
        assert!(matches!(error, HubError::InvalidOperation(_)));
    }

    #[test]
    fn completion_with_result_resolves_the_documented_frame() {
        let message = parse_one("{\"type\":3,\"invocationId\":\"1\",\"result\":\"hi\"}\u{001e}");

        match message {
            HubMessage::Completion(completion) => {
                assert_eq!(completion.invocation_id, "1");
                assert_eq!(completion.result, Some(json!("hi")));
                assert_eq!(completion.error, None);
            }
            other => panic!("expected a completion, got {:?}", other),
        }
    }

    #[test]
    fn completion_with_error_parses() {
        let message = parse_one("{\"type\":3,\"invocationId\":\"7\",\"error\":\"boom\"}\u{001e}");

        match message {
            HubMessage::Completion(completion) => assert_eq!(completion.error.as_deref(), Some("boom")),
            other => panic!("expected a completion, got {:?}", other),
        }
    }

    #[test]
    fn invocation_without_id_is_malformed() {
        let error = MessageParser::parse_messages("{\"type\":1,\"target\":\"Send\"}\u{001e}").unwrap_err();
        assert!(matches!(error, HubError::MalformedMessage(_)));
    }

    #[test]
    fn unrecognized_type_is_malformed() {
        let error = MessageParser::parse_messages("{\"type\":99}\u{001e}").unwrap_err();
        assert!(matches!(error, HubError::MalformedMessage(_)));
    }

    #[test]
    fn one_bad_record_discards_the_whole_batch() {
        let payload = "{\"type\":6}\u{001e}{\"type\":2,\"invocationId\":\"1\"}\u{001e}";
        let error = MessageParser::parse_messages(payload).unwrap_err();
        assert!(matches!(error, HubError::MalformedMessage(_)));
    }

    #[test]
    fn batches_preserve_record_order() {
        let payload = "{\"type\":2,\"invocationId\":\"4\",\"item\":1}\u{001e}\
                       {\"type\":2,\"invocationId\":\"4\",\"item\":2}\u{001e}\
                       {\"type\":6}\u{001e}";
        let messages = MessageParser::parse_messages(payload).unwrap();

        assert_eq!(messages.len(), 3);
        match (&messages[0], &messages[1]) {
            (HubMessage::StreamItem(first), HubMessage::StreamItem(second)) => {
                assert_eq!(first.item, json!(1));
                assert_eq!(second.item, json!(2));
            }
            other => panic!("expected two stream items, got {:?}", other),
        }
        assert_eq!(messages[2], HubMessage::Ping);
    }

    #[test]
    fn handshake_responses_parse() {
        let success = MessageParser::parse_handshake_response("{}").unwrap();
        assert_eq!(success.error, None);

        let failure = MessageParser::parse_handshake_response("{\"error\":\"unsupported protocol\"}").unwrap();
        assert_eq!(failure.error.as_deref(), Some("unsupported protocol"));
    }

    #[test]
    fn close_message_parses_with_defaults() {
        let message = parse_one("{\"type\":7}\u{001e}");
        match message {
            HubMessage::Close(close) => {
                assert_eq!(close.error, None);
                assert!(!close.allow_reconnect);
            }
            other => panic!("expected a close, got {:?}", other),
        }

        let message = parse_one("{\"type\":7,\"error\":\"shutting down\",\"allowReconnect\":true}\u{001e}");
        match message {
            HubMessage::Close(close) => {
                assert_eq!(close.error.as_deref(), Some("shutting down"));
                assert!(close.allow_reconnect);
            }
            other => panic!("expected a close, got {:?}", other),
        }
    }
}
