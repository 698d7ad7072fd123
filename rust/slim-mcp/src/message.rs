//! JSON-RPC message codec.
//!
//! Each [`Message`] travels as one self-contained JSON text payload. The
//! bridge only encodes and decodes; it never looks at message content.

use jsonrpcmsg::{Id, Message, Params, Request, Response};
use serde_json::{Map, Value};

use crate::{Error, Result};

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// Serialize a message into a transport payload.
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    serde_json::to_vec(message).map_err(Error::Encode)
}

/// Parse a transport payload back into a message.
///
/// Text that is not JSON is [`Error::Decode`]. JSON that is not a JSON-RPC 2.0
/// request, notification or response is [`Error::InvalidMessage`].
pub fn decode(payload: &[u8]) -> Result<Message> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|source| Error::Decode { source })?;
    let Value::Object(object) = &value else {
        return Err(Error::InvalidMessage("expected a JSON object".to_string()));
    };
    check_shape(object).map_err(|reason| Error::InvalidMessage(reason.to_string()))?;
    serde_json::from_value(value).map_err(|source| Error::Decode { source })
}

// `Message` is untagged and every `Response` field is optional, so serde alone
// would accept any object as a response.
fn check_shape(object: &Map<String, Value>) -> std::result::Result<(), &'static str> {
    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err("missing or unsupported \"jsonrpc\" version");
    }
    let has_result = object.contains_key("result");
    let has_error = object.contains_key("error");

    match object.get("method") {
        Some(Value::String(_)) if has_result || has_error => {
            Err("a request cannot carry \"result\" or \"error\"")
        }
        Some(Value::String(_)) => Ok(()),
        Some(_) => Err("\"method\" must be a string"),
        None if !object.contains_key("id") => Err("a response must carry an \"id\""),
        None if has_result == has_error => {
            Err("a response must carry exactly one of \"result\" or \"error\"")
        }
        None => Ok(()),
    }
}

/// Convert JSON parameters into request params. `null` means no params.
pub fn params(value: Value) -> Result<Option<Params>> {
    if value.is_null() {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| Error::Protocol(format!("params must be an object or array: {e}")))
}

/// Request params as a JSON value (`null` when absent).
pub fn params_value(params: Option<&Params>) -> Value {
    params
        .and_then(|p| serde_json::to_value(p).ok())
        .unwrap_or(Value::Null)
}

pub fn request(id: Id, method: &str, params_json: Value) -> Result<Message> {
    Ok(Message::Request(Request::new_v2(
        method.to_string(),
        params(params_json)?,
        Some(id),
    )))
}

pub fn notification(method: &str, params_json: Value) -> Result<Message> {
    Ok(Message::Request(Request::new_v2(
        method.to_string(),
        params(params_json)?,
        None,
    )))
}

/// Responses always carry an `id` member; `None` is written as `"id": null`.
pub fn success(id: Option<Id>, result: Value) -> Message {
    Message::Response(Response::success_v2(result, Some(id.unwrap_or(Id::Null))))
}

pub fn error(id: Option<Id>, code: i32, message: impl Into<String>) -> Message {
    let error = jsonrpcmsg::Error {
        code,
        message: message.into(),
        data: None,
    };
    Message::Response(Response::error_v2(error, Some(id.unwrap_or(Id::Null))))
}

// ids don't implement Eq, so compare their JSON form
pub fn id_matches(left: &Id, right: &Id) -> bool {
    match (serde_json::to_value(left), serde_json::to_value(right)) {
        (Ok(left), Ok(right)) => left == right,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_json(message: &Message) -> Value {
        serde_json::from_slice(&encode(message).unwrap()).unwrap()
    }

    #[test]
    fn test_decode_request() {
        let payload = br#"{"jsonrpc":"2.0","id":"1","method":"tools/list","params":{}}"#;
        match decode(payload).unwrap() {
            Message::Request(request) => {
                assert_eq!(request.method, "tools/list");
                assert!(request.id.is_some());
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_notification_has_no_id() {
        let payload = br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        match decode(payload).unwrap() {
            Message::Request(request) => assert!(request.id.is_none()),
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_response() {
        let payload = br#"{"jsonrpc":"2.0","id":"7","result":{"tools":[]}}"#;
        match decode(payload).unwrap() {
            Message::Response(response) => {
                assert_eq!(response.result, Some(json!({"tools": []})));
                assert!(response.error.is_none());
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_garbage_is_decode_error() {
        assert!(matches!(decode(b"not valid json"), Err(Error::Decode { .. })));
        assert!(matches!(decode(b"\"ping\""), Err(Error::InvalidMessage(_))));
    }

    #[test]
    fn test_decode_rejects_objects_that_are_not_messages() {
        let payloads: [&[u8]; 8] = [
            br#"{}"#,
            br#"{"foo":1}"#,
            br#"[1,2]"#,
            br#"{"id":"1","method":"ping"}"#,
            br#"{"jsonrpc":"1.0","id":"1","method":"ping"}"#,
            br#"{"jsonrpc":"2.0","id":"1"}"#,
            br#"{"jsonrpc":"2.0","result":{}}"#,
            br#"{"jsonrpc":"2.0","id":"1","method":"ping","result":{}}"#,
        ];
        for payload in payloads {
            let decoded = decode(payload);
            assert!(
                matches!(decoded, Err(Error::InvalidMessage(_))),
                "{}: {decoded:?}",
                String::from_utf8_lossy(payload)
            );
        }
        assert!(matches!(
            decode(br#"{"jsonrpc":"2.0","id":"1","result":{},"error":{"code":1,"message":"x"}}"#),
            Err(Error::InvalidMessage(_))
        ));
        assert!(matches!(
            decode(br#"{"jsonrpc":"2.0","id":"1","method":7}"#),
            Err(Error::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_decode_error_response_with_null_id() {
        let payload = br#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}"#;
        match decode(payload).unwrap() {
            Message::Response(response) => {
                assert_eq!(response.error.map(|e| e.code), Some(PARSE_ERROR));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_reencode_is_stable() {
        let payloads: [&[u8]; 3] = [
            br#"{"jsonrpc":"2.0","id":"a","method":"ping"}"#,
            br#"{"jsonrpc":"2.0","method":"notifications/progress","params":{"progress":1}}"#,
            br#"{"jsonrpc":"2.0","id":"b","error":{"code":-32601,"message":"Method not found"}}"#,
        ];
        for payload in payloads {
            let once = encode(&decode(payload).unwrap()).unwrap();
            let twice = encode(&decode(&once).unwrap()).unwrap();
            assert_eq!(once, twice);

            let original: Value = serde_json::from_slice(payload).unwrap();
            let reencoded: Value = serde_json::from_slice(&once).unwrap();
            for key in ["id", "method", "params", "error"] {
                if let Some(expected) = original.get(key) {
                    assert_eq!(reencoded.get(key), Some(expected), "field {key}");
                }
            }
        }
    }

    #[test]
    fn test_request_builder() {
        let message = request(Id::String("42".into()), "tools/call", json!({"name": "x"})).unwrap();
        let value = as_json(&message);
        assert_eq!(value["method"], "tools/call");
        assert_eq!(value["id"], "42");
        assert_eq!(value["params"]["name"], "x");
        assert_eq!(value["jsonrpc"], "2.0");
    }

    #[test]
    fn test_error_builder() {
        let message = error(None, PARSE_ERROR, "Parse error");
        let value = as_json(&message);
        assert_eq!(value["error"]["code"], PARSE_ERROR);
        assert_eq!(value["error"]["message"], "Parse error");
        assert_eq!(value.get("id"), Some(&Value::Null));

        // A reply without an id still decodes on the other side.
        assert!(decode(&encode(&message).unwrap()).is_ok());
    }

    #[test]
    fn test_scalar_params_rejected() {
        assert!(matches!(params(json!(5)), Err(Error::Protocol(_))));
        assert!(params(Value::Null).unwrap().is_none());
    }

    #[test]
    fn test_id_matches() {
        assert!(id_matches(&Id::String("1".into()), &Id::String("1".into())));
        assert!(!id_matches(&Id::String("1".into()), &Id::String("2".into())));
    }
}
