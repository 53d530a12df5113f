//! etcd v3 watch client over the JSON gateway.
//!
//! etcd exposes its gRPC API as JSON under `/v3/*`. Keys and values travel
//! base64-encoded and 64-bit integers as strings. A subscription is:
//!
//! 1. `POST /v3/kv/range` over the prefix, giving the current keys and the
//!    store revision;
//! 2. `POST /v3/watch` from the next revision, a long-lived response of
//!    newline-delimited JSON messages, each carrying zero or more events.

use std::collections::VecDeque;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ChangeStream, WatchClient, WatchError};
use crate::decoder::ChangeEvent;

/// Watch client for an etcd cluster reachable at `endpoint`.
#[derive(Debug, Clone)]
pub struct EtcdWatchClient {
    endpoint: String,
    http: reqwest::Client,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseHeader {
    #[serde(default)]
    revision: Value,
}

#[derive(Debug, Deserialize)]
struct KeyValue {
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct RangeResponse {
    #[serde(default)]
    header: ResponseHeader,
    #[serde(default)]
    kvs: Vec<KeyValue>,
}

#[derive(Debug, Deserialize)]
struct WatchMessage {
    result: Option<WatchResult>,
    error: Option<GatewayError>,
}

#[derive(Debug, Default, Deserialize)]
struct WatchResult {
    #[serde(default)]
    events: Vec<WatchEvent>,
    #[serde(default)]
    canceled: bool,
    #[serde(default)]
    cancel_reason: String,
}

#[derive(Debug, Deserialize)]
struct WatchEvent {
    /// Absent for PUT: the gateway omits enum defaults.
    #[serde(rename = "type", default)]
    kind: Option<String>,
    kv: KeyValue,
}

#[derive(Debug, Deserialize)]
struct GatewayError {
    #[serde(default)]
    message: String,
}

impl EtcdWatchClient {
    /// Creates a client for `endpoint`, e.g. `http://127.0.0.1:2379`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(endpoint, reqwest::Client::new())
    }

    /// Creates a client that reuses an existing HTTP client.
    pub fn with_client(endpoint: impl Into<String>, http: reqwest::Client) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self { endpoint, http }
    }

    async fn range(&self, prefix: &str) -> Result<(Vec<ChangeEvent>, i64), WatchError> {
        let body = json!({
            "key": BASE64.encode(prefix),
            "range_end": BASE64.encode(prefix_range_end(prefix)),
        });
        let response: RangeResponse = self
            .http
            .post(format!("{}/v3/kv/range", self.endpoint))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let revision = parse_revision(&response.header.revision)?;
        let events = response
            .kvs
            .iter()
            .filter_map(|kv| skip_undecodable(decode_kv(None, kv)))
            .collect();
        Ok((events, revision))
    }

    async fn open(&self, prefix: &str) -> Result<ChangeStream, WatchError> {
        let (snapshot, revision) = self.range(prefix).await?;
        tracing::debug!(
            prefix = %prefix,
            keys = snapshot.len(),
            revision,
            "Loaded current doc registrations from etcd"
        );

        let body = json!({
            "create_request": {
                "key": BASE64.encode(prefix),
                "range_end": BASE64.encode(prefix_range_end(prefix)),
                "start_revision": revision + 1,
            }
        });
        let response = self
            .http
            .post(format!("{}/v3/watch", self.endpoint))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let body = Box::pin(response.bytes_stream());
        let live = stream::unfold(
            (body, Vec::<u8>::new(), VecDeque::<ChangeEvent>::new()),
            |(mut body, mut buffer, mut pending)| async move {
                loop {
                    if let Some(event) = pending.pop_front() {
                        return Some((Ok(event), (body, buffer, pending)));
                    }
                    if let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=newline).collect();
                        match decode_watch_line(&line) {
                            Ok(events) => pending.extend(events),
                            Err(e) => return Some((Err(e), (body, buffer, pending))),
                        }
                        continue;
                    }
                    match body.next().await {
                        Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                        Some(Err(e)) => return Some((Err(e.into()), (body, buffer, pending))),
                        None => return None,
                    }
                }
            },
        );

        Ok(stream::iter(snapshot.into_iter().map(Ok)).chain(live).boxed())
    }
}

impl WatchClient for EtcdWatchClient {
    fn watch<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<ChangeStream, WatchError>> {
        self.open(prefix).boxed()
    }
}

/// End of the key range covering every key that starts with `prefix`.
///
/// Follows etcd's convention: increment the last byte that is not `0xff`
/// and truncate after it; `"\0"` means "to the end of the key space".
fn prefix_range_end(prefix: &str) -> Vec<u8> {
    let mut end = prefix.as_bytes().to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    vec![0]
}

fn parse_revision(value: &Value) -> Result<i64, WatchError> {
    match value {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| WatchError::Protocol(format!("invalid revision {n}"))),
        Value::String(s) => s
            .parse()
            .map_err(|_| WatchError::Protocol(format!("invalid revision {s:?}"))),
        other => Err(WatchError::Protocol(format!("invalid revision {other}"))),
    }
}

fn decode_text(encoded: &str) -> Result<String, WatchError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| WatchError::Protocol(format!("invalid base64: {e}")))?;
    String::from_utf8(bytes).map_err(|e| WatchError::Protocol(format!("invalid utf-8: {e}")))
}

/// Decodes one line of the `/v3/watch` response.
fn decode_watch_line(line: &[u8]) -> Result<Vec<ChangeEvent>, WatchError> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return Ok(Vec::new());
    }

    let message: WatchMessage = serde_json::from_slice(line)
        .map_err(|e| WatchError::Protocol(format!("invalid watch message: {e}")))?;
    if let Some(error) = message.error {
        return Err(WatchError::Protocol(error.message));
    }
    let result = message.result.unwrap_or_default();
    if result.canceled {
        return Err(WatchError::Protocol(format!(
            "watch canceled: {}",
            result.cancel_reason
        )));
    }

    Ok(result
        .events
        .iter()
        .filter_map(|event| skip_undecodable(decode_kv(event.kind.as_deref(), &event.kv)))
        .collect())
}

/// Decodes one key-value pair; `kind` is the watch event type, if any.
fn decode_kv(kind: Option<&str>, kv: &KeyValue) -> Result<ChangeEvent, WatchError> {
    let key = decode_text(&kv.key)?;
    Ok(match kind {
        Some("DELETE") => ChangeEvent::delete(key),
        _ => ChangeEvent::put(key, decode_text(&kv.value)?),
    })
}

/// Undecodable pairs are dropped so the rest of the batch still applies.
fn skip_undecodable(decoded: Result<ChangeEvent, WatchError>) -> Option<ChangeEvent> {
    decoded
        .inspect_err(|error| tracing::warn!(%error, "Dropping undecodable etcd key-value"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(s: &str) -> String {
        BASE64.encode(s)
    }

    #[test]
    fn test_prefix_range_end() {
        assert_eq!(prefix_range_end("/dev/Doc/swg/"), b"/dev/Doc/swg0".to_vec());
        assert_eq!(prefix_range_end("a"), b"b".to_vec());
        assert_eq!(prefix_range_end(""), vec![0]);
    }

    #[test]
    fn test_parse_revision() {
        assert_eq!(parse_revision(&json!("42")).unwrap(), 42);
        assert_eq!(parse_revision(&json!(7)).unwrap(), 7);
        assert_eq!(parse_revision(&Value::Null).unwrap(), 0);
        assert!(parse_revision(&json!("x")).is_err());
    }

    #[test]
    fn test_decode_watch_line_put_and_delete() {
        let line = json!({
            "result": {
                "header": {"revision": "12"},
                "events": [
                    {"kv": {"key": b64("/dev/Doc/swg/m/h/title"), "value": b64("M")}},
                    {"type": "DELETE", "kv": {"key": b64("/dev/Doc/swg/m/h/url")}}
                ]
            }
        })
        .to_string();

        let events = decode_watch_line(line.as_bytes()).unwrap();
        assert_eq!(
            events,
            vec![
                ChangeEvent::put("/dev/Doc/swg/m/h/title", "M"),
                ChangeEvent::delete("/dev/Doc/swg/m/h/url"),
            ]
        );
    }

    #[test]
    fn test_decode_watch_line_created_message_has_no_events() {
        let line = br#"{"result":{"header":{"revision":"3"},"created":true}}"#;
        assert!(decode_watch_line(line).unwrap().is_empty());
        assert!(decode_watch_line(b"  \n").unwrap().is_empty());
    }

    #[test]
    fn test_decode_watch_line_errors() {
        let canceled = br#"{"result":{"canceled":true,"cancel_reason":"compacted"}}"#;
        assert!(matches!(
            decode_watch_line(canceled),
            Err(WatchError::Protocol(ref msg)) if msg.contains("compacted")
        ));

        let gateway = br#"{"error":{"grpc_code":14,"message":"unavailable"}}"#;
        assert!(matches!(
            decode_watch_line(gateway),
            Err(WatchError::Protocol(ref msg)) if msg == "unavailable"
        ));

        assert!(decode_watch_line(b"not json").is_err());
    }

    #[test]
    fn test_decode_watch_line_skips_undecodable_events() {
        let not_utf8 = BASE64.encode([0xff_u8, 0xfe]);
        let line = json!({
            "result": {
                "events": [
                    {"kv": {"key": b64("/dev/Doc/swg/good/h/title"), "value": b64("Good")}},
                    {"kv": {"key": b64("/dev/Doc/swg/bad/h/title"), "value": not_utf8}},
                    {"kv": {"key": "!!!", "value": b64("x")}},
                    {"type": "DELETE", "kv": {"key": b64("/dev/Doc/swg/old/h/url")}}
                ]
            }
        })
        .to_string();

        let events = decode_watch_line(line.as_bytes()).unwrap();
        assert_eq!(
            events,
            vec![
                ChangeEvent::put("/dev/Doc/swg/good/h/title", "Good"),
                ChangeEvent::delete("/dev/Doc/swg/old/h/url"),
            ]
        );
    }

    #[test]
    fn test_decode_kv_reports_bad_encoding() {
        let kv = KeyValue {
            key: b64("/dev/Doc/swg/m/h/title"),
            value: BASE64.encode([0xff_u8]),
        };
        assert!(matches!(decode_kv(None, &kv), Err(WatchError::Protocol(_))));
        assert_eq!(
            decode_kv(Some("DELETE"), &kv).unwrap(),
            ChangeEvent::delete("/dev/Doc/swg/m/h/title")
        );
        assert!(skip_undecodable(decode_kv(None, &kv)).is_none());
    }

    #[test]
    fn test_endpoint_trailing_slash_trimmed() {
        let client = EtcdWatchClient::new("http://127.0.0.1:2379/");
        assert_eq!(client.endpoint, "http://127.0.0.1:2379");
    }
}
