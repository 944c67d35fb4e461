use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::WatcherError;
use crate::logging::{LogContext, MetricsLogger};
use crate::models::BlockRef;

use super::rpc_client::parse_hex_to_u64;

const SUBSCRIBE_REQUEST_ID: u64 = 1;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A live `eth_subscribe("newHeads")` subscription
pub struct HeadStream {
    ws: WsStream,
    endpoint: String,
    subscription_id: String,
}

impl HeadStream {
    /// Connect and subscribe. Waits up to `subscribe_timeout` for the
    /// subscription to be acknowledged.
    pub async fn open(endpoint: &str, subscribe_timeout: Duration) -> Result<Self, WatcherError> {
        let context = LogContext::new("head_stream", "open").with_metadata("endpoint", serde_json::json!(endpoint));
        context.info("Connecting to head feed");

        let (mut ws, _) = connect_async(endpoint)
            .await
            .map_err(|e| WatcherError::Connection(format!("{}: {}", endpoint, e)))?;
        MetricsLogger::log_stream_event("connected", endpoint);

        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": SUBSCRIBE_REQUEST_ID,
            "method": "eth_subscribe",
            "params": ["newHeads"]
        });
        ws.send(Message::Text(request.to_string()))
            .await
            .map_err(|e| WatcherError::Connection(format!("Failed to send eth_subscribe: {}", e)))?;

        let subscription_id = timeout(subscribe_timeout, await_subscription_ack(&mut ws))
            .await
            .map_err(|_| {
                WatcherError::Subscription(format!(
                    "No acknowledgment within {}s",
                    subscribe_timeout.as_secs()
                ))
            })??;

        MetricsLogger::log_stream_event("subscribed", endpoint);
        context
            .with_metadata("subscription_id", serde_json::json!(subscription_id))
            .info("Subscribed to newHeads");

        Ok(Self {
            ws,
            endpoint: endpoint.to_string(),
            subscription_id,
        })
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// Next announced head. `Ok(None)` means the server closed the stream.
    pub async fn next_head(&mut self) -> Result<Option<BlockRef>, WatcherError> {
        while let Some(message) = self.ws.next().await {
            match message {
                Err(e) => return Err(WatcherError::Connection(e.to_string())),
                Ok(Message::Text(text)) => match parse_head(&text, &self.subscription_id) {
                    Some(Ok(head)) => return Ok(Some(head)),
                    Some(Err(reason)) => {
                        LogContext::new("head_stream", "next_head")
                            .with_metadata("endpoint", serde_json::json!(self.endpoint))
                            .warn(&format!("Skipping malformed head notification: {}", reason));
                    }
                    None => {}
                },
                Ok(Message::Ping(data)) => {
                    let _ = self.ws.send(Message::Pong(data)).await;
                }
                Ok(Message::Close(_)) => {
                    MetricsLogger::log_stream_event("closed_by_server", &self.endpoint);
                    return Ok(None);
                }
                Ok(_) => {}
            }
        }
        Ok(None)
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
        MetricsLogger::log_stream_event("closed", &self.endpoint);
    }
}

async fn await_subscription_ack(ws: &mut WsStream) -> Result<String, WatcherError> {
    while let Some(message) = ws.next().await {
        match message {
            Err(e) => return Err(WatcherError::Connection(e.to_string())),
            Ok(Message::Text(text)) => {
                if let Some(ack) = parse_subscription_ack(&text) {
                    return ack;
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = ws.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
        }
    }
    Err(WatcherError::Subscription(
        "Stream closed before the subscription was acknowledged".to_string(),
    ))
}

/// Interpret the reply to our `eth_subscribe` request. Other messages yield `None`.
pub(crate) fn parse_subscription_ack(text: &str) -> Option<Result<String, WatcherError>> {
    let v: Value = serde_json::from_str(text).ok()?;
    if v.get("id")?.as_u64()? != SUBSCRIBE_REQUEST_ID {
        return None;
    }

    if let Some(error) = v.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Some(Err(WatcherError::Subscription(format!("eth_subscribe rejected: {}", message))));
    }

    Some(
        v.get("result")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| WatcherError::Subscription("eth_subscribe returned no subscription id".to_string())),
    )
}

/// Parse an `eth_subscription` head notification.
///
/// Returns `None` for anything that is not a notification for `subscription_id`,
/// and `Some(Err)` for a notification missing its number or hash.
pub fn parse_head(text: &str, subscription_id: &str) -> Option<Result<BlockRef, String>> {
    let v: Value = serde_json::from_str(text).ok()?;

    if v.get("method")?.as_str()? != "eth_subscription" {
        return None;
    }

    let params = v.get("params")?;
    if let Some(id) = params.get("subscription").and_then(Value::as_str) {
        if id != subscription_id {
            return None;
        }
    }

    let Some(result) = params.get("result") else {
        return Some(Err("notification has no result".to_string()));
    };

    let Some(hash) = result.get("hash").and_then(Value::as_str) else {
        return Some(Err("head has no hash".to_string()));
    };
    let Some(number) = result.get("number").and_then(Value::as_str) else {
        return Some(Err("head has no number".to_string()));
    };

    Some(
        parse_hex_to_u64(number)
            .map(|number| BlockRef::new(number, hash))
            .map_err(|e| e.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head_message(subscription: &str, number: &str, hash: &str) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": {
                "subscription": subscription,
                "result": {"number": number, "hash": hash, "parentHash": "0x00"}
            }
        })
        .to_string()
    }

    #[test]
    fn test_parse_head() {
        let head = parse_head(&head_message("0xsub", "0x64", "0xh100"), "0xsub");
        assert_eq!(head, Some(Ok(BlockRef::new(100, "0xh100"))));
    }

    #[test]
    fn test_parse_head_ignores_other_messages() {
        // Subscription ack
        assert!(parse_head(r#"{"jsonrpc":"2.0","id":1,"result":"0xsub"}"#, "0xsub").is_none());
        // Another subscription on the same socket
        assert!(parse_head(&head_message("0xother", "0x1", "0xh1"), "0xsub").is_none());
        assert!(parse_head("not json", "0xsub").is_none());
    }

    #[test]
    fn test_parse_head_reports_malformed_notification() {
        let missing_hash = serde_json::json!({
            "method": "eth_subscription",
            "params": {"subscription": "0xsub", "result": {"number": "0x1"}}
        })
        .to_string();
        assert!(matches!(parse_head(&missing_hash, "0xsub"), Some(Err(_))));

        let bad_number = head_message("0xsub", "0xzz", "0xh1");
        assert!(matches!(parse_head(&bad_number, "0xsub"), Some(Err(_))));
    }

    #[test]
    fn test_parse_subscription_ack() {
        let ack = parse_subscription_ack(r#"{"jsonrpc":"2.0","id":1,"result":"0x9cef478923ff08bf67fde6c64013158d"}"#);
        assert_eq!(ack.unwrap().unwrap(), "0x9cef478923ff08bf67fde6c64013158d");

        let rejected = parse_subscription_ack(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"notifications not supported"}}"#);
        assert!(matches!(rejected, Some(Err(WatcherError::Subscription(msg))) if msg.contains("not supported")));

        assert!(parse_subscription_ack(r#"{"jsonrpc":"2.0","id":7,"result":"0x1"}"#).is_none());
        assert!(parse_subscription_ack(&head_message("0xsub", "0x1", "0xh1")).is_none());
    }

    #[tokio::test]
    async fn test_open_fails_when_endpoint_unreachable() {
        let result = HeadStream::open("ws://127.0.0.1:1", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(WatcherError::Connection(_))));
    }
}
