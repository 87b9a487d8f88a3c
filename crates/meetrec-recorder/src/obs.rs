//! obs-websocket v5 control client.
//!
//! Frames are `{"op": <opcode>, "d": {...}}` text messages. The session opens
//! with Hello (0) → Identify (1) → Identified (2); afterwards each Request (6)
//! is answered by a RequestResponse (7) carrying the same `requestId`.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::{SinkExt, StreamExt};
use meetrec_core::error::{MeetRecError, Result};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const OP_HELLO: u64 = 0;
const OP_IDENTIFY: u64 = 1;
const OP_IDENTIFIED: u64 = 2;
const OP_REQUEST: u64 = 6;
const OP_REQUEST_RESPONSE: u64 = 7;

const RPC_VERSION: u64 = 1;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Authentication string for the Identify message.
pub fn auth_response(password: &str, salt: &str, challenge: &str) -> String {
    let secret = STANDARD.encode(Sha256::digest(format!("{password}{salt}").as_bytes()));
    STANDARD.encode(Sha256::digest(format!("{secret}{challenge}").as_bytes()))
}

/// Split a text frame into `(op, d)`.
fn parse_frame(text: &str) -> Result<(u64, Value)> {
    let mut frame: Value = serde_json::from_str(text)?;
    let op = frame["op"]
        .as_u64()
        .ok_or_else(|| MeetRecError::recorder(format!("Frame without opcode: {text}")))?;
    Ok((op, frame["d"].take()))
}

fn frame(op: u64, d: Value) -> WsMessage {
    WsMessage::Text(json!({ "op": op, "d": d }).to_string())
}

/// Build the Identify payload answering a Hello.
fn identify_payload(hello: &Value, password: &str) -> Result<Value> {
    let mut identify = json!({ "rpcVersion": RPC_VERSION, "eventSubscriptions": 0 });
    if let Some(auth) = hello.get("authentication") {
        if password.is_empty() {
            return Err(MeetRecError::recorder(
                "Recorder requires a websocket password but none is configured",
            ));
        }
        let challenge = auth["challenge"].as_str().unwrap_or_default();
        let salt = auth["salt"].as_str().unwrap_or_default();
        identify["authentication"] = json!(auth_response(password, salt, challenge));
    }
    Ok(identify)
}

/// Unwrap a RequestResponse into its `responseData`.
fn response_data(request_type: &str, d: &Value) -> Result<Value> {
    let status = &d["requestStatus"];
    if status["result"].as_bool() != Some(true) {
        return Err(MeetRecError::recorder(format!(
            "{request_type} rejected (code {}): {}",
            status["code"].as_i64().unwrap_or_default(),
            status["comment"].as_str().unwrap_or("no comment")
        )));
    }
    Ok(d.get("responseData").cloned().unwrap_or(Value::Null))
}

async fn send_frame(ws: &mut WsStream, op: u64, d: Value) -> Result<()> {
    ws.send(frame(op, d))
        .await
        .map_err(|e| MeetRecError::recorder(format!("WebSocket send failed: {e}")))
}

/// Read frames until one with opcode `want` arrives; others are skipped.
async fn read_op(ws: &mut WsStream, want: u64) -> Result<Value> {
    while let Some(msg) = ws.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                let (op, d) = parse_frame(&text)?;
                if op == want {
                    return Ok(d);
                }
                tracing::trace!("obs frame op={op} skipped");
            }
            Ok(WsMessage::Close(close)) => {
                let reason = close
                    .map(|c| format!("{} {}", u16::from(c.code), c.reason))
                    .unwrap_or_else(|| "no reason".into());
                return Err(MeetRecError::recorder(format!("Recorder closed the session: {reason}")));
            }
            Ok(_) => {}
            Err(e) => return Err(MeetRecError::recorder(format!("WebSocket error: {e}"))),
        }
    }
    Err(MeetRecError::recorder("Recorder connection ended"))
}

/// An identified obs-websocket session.
pub struct ObsClient {
    ws: WsStream,
    request_timeout: Duration,
}

impl ObsClient {
    /// Open the socket and complete the handshake within `timeout`.
    pub async fn connect(url: &str, password: &str, timeout: Duration) -> Result<Self> {
        let handshake = async {
            let (mut ws, _response) = tokio_tungstenite::connect_async(url)
                .await
                .map_err(|e| MeetRecError::recorder(format!("WebSocket connect failed: {e}")))?;

            let hello = read_op(&mut ws, OP_HELLO).await?;
            tracing::debug!(
                "obs hello: websocket {} rpc {}",
                hello["obsWebSocketVersion"].as_str().unwrap_or("?"),
                hello["rpcVersion"]
            );
            send_frame(&mut ws, OP_IDENTIFY, identify_payload(&hello, password)?).await?;
            read_op(&mut ws, OP_IDENTIFIED).await?;
            Ok::<_, MeetRecError>(ws)
        };

        let ws = tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| MeetRecError::Timeout(format!("Recorder handshake with {url}")))??;

        Ok(Self {
            ws,
            request_timeout: timeout,
        })
    }

    /// Send one request and wait for its response.
    pub async fn request(&mut self, request_type: &str, data: Option<Value>) -> Result<Value> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let mut d = json!({ "requestType": request_type, "requestId": request_id });
        if let Some(data) = data {
            d["requestData"] = data;
        }

        let ws = &mut self.ws;
        let exchange = async {
            send_frame(ws, OP_REQUEST, d).await?;
            loop {
                let resp = read_op(ws, OP_REQUEST_RESPONSE).await?;
                if resp["requestId"].as_str() == Some(request_id.as_str()) {
                    return Ok::<_, MeetRecError>(resp);
                }
            }
        };

        let resp = tokio::time::timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| MeetRecError::Timeout(format!("Recorder request {request_type}")))??;
        response_data(request_type, &resp)
    }

    pub async fn get_version(&mut self) -> Result<String> {
        let data = self.request("GetVersion", None).await?;
        Ok(data["obsVersion"].as_str().unwrap_or("unknown").to_string())
    }

    pub async fn set_current_program_scene(&mut self, scene: &str) -> Result<()> {
        self.request("SetCurrentProgramScene", Some(json!({ "sceneName": scene })))
            .await
            .map(|_| ())
    }

    /// Whether the record output is active.
    pub async fn get_record_status(&mut self) -> Result<bool> {
        let data = self.request("GetRecordStatus", None).await?;
        Ok(data["outputActive"].as_bool().unwrap_or(false))
    }

    pub async fn start_record(&mut self) -> Result<()> {
        self.request("StartRecord", None).await.map(|_| ())
    }

    /// Stop recording; returns the written file path when reported.
    pub async fn stop_record(&mut self) -> Result<Option<String>> {
        let data = self.request("StopRecord", None).await?;
        Ok(data["outputPath"].as_str().map(str::to_string))
    }

    /// `(itemName, itemValue)` pairs of a list property on an input.
    pub async fn input_property_items(
        &mut self,
        input: &str,
        property: &str,
    ) -> Result<Vec<(String, String)>> {
        let data = self
            .request(
                "GetInputPropertiesListPropertyItems",
                Some(json!({ "inputName": input, "propertyName": property })),
            )
            .await?;
        Ok(data["propertyItems"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|i| {
                        (
                            i["itemName"].as_str().unwrap_or_default().to_string(),
                            i["itemValue"].as_str().unwrap_or_default().to_string(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn set_input_settings(&mut self, input: &str, settings: Value) -> Result<()> {
        self.request(
            "SetInputSettings",
            Some(json!({ "inputName": input, "inputSettings": settings })),
        )
        .await
        .map(|_| ())
    }

    pub async fn close(mut self) {
        if let Err(e) = self.ws.close(None).await {
            tracing::debug!("obs close: {e}");
        }
    }
}
