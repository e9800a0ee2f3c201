use serde::Deserialize;

use crate::common::constants::KLINE_TOPIC_PREFIX;
use crate::historical::structs::Candle;
use crate::websocket::types::WebSocketError;

/// Multiplexed stream envelope: `{"stream": topic, "data": {"d": {"u": [...]}}}`
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEnvelope {
    pub stream: Option<String>,
    pub data: Option<serde_json::Value>,
    /// Present on subscribe/unsubscribe acknowledgements
    pub result: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
}

/// Kline payload values: `[open, high, low, close, volume, open_time_ms]`
#[derive(Debug, Clone, Deserialize)]
struct KlineData {
    #[serde(rename = "d")]
    detail: KlineDetail,
}

#[derive(Debug, Clone, Deserialize)]
struct KlineDetail {
    #[serde(rename = "u")]
    values: Vec<serde_json::Value>,
}

/// One incremental bar update for a topic
#[derive(Debug, Clone, PartialEq)]
pub struct PushUpdate {
    pub topic: String,
    pub candle: Candle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushFrame {
    Kline(PushUpdate),
    /// Subscription acknowledgement
    Ack,
    /// Stream this crate does not consume
    Other(String),
}

pub fn parse_push_frame(text: &str) -> Result<PushFrame, WebSocketError> {
    let envelope: StreamEnvelope = serde_json::from_str(text)
        .map_err(|e| WebSocketError::Parse(format!("Invalid push frame JSON: {}", e)))?;

    if envelope.result.is_some() || (envelope.stream.is_none() && envelope.id.is_some()) {
        return Ok(PushFrame::Ack);
    }

    let Some(topic) = envelope.stream else {
        return Err(WebSocketError::MalformedPayload("frame has no stream".to_string()));
    };

    if !topic.starts_with(&format!("{}@", KLINE_TOPIC_PREFIX)) {
        return Ok(PushFrame::Other(topic));
    }

    let data = envelope
        .data
        .ok_or_else(|| WebSocketError::MalformedPayload(format!("{}: missing data", topic)))?;
    let kline: KlineData = serde_json::from_value(data)
        .map_err(|e| WebSocketError::MalformedPayload(format!("{}: {}", topic, e)))?;

    let candle = kline_values_to_candle(&topic, &kline.detail.values)?;
    Ok(PushFrame::Kline(PushUpdate { topic, candle }))
}

fn kline_values_to_candle(topic: &str, values: &[serde_json::Value]) -> Result<Candle, WebSocketError> {
    if values.len() < 6 {
        return Err(WebSocketError::MalformedPayload(format!(
            "{}: expected 6 kline values, got {}",
            topic,
            values.len()
        )));
    }

    let number = |index: usize| -> Result<f64, WebSocketError> {
        let parsed = match &values[index] {
            serde_json::Value::String(s) => s.parse::<f64>().ok(),
            serde_json::Value::Number(n) => n.as_f64(),
            _ => None,
        };
        parsed.ok_or_else(|| {
            WebSocketError::MalformedPayload(format!("{}: invalid value at {}: {}", topic, index, values[index]))
        })
    };

    let candle = Candle::new(
        number(5)? as i64,
        number(0)?,
        number(1)?,
        number(2)?,
        number(3)?,
        number(4)?,
    );

    if !candle.is_well_formed() {
        return Err(WebSocketError::MalformedPayload(format!("{}: {:?}", topic, candle)));
    }
    Ok(candle)
}
