// Protocol - Message types exchanged between nodes
//
// Payloads are JSON objects with a `type` discriminator:
// - transaction:   {"type":"transaction","data":{sender,recipient,amount}}
// - sync_request:  {"type":"sync_request"}
// - sync_response: {"type":"sync_response","data":[record, ...]}
// Anything else that is still a JSON object decodes as Unknown.

use crate::ledger::TransactionRecord;
use crate::wire::WireError;
use serde_json::{json, Map, Value};
use std::fmt;

const TYPE_FIELD: &str = "type";
const DATA_FIELD: &str = "data";

const TYPE_TRANSACTION: &str = "transaction";
const TYPE_SYNC_REQUEST: &str = "sync_request";
const TYPE_SYNC_RESPONSE: &str = "sync_response";

/// Types of messages in the protocol
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Transaction,
    SyncRequest,
    SyncResponse,
    Unknown,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Transaction => TYPE_TRANSACTION,
            Self::SyncRequest => TYPE_SYNC_REQUEST,
            Self::SyncResponse => TYPE_SYNC_RESPONSE,
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// One protocol message
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Push of a single record
    Transaction(TransactionRecord),
    /// Ask the peer for its full history
    SyncRequest,
    /// Full history, in the responder's insertion order
    SyncResponse(Vec<TransactionRecord>),
    /// Well-formed object with an unrecognized or missing `type`
    Unknown(Value),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Transaction(_) => MessageKind::Transaction,
            Self::SyncRequest => MessageKind::SyncRequest,
            Self::SyncResponse(_) => MessageKind::SyncResponse,
            Self::Unknown(_) => MessageKind::Unknown,
        }
    }

    /// Build the JSON payload for this message
    pub fn to_value(&self) -> Result<Value, WireError> {
        let value = match self {
            Self::Transaction(record) => json!({
                TYPE_FIELD: TYPE_TRANSACTION,
                DATA_FIELD: to_json(record)?,
            }),
            Self::SyncRequest => json!({ TYPE_FIELD: TYPE_SYNC_REQUEST }),
            Self::SyncResponse(records) => json!({
                TYPE_FIELD: TYPE_SYNC_RESPONSE,
                DATA_FIELD: to_json(records)?,
            }),
            Self::Unknown(raw) => raw.clone(),
        };
        Ok(value)
    }

    /// Validate a JSON payload and classify it
    pub fn from_value(value: Value) -> Result<Self, WireError> {
        let Value::Object(mut object) = value else {
            return Err(WireError::Format("payload is not a JSON object".to_string()));
        };

        let kind = match object.get(TYPE_FIELD).and_then(Value::as_str) {
            Some(TYPE_TRANSACTION) => MessageKind::Transaction,
            Some(TYPE_SYNC_REQUEST) => MessageKind::SyncRequest,
            Some(TYPE_SYNC_RESPONSE) => MessageKind::SyncResponse,
            _ => MessageKind::Unknown,
        };

        match kind {
            MessageKind::Transaction => {
                let data = take_data(&mut object, kind)?;
                let record = serde_json::from_value(data)
                    .map_err(|e| WireError::Format(format!("bad transaction data: {}", e)))?;
                Ok(Self::Transaction(record))
            }
            MessageKind::SyncRequest => Ok(Self::SyncRequest),
            MessageKind::SyncResponse => {
                let data = take_data(&mut object, kind)?;
                let records = serde_json::from_value(data)
                    .map_err(|e| WireError::Format(format!("bad sync_response data: {}", e)))?;
                Ok(Self::SyncResponse(records))
            }
            MessageKind::Unknown => Ok(Self::Unknown(Value::Object(object))),
        }
    }

    /// Serialize to payload bytes (no frame header)
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(&self.to_value()?).map_err(|e| WireError::Encode(e.to_string()))
    }

    /// Deserialize from payload bytes (no frame header)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| WireError::Format(format!("invalid JSON: {}", e)))?;
        Self::from_value(value)
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, WireError> {
    serde_json::to_value(value).map_err(|e| WireError::Encode(e.to_string()))
}

fn take_data(object: &mut Map<String, Value>, kind: MessageKind) -> Result<Value, WireError> {
    object
        .remove(DATA_FIELD)
        .ok_or_else(|| WireError::Format(format!("{} message without data", kind)))
}
