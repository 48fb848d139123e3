use std::time::SystemTime;

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::array::array_to_json;
use crate::codec::{unix_seconds, unsupported, PayloadCodec};
use crate::error::Result;
use crate::format::Format;
use crate::payload::{ArrayBundle, Payload, DATA_KEY, TIMESTAMP_KEY};

/// TEXT codec: UTF-8 JSON.
///
/// With a timestamp the document is wrapped as
/// `{"data": <value>, "timestamp": <seconds>}`. Decoding returns the
/// document as received; the wrapper is not removed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextCodec;

impl PayloadCodec for TextCodec {
    fn format(&self) -> Format {
        Format::Text
    }

    fn encode(&self, payload: &Payload, timestamp: Option<SystemTime>) -> Result<Bytes> {
        let value = match payload {
            Payload::Text(value) => value.clone(),
            Payload::Array(bundle) => bundle_to_json(bundle),
            other => return Err(unsupported(Format::Text, other)),
        };

        let value = match timestamp {
            Some(time) => {
                let mut wrapper = Map::with_capacity(2);
                wrapper.insert(DATA_KEY.to_string(), value);
                wrapper.insert(TIMESTAMP_KEY.to_string(), Value::from(unix_seconds(time)));
                Value::Object(wrapper)
            }
            None => value,
        };

        Ok(Bytes::from(serde_json::to_vec(&value)?))
    }

    fn decode(&self, bytes: Bytes) -> Result<Payload> {
        Ok(Payload::Text(serde_json::from_slice(&bytes)?))
    }
}

/// A lone `data` array becomes nested lists; several arrays become an
/// object of nested lists keyed by name.
fn bundle_to_json(bundle: &ArrayBundle) -> Value {
    if let (1, Some(data)) = (bundle.len(), bundle.data()) {
        return array_to_json(data.view());
    }
    Value::Object(
        bundle
            .iter()
            .map(|(name, array)| (name.to_string(), array_to_json(array.view())))
            .collect(),
    )
}
