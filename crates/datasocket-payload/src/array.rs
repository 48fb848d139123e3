use std::borrow::Cow;
use std::io::{Cursor, Read, Seek};
use std::time::SystemTime;

use bytes::Bytes;
use ndarray::{arr0, ArrayD, ArrayViewD, IxDyn, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter};
use serde_json::Value;
use tracing::trace;

use crate::codec::{unix_seconds, unsupported, PayloadCodec};
use crate::error::{CodecError, Result};
use crate::format::Format;
use crate::payload::{ArrayBundle, Payload, TIMESTAMP_KEY};

/// ARRAY codec: a compressed NumPy `.npz` archive with one `.npy` entry per
/// named array.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArrayCodec;

impl PayloadCodec for ArrayCodec {
    fn format(&self) -> Format {
        Format::Array
    }

    fn encode(&self, payload: &Payload, timestamp: Option<SystemTime>) -> Result<Bytes> {
        let bundle = match payload {
            Payload::Array(bundle) => Cow::Borrowed(bundle),
            Payload::Text(value) => Cow::Owned(ArrayBundle::single(json_to_array(value)?)),
            other => return Err(unsupported(Format::Array, other)),
        };

        let mut npz = NpzWriter::new_compressed(Cursor::new(Vec::new()));
        for (name, array) in bundle.iter() {
            if timestamp.is_some() && name == TIMESTAMP_KEY {
                continue;
            }
            npz.add_array(name, array)?;
        }
        if let Some(time) = timestamp {
            npz.add_array(TIMESTAMP_KEY, &arr0(unix_seconds(time)))?;
        }

        let encoded = npz.finish()?.into_inner();
        trace!(arrays = bundle.len(), len = encoded.len(), "encoded npz");
        Ok(Bytes::from(encoded))
    }

    fn decode(&self, bytes: Bytes) -> Result<Payload> {
        let mut npz = NpzReader::new(Cursor::new(bytes))?;
        let mut bundle = ArrayBundle::new();
        for entry in npz.names()? {
            let array = read_as_f64(&mut npz, &entry)?;
            let name = entry.strip_suffix(".npy").unwrap_or(&entry);
            bundle.insert(name, array);
        }
        Ok(Payload::Array(bundle))
    }
}

/// Read one archive entry, widening common numeric dtypes to `f64`.
fn read_as_f64<R: Read + Seek>(npz: &mut NpzReader<R>, entry: &str) -> Result<ArrayD<f64>> {
    let err = match npz.by_name::<OwnedRepr<f64>, IxDyn>(entry) {
        Ok(array) => return Ok(array),
        Err(err) => err,
    };
    if let Ok(array) = npz.by_name::<OwnedRepr<f32>, IxDyn>(entry) {
        return Ok(array.mapv(f64::from));
    }
    if let Ok(array) = npz.by_name::<OwnedRepr<i64>, IxDyn>(entry) {
        return Ok(array.mapv(|v| v as f64));
    }
    if let Ok(array) = npz.by_name::<OwnedRepr<i32>, IxDyn>(entry) {
        return Ok(array.mapv(f64::from));
    }
    if let Ok(array) = npz.by_name::<OwnedRepr<u8>, IxDyn>(entry) {
        return Ok(array.mapv(f64::from));
    }
    Err(err.into())
}

/// Convert a nested JSON list of numbers into an n-dimensional array.
///
/// The shape is taken from the first element at every depth; ragged or
/// non-numeric input is rejected. A bare number becomes a 0-d array.
pub fn json_to_array(value: &Value) -> Result<ArrayD<f64>> {
    let mut shape = Vec::new();
    let mut cursor = value;
    while let Value::Array(items) = cursor {
        shape.push(items.len());
        match items.first() {
            Some(first) => cursor = first,
            None => break,
        }
    }

    let mut flat = Vec::with_capacity(shape.iter().product());
    flatten_json(value, &shape, &mut flat)?;
    ArrayD::from_shape_vec(IxDyn(&shape), flat).map_err(|err| CodecError::Shape(err.to_string()))
}

fn flatten_json(value: &Value, shape: &[usize], out: &mut Vec<f64>) -> Result<()> {
    match (value, shape.split_first()) {
        (Value::Array(items), Some((&len, rest))) if items.len() == len => items
            .iter()
            .try_for_each(|item| flatten_json(item, rest, out)),
        (Value::Number(number), None) => {
            let v = number
                .as_f64()
                .ok_or_else(|| CodecError::Shape(format!("{number} is not representable as f64")))?;
            out.push(v);
            Ok(())
        }
        _ => Err(CodecError::Shape(
            "expected a rectangular list of numbers".to_string(),
        )),
    }
}

/// Convert an array into nested JSON lists. Non-finite values become `null`.
pub fn array_to_json(array: ArrayViewD<'_, f64>) -> Value {
    if array.ndim() == 0 {
        return array
            .iter()
            .next()
            .and_then(|v| serde_json::Number::from_f64(*v))
            .map_or(Value::Null, Value::Number);
    }
    Value::Array(array.outer_iter().map(array_to_json).collect())
}
