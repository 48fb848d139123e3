use std::collections::BTreeMap;

use bytes::Bytes;
use ndarray::ArrayD;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::format::Format;

/// Name under which a single array is stored.
pub const DATA_KEY: &str = "data";

/// Name of the delivery timestamp added by senders that request one.
pub const TIMESTAMP_KEY: &str = "timestamp";

/// A decoded message.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Named `f64` arrays.
    Array(ArrayBundle),
    /// A JSON value.
    Text(serde_json::Value),
    /// Path-addressed byte blobs.
    Container(Container),
    /// Opaque bytes.
    Raw(Bytes),
}

impl Payload {
    /// Serialize any value into a TEXT payload.
    pub fn text<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Payload::Text(serde_json::to_value(value)?))
    }

    /// Format this payload naturally belongs to.
    pub fn format(&self) -> Format {
        match self {
            Payload::Array(_) => Format::Array,
            Payload::Text(_) => Format::Text,
            Payload::Container(_) => Format::Container,
            Payload::Raw(_) => Format::Raw,
        }
    }

    /// Short kind name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Array(_) => "array",
            Payload::Text(_) => "text",
            Payload::Container(_) => "container",
            Payload::Raw(_) => "raw",
        }
    }

    pub fn as_array(&self) -> Option<&ArrayBundle> {
        match self {
            Payload::Array(bundle) => Some(bundle),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_container(&self) -> Option<&Container> {
        match self {
            Payload::Container(container) => Some(container),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> Option<&Bytes> {
        match self {
            Payload::Raw(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Deserialize a TEXT payload into a typed value.
    ///
    /// Returns `Ok(None)` for non-text payloads.
    pub fn parse_text<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self {
            Payload::Text(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            _ => Ok(None),
        }
    }
}

impl From<ArrayD<f64>> for Payload {
    fn from(array: ArrayD<f64>) -> Self {
        Payload::Array(ArrayBundle::single(array))
    }
}

impl From<ArrayBundle> for Payload {
    fn from(bundle: ArrayBundle) -> Self {
        Payload::Array(bundle)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Text(value)
    }
}

impl From<Container> for Payload {
    fn from(container: Container) -> Self {
        Payload::Container(container)
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Raw(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Raw(Bytes::from(bytes))
    }
}

/// Named n-dimensional arrays, kept in name order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArrayBundle {
    arrays: BTreeMap<String, ArrayD<f64>>,
}

impl ArrayBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bundle holding one array under [`DATA_KEY`].
    pub fn single(array: ArrayD<f64>) -> Self {
        let mut bundle = Self::new();
        bundle.insert(DATA_KEY, array);
        bundle
    }

    /// Add or replace a named array, returning the previous one.
    pub fn insert(&mut self, name: impl Into<String>, array: ArrayD<f64>) -> Option<ArrayD<f64>> {
        self.arrays.insert(name.into(), array)
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f64>> {
        self.arrays.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<ArrayD<f64>> {
        self.arrays.remove(name)
    }

    /// The array stored under [`DATA_KEY`].
    pub fn data(&self) -> Option<&ArrayD<f64>> {
        self.get(DATA_KEY)
    }

    /// Delivery timestamp (seconds since the UNIX epoch), if the sender added one.
    pub fn timestamp(&self) -> Option<f64> {
        self.get(TIMESTAMP_KEY)
            .filter(|array| array.len() == 1)
            .and_then(|array| array.iter().next().copied())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.arrays.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArrayD<f64>)> {
        self.arrays.iter().map(|(name, array)| (name.as_str(), array))
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<String, ArrayD<f64>> {
        self.arrays
    }
}

impl FromIterator<(String, ArrayD<f64>)> for ArrayBundle {
    fn from_iter<I: IntoIterator<Item = (String, ArrayD<f64>)>>(iter: I) -> Self {
        Self {
            arrays: iter.into_iter().collect(),
        }
    }
}

/// Byte blobs addressed by `/`-separated paths, like files in an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Container {
    entries: BTreeMap<String, Bytes>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` at `path`. Leading and repeated separators are dropped,
    /// so `"/a//b"` and `"a/b"` name the same entry.
    pub fn insert(&mut self, path: &str, data: impl Into<Bytes>) -> Option<Bytes> {
        self.entries.insert(normalize_path(path), data.into())
    }

    pub fn get(&self, path: &str) -> Option<&Bytes> {
        self.entries.get(&normalize_path(path))
    }

    pub fn remove(&mut self, path: &str) -> Option<Bytes> {
        self.entries.remove(&normalize_path(path))
    }

    /// Entries directly or indirectly below `prefix`.
    pub fn group<'a>(&'a self, prefix: &str) -> impl Iterator<Item = (&'a str, &'a Bytes)> + 'a {
        let mut prefix = normalize_path(prefix);
        if !prefix.is_empty() {
            prefix.push('/');
        }
        self.entries
            .iter()
            .filter(move |(path, _)| path.starts_with(&prefix))
            .map(|(path, data)| (path.as_str(), data))
    }

    /// Delivery timestamp (seconds since the UNIX epoch), if the sender added one.
    pub fn timestamp(&self) -> Option<f64> {
        let bytes: [u8; 8] = self.entries.get(TIMESTAMP_KEY)?.as_ref().try_into().ok()?;
        Some(f64::from_le_bytes(bytes))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.entries.iter().map(|(path, data)| (path.as_str(), data))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use ndarray::IxDyn;
    use serde_json::json;

    use super::*;

    #[test]
    fn single_array_is_stored_as_data() {
        let payload = Payload::from(ArrayD::<f64>::zeros(IxDyn(&[2, 3])));
        let bundle = payload.as_array().unwrap();
        assert_eq!(bundle.len(), 1);
        assert_eq!(bundle.data().unwrap().shape(), &[2, 3]);
        assert_eq!(payload.format(), Format::Array);
    }

    #[test]
    fn text_helper_serializes() {
        let payload = Payload::text(&vec![1, 2, 3]).unwrap();
        assert_eq!(payload.as_text().unwrap(), &json!([1, 2, 3]));
        let back: Vec<i32> = payload.parse_text().unwrap().unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }

    #[test]
    fn parse_text_on_other_kinds_is_none() {
        let payload = Payload::from(vec![1u8, 2]);
        assert!(payload.parse_text::<Vec<u8>>().unwrap().is_none());
        assert_eq!(payload.kind(), "raw");
    }

    #[test]
    fn container_paths_are_normalized() {
        let mut container = Container::new();
        container.insert("/group//frame", Bytes::from_static(b"abc"));
        assert_eq!(container.get("group/frame").unwrap().as_ref(), b"abc");
        assert_eq!(container.paths().collect::<Vec<_>>(), vec!["group/frame"]);
    }

    #[test]
    fn container_group_lists_children() {
        let mut container = Container::new();
        container.insert("a/x", Bytes::from_static(b"1"));
        container.insert("a/y/z", Bytes::from_static(b"2"));
        container.insert("ab", Bytes::from_static(b"3"));

        let children: Vec<_> = container.group("a").map(|(path, _)| path).collect();
        assert_eq!(children, vec!["a/x", "a/y/z"]);
        assert_eq!(container.group("").count(), 3);
    }

    #[test]
    fn timestamps_are_read_back() {
        let mut bundle = ArrayBundle::new();
        bundle.insert(TIMESTAMP_KEY, ArrayD::from_elem(IxDyn(&[]), 12.5));
        assert_eq!(bundle.timestamp(), Some(12.5));

        let mut container = Container::new();
        container.insert(TIMESTAMP_KEY, Bytes::copy_from_slice(&3.25f64.to_le_bytes()));
        assert_eq!(container.timestamp(), Some(3.25));

        container.insert(TIMESTAMP_KEY, Bytes::from_static(b"bad"));
        assert_eq!(container.timestamp(), None);
    }
}
