//! Gzip-compressed JSON documents shared by the library file and snapshots.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Failures while reading or writing a persisted document.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("document is not valid gzip/json: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("document stream failed: {0}")]
    Stream(#[from] std::io::Error),
}

/// Named byte blobs, serialized as a JSON object of base64 strings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobMap(#[serde(with = "base64_map")] pub BTreeMap<String, Vec<u8>>);

impl BlobMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.0.get(name).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.0
            .iter()
            .map(|(name, bytes)| (name.as_str(), bytes.as_slice()))
    }
}

impl FromIterator<(String, Vec<u8>)> for BlobMap {
    fn from_iter<I: IntoIterator<Item = (String, Vec<u8>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Serializes `value` as JSON and gzips it into `writer`.
///
/// # Errors
/// Returns an error when serialization or the underlying stream fails.
pub fn encode_document<T, W>(value: &T, writer: W) -> Result<(), CodecError>
where
    T: Serialize + ?Sized,
    W: Write,
{
    let mut encoder = GzEncoder::new(writer, Compression::default());
    serde_json::to_writer(&mut encoder, value)?;
    encoder.finish()?.flush()?;
    Ok(())
}

/// Gunzips `reader` and deserializes the JSON document inside.
///
/// # Errors
/// Returns an error when the stream is not gzip or the payload does not match `T`.
pub fn decode_document<T, R>(reader: R) -> Result<T, CodecError>
where
    T: DeserializeOwned,
    R: Read,
{
    let decoder = GzDecoder::new(reader);
    // gzip failures surface as io errors wrapped by serde_json
    Ok(serde_json::from_reader(decoder)?)
}

mod base64_map {
    use std::collections::BTreeMap;

    use base64::prelude::{Engine as _, BASE64_STANDARD};
    use serde::{de::Error as _, ser::SerializeMap, Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(
        map: &BTreeMap<String, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut out = serializer.serialize_map(Some(map.len()))?;
        for (name, bytes) in map {
            out.serialize_entry(name, &BASE64_STANDARD.encode(bytes))?;
        }
        out.end()
    }

    pub(super) fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(name, encoded)| {
                BASE64_STANDARD
                    .decode(encoded.as_bytes())
                    .map(|bytes| (name, bytes))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}
