use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;

/// Optional key/value pairs persisted next to a blob.
pub type BlobMetadata = BTreeMap<String, String>;

/// Reserved metadata key, re-emitted as `Content-Type` on retrieval.
pub const MIME_TYPE_KEY: &str = "X-Mime-Type";

/// Headers with this (case-insensitive) prefix are carried as metadata.
pub const METADATA_HEADER_PREFIX: &str = "x-meta-";

/// Collects the metadata-bearing headers of a request or response.
pub fn metadata_from_headers(headers: &HeaderMap) -> BlobMetadata {
    let mut metadata = BlobMetadata::new();

    for (name, value) in headers {
        let name = name.as_str();
        if name != "x-mime-type" && !name.starts_with(METADATA_HEADER_PREFIX) {
            continue;
        }
        // Only visible-ASCII values can be re-emitted as headers later.
        let Ok(value) = value.to_str() else {
            tracing::debug!("Ignoring non-ASCII metadata header {}", name);
            continue;
        };
        metadata.insert(canonical_key(name), value.to_string());
    }

    metadata
}

/// Renders metadata as headers. `X-Mime-Type` additionally sets `Content-Type`.
pub fn metadata_headers(metadata: &BlobMetadata) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (key, value) in metadata {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            tracing::warn!("Skipping metadata entry that is not a valid header: {}", key);
            continue;
        };

        if key.eq_ignore_ascii_case(MIME_TYPE_KEY) {
            headers.insert(CONTENT_TYPE, value.clone());
        }
        headers.insert(name, value);
    }

    headers
}

/// `x-meta-owner` -> `X-Meta-Owner`.
fn canonical_key(name: &str) -> String {
    name.split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
