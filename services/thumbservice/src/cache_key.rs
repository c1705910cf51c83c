//! Content-addressed object keys for rendered thumbnails.

use crate::frame::ThumbnailParams;
use sha2::{Digest, Sha256};
use std::fmt;

/// Object key of a rendered thumbnail: `{frame_id}.{sha256(params)}.jpg`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the cache key for a frame rendered with `params`
///
/// The digest covers the JSON encoding of every rendering parameter, so any
/// change to width, height, label, colour, median, percentile or quality gives
/// a different key, and the same inputs give the same key in every process.
pub fn derive_key(frame_id: i64, params: &ThumbnailParams) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(frame_id.to_string().as_bytes());
    hasher.update(b"\0");
    // ThumbnailParams only holds plain scalars and strings
    let params_json = serde_json::to_vec(params).unwrap_or_default();
    hasher.update(&params_json);

    CacheKey(format!("{}.{:x}.jpg", frame_id, hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_deterministic() {
        let params = ThumbnailParams::default();
        assert_eq!(derive_key(11245132, &params), derive_key(11245132, &params.clone()));
    }

    #[test]
    fn test_key_format() {
        let key = derive_key(11245132, &ThumbnailParams::default());
        let parts: Vec<&str> = key.as_str().split('.').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "11245132");
        assert_eq!(parts[1].len(), 64);
        assert!(parts[1].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(parts[2], "jpg");
    }

    #[test]
    fn test_every_field_changes_key() {
        let base = ThumbnailParams::default();
        let variants = vec![
            ThumbnailParams { width: 201, ..base.clone() },
            ThumbnailParams { height: 199, ..base.clone() },
            ThumbnailParams { label_text: Some("M42".into()), ..base.clone() },
            ThumbnailParams { label_text: Some(String::new()), ..base.clone() },
            ThumbnailParams { color: true, ..base.clone() },
            ThumbnailParams { median: true, ..base.clone() },
            ThumbnailParams { percentile: 99.0, ..base.clone() },
            ThumbnailParams { quality: 95, ..base.clone() },
        ];

        let base_key = derive_key(1, &base);
        let mut seen = vec![base_key.clone()];
        for params in &variants {
            let key = derive_key(1, params);
            assert!(!seen.contains(&key), "collision for {:?}", params);
            seen.push(key);
        }

        assert_ne!(derive_key(2, &base), base_key);
    }

    #[test]
    fn test_width_height_not_interchangeable() {
        let a = ThumbnailParams { width: 100, height: 300, ..Default::default() };
        let b = ThumbnailParams { width: 300, height: 100, ..Default::default() };
        assert_ne!(derive_key(5, &a), derive_key(5, &b));
    }
}
