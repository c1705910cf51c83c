use crate::error::{Result, ThumbnailError};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Frame metadata as returned by the archive API
///
/// Only the fields the pipeline reads are modelled. `request_id` keeps the
/// difference between a missing key (`None`) and an explicit `null`
/// (`Some(None)`), because validation treats the two differently. The
/// archive may send the short spellings `obstype` and `filter` next to the
/// long ones; both are kept and the long spelling wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameDescriptor {
    /// Archive frame ID
    pub id: i64,
    /// Original filename, e.g. `ogg0m404-kb82-20190321-0273-e91.fits.fz`
    #[serde(default)]
    pub filename: Option<String>,
    /// Observation type (EXPOSE, BIAS, ...)
    #[serde(default)]
    pub configuration_type: Option<String>,
    /// Short spelling of `configuration_type`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obstype: Option<String>,
    /// Download URL for the raw frame
    #[serde(default)]
    pub url: Option<String>,
    /// Proposal the frame belongs to
    #[serde(default)]
    pub proposal_id: Option<String>,
    /// Observation request the frame was taken for
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Option<i64>>,
    /// Filter name (R, rp, V, B, ...)
    #[serde(default)]
    pub primary_optical_element: Option<String>,
    /// Short spelling of `primary_optical_element`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Processing level, 91 for the final reduced product
    #[serde(default)]
    pub reduction_level: Option<i64>,
}

fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Option<i64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<i64>::deserialize(deserializer).map(Some)
}

impl FrameDescriptor {
    /// Whether the descriptor carries a value for `key`
    ///
    /// `request_id` counts as present even when it is `null`.
    pub fn has_key(&self, key: &str) -> bool {
        match key {
            "id" => true,
            "filename" => self.filename.is_some(),
            "configuration_type" | "obstype" => self.obstype().is_some(),
            "url" => self.url.is_some(),
            "proposal_id" => self.proposal_id.is_some(),
            "request_id" => self.request_id.is_some(),
            "primary_optical_element" | "filter" => self.filter().is_some(),
            "reduction_level" => self.reduction_level.is_some(),
            _ => false,
        }
    }

    pub fn obstype(&self) -> Option<&str> {
        self.configuration_type
            .as_deref()
            .or(self.obstype.as_deref())
    }

    pub fn request_id(&self) -> Option<i64> {
        self.request_id.flatten()
    }

    pub fn filter(&self) -> Option<&str> {
        self.primary_optical_element
            .as_deref()
            .or(self.filter.as_deref())
    }

    /// Filename used for local copies, falling back to the frame ID
    pub fn local_name(&self) -> String {
        self.filename
            .clone()
            .unwrap_or_else(|| format!("{}.fits", self.id))
    }
}

/// How the client addressed the frame in the URL path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameRef {
    /// `GET /{numeric_frame_id}/`
    Id(i64),
    /// `GET /{frame_basename}/`
    Basename(String),
}

impl FrameRef {
    pub fn parse(segment: &str) -> Self {
        if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(id) = segment.parse() {
                return Self::Id(id);
            }
        }
        Self::Basename(segment.to_string())
    }
}

impl fmt::Display for FrameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Basename(name) => f.write_str(name),
        }
    }
}

/// Rendering parameters; every field changes the produced JPEG
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThumbnailParams {
    pub width: u32,
    pub height: u32,
    pub label_text: Option<String>,
    pub color: bool,
    pub median: bool,
    pub percentile: f64,
    pub quality: u32,
}

impl Default for ThumbnailParams {
    fn default() -> Self {
        Self {
            width: 200,
            height: 200,
            label_text: None,
            color: false,
            median: false,
            percentile: 99.5,
            quality: 80,
        }
    }
}

/// Raw query string of a thumbnail request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThumbnailQuery {
    pub width: Option<String>,
    pub height: Option<String>,
    pub label: Option<String>,
    pub color: Option<String>,
    pub median: Option<String>,
    pub percentile: Option<String>,
    pub quality: Option<String>,
    /// Redirect to the image instead of returning JSON
    pub image: Option<String>,
}

impl ThumbnailQuery {
    /// Build validated rendering parameters, applying defaults for absent values
    pub fn params(&self) -> Result<ThumbnailParams> {
        let defaults = ThumbnailParams::default();

        let params = ThumbnailParams {
            width: parse_number("width", self.width.as_deref(), defaults.width)?,
            height: parse_number("height", self.height.as_deref(), defaults.height)?,
            label_text: self.label.clone(),
            color: parse_flag("color", self.color.as_deref())?,
            median: parse_flag("median", self.median.as_deref())?,
            percentile: parse_number("percentile", self.percentile.as_deref(), defaults.percentile)?,
            quality: parse_number("quality", self.quality.as_deref(), defaults.quality)?,
        };

        if params.width == 0 || params.height == 0 {
            return Err(ThumbnailError::ValidationFailed(
                "width and height must be positive".to_string(),
            ));
        }
        if !(1..=100).contains(&params.quality) {
            return Err(ThumbnailError::ValidationFailed(
                "quality must be between 1 and 100".to_string(),
            ));
        }
        if !(params.percentile > 0.0 && params.percentile <= 100.0) {
            return Err(ThumbnailError::ValidationFailed(
                "percentile must be in (0, 100]".to_string(),
            ));
        }

        Ok(params)
    }

    /// Whether the client asked to be redirected to the image
    pub fn wants_image(&self) -> Result<bool> {
        parse_flag("image", self.image.as_deref())
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: Option<&str>, default: T) -> Result<T> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => value.parse().map_err(|_| {
            ThumbnailError::ValidationFailed(format!("invalid value for {name}: {value}"))
        }),
    }
}

fn parse_flag(name: &str, raw: Option<&str>) -> Result<bool> {
    let Some(value) = raw.map(str::trim) else {
        return Ok(false);
    };
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        _ => Err(ThumbnailError::ValidationFailed(format!(
            "invalid value for {name}: {value}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_id_presence() {
        let missing: FrameDescriptor =
            serde_json::from_value(json!({"id": 1, "filename": "a.fits"})).unwrap();
        let null: FrameDescriptor =
            serde_json::from_value(json!({"id": 1, "request_id": null})).unwrap();
        let set: FrameDescriptor =
            serde_json::from_value(json!({"id": 1, "request_id": 1756835})).unwrap();

        assert!(!missing.has_key("request_id"));
        assert!(null.has_key("request_id"));
        assert_eq!(null.request_id(), None);
        assert_eq!(set.request_id(), Some(1756835));
    }

    #[test]
    fn test_obstype_and_filter_aliases() {
        let frame: FrameDescriptor = serde_json::from_value(json!({
            "id": 7,
            "obstype": "EXPOSE",
            "filter": "rp"
        }))
        .unwrap();

        assert_eq!(frame.obstype(), Some("EXPOSE"));
        assert_eq!(frame.filter(), Some("rp"));
        assert_eq!(frame.local_name(), "7.fits");
        assert!(frame.has_key("configuration_type"));
    }

    #[test]
    fn test_both_spellings_present() {
        let frame: FrameDescriptor = serde_json::from_value(json!({
            "id": 11245132,
            "configuration_type": "EXPOSE",
            "obstype": "BIAS",
            "filename": "ogg0m404-kb82-20190321-0273-e91.fits.fz",
            "request_id": 1756835,
            "primary_optical_element": "rp",
            "filter": "R"
        }))
        .unwrap();

        assert_eq!(frame.obstype(), Some("EXPOSE"));
        assert_eq!(frame.filter(), Some("rp"));
    }

    #[test]
    fn test_frame_ref_parse() {
        assert_eq!(FrameRef::parse("11245132"), FrameRef::Id(11245132));
        assert_eq!(
            FrameRef::parse("ogg0m404-kb82-20190321-0273-e91"),
            FrameRef::Basename("ogg0m404-kb82-20190321-0273-e91".into())
        );
        assert_eq!(FrameRef::parse("12a"), FrameRef::Basename("12a".into()));
    }

    #[test]
    fn test_query_defaults() {
        let params = ThumbnailQuery::default().params().unwrap();
        assert_eq!(params, ThumbnailParams::default());
        assert!(!ThumbnailQuery::default().wants_image().unwrap());
    }

    #[test]
    fn test_query_parsing() {
        let query = ThumbnailQuery {
            width: Some("400".into()),
            label: Some("M42".into()),
            color: Some("True".into()),
            median: Some("1".into()),
            percentile: Some("98".into()),
            image: Some("yes".into()),
            ..Default::default()
        };
        let params = query.params().unwrap();

        assert_eq!(params.width, 400);
        assert_eq!(params.height, 200);
        assert_eq!(params.label_text.as_deref(), Some("M42"));
        assert!(params.color);
        assert!(params.median);
        assert_eq!(params.percentile, 98.0);
        assert!(query.wants_image().unwrap());
    }

    #[test]
    fn test_query_rejects_bad_values() {
        let bad_width = ThumbnailQuery {
            width: Some("wide".into()),
            ..Default::default()
        };
        assert!(matches!(
            bad_width.params(),
            Err(ThumbnailError::ValidationFailed(msg)) if msg.contains("width")
        ));

        let bad_quality = ThumbnailQuery {
            quality: Some("0".into()),
            ..Default::default()
        };
        assert!(bad_quality.params().is_err());

        let bad_flag = ThumbnailQuery {
            color: Some("maybe".into()),
            ..Default::default()
        };
        assert!(bad_flag.params().is_err());
    }
}
