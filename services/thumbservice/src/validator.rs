use crate::config::ValidationConfig;
use crate::error::ThumbnailError;
use crate::frame::{FrameDescriptor, ThumbnailParams};
use tracing::debug;

/// Decision on whether a thumbnail may be generated for a frame
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationDecision {
    /// The frame can be rendered with the requested parameters
    Allowed,
    /// The frame cannot be rendered, with the reason shown to the client
    Rejected { reason: String },
}

impl ValidationDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn into_result(self) -> Result<(), ThumbnailError> {
        match self {
            Self::Allowed => Ok(()),
            Self::Rejected { reason } => Err(ThumbnailError::ValidationFailed(reason)),
        }
    }
}

/// Validator that decides whether a frame can be turned into a thumbnail
///
/// Rules are evaluated in order and the first failure wins:
/// - Required keys present on the descriptor
/// - Observation type in the image-bearing allow-list
/// - Colour requests need a request ID
/// - Colour requests need a colour-eligible observation type
/// - Filename has a FITS extension
pub struct FrameValidator {
    required_keys: Vec<String>,
    /// Upper-cased for case-insensitive comparison
    valid_obstypes: Vec<String>,
    valid_color_obstypes: Vec<String>,
    /// Lower-cased for case-insensitive comparison
    fits_extensions: Vec<String>,
}

impl FrameValidator {
    /// Create a new validator with the given configuration
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            required_keys: config.required_frame_keys.clone(),
            valid_obstypes: config
                .valid_obstypes
                .iter()
                .map(|t| t.to_ascii_uppercase())
                .collect(),
            valid_color_obstypes: config
                .valid_color_obstypes
                .iter()
                .map(|t| t.to_ascii_uppercase())
                .collect(),
            fits_extensions: config
                .fits_extensions
                .iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
        }
    }

    /// Determine if a thumbnail can be generated
    pub fn validate(&self, frame: &FrameDescriptor, params: &ThumbnailParams) -> ValidationDecision {
        let decision = self.evaluate(frame, params);
        if let ValidationDecision::Rejected { reason } = &decision {
            debug!(frame_id = frame.id, reason = %reason, "Frame rejected");
        }
        decision
    }

    fn evaluate(&self, frame: &FrameDescriptor, params: &ThumbnailParams) -> ValidationDecision {
        if let Some(decision) = self.check_required_keys(frame) {
            return decision;
        }

        let obstype = frame.obstype().unwrap_or_default();
        let obstype_upper = obstype.to_ascii_uppercase();

        if !self.valid_obstypes.contains(&obstype_upper) {
            return reject(format!("Cannot generate thumbnail for obstype={obstype}"));
        }

        if params.color {
            if frame.request_id().is_none() {
                return reject(
                    "Cannot generate color thumbnail for a frame that does not have a request",
                );
            }
            if !self.valid_color_obstypes.contains(&obstype_upper) {
                return reject(format!("Cannot generate color thumbnail for obstype={obstype}"));
            }
        }

        if !self.is_fits(frame.filename.as_deref().unwrap_or_default()) {
            return reject("Cannot generate thumbnail for non FITS-type frame");
        }

        ValidationDecision::Allowed
    }

    fn check_required_keys(&self, frame: &FrameDescriptor) -> Option<ValidationDecision> {
        self.required_keys
            .iter()
            .any(|key| !frame.has_key(key))
            .then(|| reject("Cannot generate thumbnail for given frame"))
    }

    fn is_fits(&self, filename: &str) -> bool {
        let filename = filename.to_ascii_lowercase();
        self.fits_extensions.iter().any(|ext| filename.ends_with(ext))
    }
}

fn reject(reason: impl Into<String>) -> ValidationDecision {
    ValidationDecision::Rejected {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> FrameValidator {
        FrameValidator::new(&ValidationConfig::default())
    }

    fn create_test_frame() -> FrameDescriptor {
        serde_json::from_value(json!({
            "configuration_type": "EXPOSE",
            "filename": "ogg0m404-kb82-20190321-0273-e91.fits.fz",
            "id": 11245132,
            "url": "http://file_url",
            "proposal_id": "LCOEPO2018B-002",
            "request_id": 1756835,
            "primary_optical_element": "B"
        }))
        .unwrap()
    }

    fn color() -> ThumbnailParams {
        ThumbnailParams {
            color: true,
            ..Default::default()
        }
    }

    fn reason(decision: ValidationDecision) -> String {
        match decision {
            ValidationDecision::Rejected { reason } => reason,
            ValidationDecision::Allowed => panic!("Expected Rejected, got Allowed"),
        }
    }

    #[test]
    fn test_valid_frame_allowed() {
        let frame = create_test_frame();
        assert!(validator().validate(&frame, &ThumbnailParams::default()).is_allowed());
        assert!(validator().validate(&frame, &color()).is_allowed());
    }

    #[test]
    fn test_null_request_only_rejected_for_color() {
        let mut frame = create_test_frame();
        frame.request_id = Some(None);

        assert!(validator().validate(&frame, &ThumbnailParams::default()).is_allowed());
        assert_eq!(
            reason(validator().validate(&frame, &color())),
            "Cannot generate color thumbnail for a frame that does not have a request"
        );
    }

    #[test]
    fn test_missing_required_key() {
        let mut frame = create_test_frame();
        frame.request_id = None;

        assert_eq!(
            reason(validator().validate(&frame, &color())),
            "Cannot generate thumbnail for given frame"
        );
    }

    #[test]
    fn test_non_image_obstype() {
        let mut frame = create_test_frame();
        frame.configuration_type = Some("CATALOG".into());

        assert_eq!(
            reason(validator().validate(&frame, &ThumbnailParams::default())),
            "Cannot generate thumbnail for obstype=CATALOG"
        );
    }

    #[test]
    fn test_obstype_case_insensitive() {
        let mut frame = create_test_frame();
        frame.configuration_type = Some("expose".into());

        assert!(validator().validate(&frame, &color()).is_allowed());
    }

    #[test]
    fn test_color_requires_color_obstype() {
        let mut frame = create_test_frame();
        frame.configuration_type = Some("SPECTRUM".into());

        assert!(validator().validate(&frame, &ThumbnailParams::default()).is_allowed());
        assert_eq!(
            reason(validator().validate(&frame, &color())),
            "Cannot generate color thumbnail for obstype=SPECTRUM"
        );
    }

    #[test]
    fn test_non_fits_file() {
        let mut frame = create_test_frame();
        frame.filename = Some("OGG_calib_0001760408_ftn_20190331_58574.tar.gz".into());
        frame.configuration_type = Some("SPECTRUM".into());

        assert_eq!(
            reason(validator().validate(&frame, &ThumbnailParams::default())),
            "Cannot generate thumbnail for non FITS-type frame"
        );

        frame.filename = Some("frame.FITS".into());
        assert!(validator().validate(&frame, &ThumbnailParams::default()).is_allowed());
    }

    #[test]
    fn test_first_failing_rule_wins() {
        let mut frame = create_test_frame();
        frame.configuration_type = Some("CATALOG".into());
        frame.filename = Some("catalog.tar.gz".into());
        frame.request_id = Some(None);

        assert_eq!(
            reason(validator().validate(&frame, &color())),
            "Cannot generate thumbnail for obstype=CATALOG"
        );
    }

    #[test]
    fn test_into_result() {
        let rejected = ValidationDecision::Rejected {
            reason: "nope".into(),
        };
        assert!(matches!(
            rejected.into_result(),
            Err(ThumbnailError::ValidationFailed(r)) if r == "nope"
        ));
        assert!(ValidationDecision::Allowed.into_result().is_ok());
    }
}
