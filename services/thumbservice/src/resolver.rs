use crate::archive::FrameArchive;
use crate::error::{Result, ThumbnailError};
use crate::frame::FrameDescriptor;
use tracing::{debug, instrument};

/// Reduction level of the final pipeline-reduced product
pub const REDUCED_LEVEL: i64 = 91;

/// Colour band of a composite thumbnail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Red,
    Visual,
    Blue,
}

impl Channel {
    /// Codec input order
    pub const ORDER: [Channel; 3] = [Channel::Red, Channel::Visual, Channel::Blue];

    /// Filter names that feed this channel
    pub fn filters(self) -> &'static [&'static str] {
        match self {
            Channel::Red => &["R", "rp"],
            Channel::Visual => &["V"],
            Channel::Blue => &["B"],
        }
    }

    pub fn matches(self, frame: &FrameDescriptor) -> bool {
        frame
            .filter()
            .map(|f| self.filters().contains(&f))
            .unwrap_or(false)
    }
}

/// Fetch the reduced frames of `request_id` and pick one per channel
///
/// Returns the frames in `[red, visual, blue]` order.
#[instrument(skip(archive, auth))]
pub async fn resolve_channels(
    archive: &dyn FrameArchive,
    request_id: i64,
    auth: Option<&str>,
) -> Result<Vec<FrameDescriptor>> {
    let frames = archive
        .frames_for_request(request_id, REDUCED_LEVEL, auth)
        .await?;
    debug!(candidates = frames.len(), "Companion frames fetched");
    select_channels(&frames)
}

/// Select exactly one reduced frame per channel
///
/// Frames at any other reduction level are ignored rather than substituted.
/// When several frames match a channel the first one in input order wins.
pub fn select_channels(frames: &[FrameDescriptor]) -> Result<Vec<FrameDescriptor>> {
    Channel::ORDER
        .iter()
        .map(|channel| {
            frames
                .iter()
                .filter(|f| f.reduction_level == Some(REDUCED_LEVEL))
                .find(|f| channel.matches(f))
                .cloned()
                .ok_or_else(|| {
                    debug!(?channel, "No reduced frame for channel");
                    ThumbnailError::RvbFramesNotFound
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_frame(id: i64, filter: &str, reduction_level: i64) -> FrameDescriptor {
        serde_json::from_value(json!({
            "id": id,
            "configuration_type": "EXPOSE",
            "filename": format!("ogg0m404-kb82-20190321-{id}-e{reduction_level:02}.fits.fz"),
            "url": format!("http://file_url_{id}"),
            "proposal_id": "LCOEPO2018B-002",
            "request_id": 1756835,
            "primary_optical_element": filter,
            "reduction_level": reduction_level
        }))
        .unwrap()
    }

    fn request_frames() -> Vec<FrameDescriptor> {
        vec![
            create_frame(11245132, "B", 91),
            create_frame(11245129, "B", 0),
            create_frame(11245120, "V", 91),
            create_frame(11245119, "V", 0),
            create_frame(11245105, "rp", 91),
            create_frame(11245103, "rp", 0),
        ]
    }

    fn ids(frames: &[FrameDescriptor]) -> Vec<i64> {
        frames.iter().map(|f| f.id).collect()
    }

    #[test]
    fn test_selects_one_reduced_frame_per_channel() {
        let selected = select_channels(&request_frames()).unwrap();
        assert_eq!(ids(&selected), vec![11245105, 11245120, 11245132]);
    }

    #[test]
    fn test_lower_reduction_level_not_substituted() {
        let mut frames = request_frames();
        frames.retain(|f| !(f.filter() == Some("B") && f.reduction_level == Some(91)));

        assert!(matches!(
            select_channels(&frames),
            Err(ThumbnailError::RvbFramesNotFound)
        ));
    }

    #[test]
    fn test_missing_channel() {
        let mut frames = request_frames();
        frames.pop();
        frames.pop();

        assert!(matches!(
            select_channels(&frames),
            Err(ThumbnailError::RvbFramesNotFound)
        ));
        assert!(select_channels(&[]).is_err());
    }

    #[test]
    fn test_first_match_wins() {
        let mut frames = request_frames();
        frames.insert(0, create_frame(1, "R", 91));

        let selected = select_channels(&frames).unwrap();
        assert_eq!(ids(&selected), vec![1, 11245120, 11245132]);
    }

    #[test]
    fn test_channel_filters() {
        assert!(Channel::Red.matches(&create_frame(1, "R", 91)));
        assert!(Channel::Red.matches(&create_frame(1, "rp", 91)));
        assert!(!Channel::Red.matches(&create_frame(1, "ip", 91)));
        assert!(Channel::Visual.matches(&create_frame(1, "V", 91)));
        assert!(!Channel::Blue.matches(&create_frame(1, "b", 91)));
    }
}
