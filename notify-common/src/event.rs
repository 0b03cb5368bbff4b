use std::path::PathBuf;

use bytes::Bytes;

/// A detection normalized from an NVR payload, ready for the `EventGate`.
///
/// `id`, `key` and `timestamp` are required for a notification to go out, but
/// they are kept optional here: an event missing any of them is still decoded
/// so that the gate can reject it with a log line instead of the adapter
/// failing to parse.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionEvent {
    /// NVR event id, used to look up the snapshot.
    pub id: Option<String>,
    /// Dedup and rate-limit partition, the camera name.
    pub key: Option<String>,
    /// Snapshot frame time on the NVR clock, in seconds.
    pub timestamp: Option<f64>,
    /// The track is inside at least one zone after this update.
    pub has_zone_entry: bool,
    /// The track was already inside a zone before this update.
    pub had_zone_entry: bool,
    /// This is the first update for the track.
    pub is_new_track: bool,
}

/// Where the image attached to a notification comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    /// Raw image content, e.g. a downloaded snapshot.
    Bytes(Bytes),
    /// A file on local disk, read at send time.
    FilePath(PathBuf),
    /// A publicly reachable image the provider fetches itself.
    RemoteUrl(String),
}

/// A notification to be sent exactly once by the `Notifier`.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRequest {
    pub text: String,
    pub image: Option<ImageSource>,
}

impl NotificationRequest {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_owned(),
            image: None,
        }
    }

    pub fn with_image(text: &str, image: ImageSource) -> Self {
        Self {
            text: text.to_owned(),
            image: Some(image),
        }
    }
}
