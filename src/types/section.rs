use std::fmt::Display;

use serde::Deserialize;

use super::Timestamp;

/// A time range of one of the request source videos.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct VideoSection {
    /// Caller-given identifier, only used to name the clip file
    #[serde(rename = "section")]
    pub id: i64,

    /// Index in the request source video list
    #[serde(rename = "video_id")]
    pub video_index: i64,

    #[serde(rename = "start_time")]
    pub start: Timestamp,

    #[serde(rename = "end_time")]
    pub end: Timestamp,
}

impl VideoSection {
    pub fn duration(&self) -> Timestamp {
        self.end - self.start
    }
}

impl Display for VideoSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "section {} (video {}, {}s - {}s)",
            self.id, self.video_index, self.start, self.end
        )
    }
}
