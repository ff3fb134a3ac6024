use std::{io::Cursor, path::Path, sync::Arc};

use image::{ImageFormat, RgbImage};
use tracing::{debug, info};

use crate::{
    io::discard,
    outside::{Ffmpeg, MediaFetcher, VideoProbe},
    result::{Error, Result},
    types::Timestamp,
};

/// Grab a still frame out of a remote video.
#[derive(Debug, Clone)]
pub struct FrameExtractor {
    fetcher: Arc<dyn MediaFetcher>,
    ffmpeg: Arc<Ffmpeg>,
}

impl FrameExtractor {
    pub fn new(fetcher: Arc<dyn MediaFetcher>, ffmpeg: Arc<Ffmpeg>) -> Self {
        Self { fetcher, ffmpeg }
    }

    /// Download the video and return the frame shown at `time`, encoded as PNG.
    pub async fn run(&self, url: &str, time: Timestamp) -> Result<Vec<u8>> {
        if !time.is_valid() {
            return Err(Error::TimeOutOfRange("Time must be non-negative".to_owned()));
        }

        let video = self.fetcher.fetch(url).await?;
        let res = self.extract_frame(video.path(), time).await;
        discard(video);

        res
    }

    /// Return the frame of the local video shown at `time`, encoded as PNG.
    pub async fn extract_frame(&self, path: &Path, time: Timestamp) -> Result<Vec<u8>> {
        let probe = self.ffmpeg.probe(path).await?;
        debug!(
            "Probed {}: {}x{}, {} fps, {} frames",
            path.display(),
            probe.width,
            probe.height,
            probe.fps,
            probe.total_frames
        );

        check_time(time, &probe)?;

        let seek = seek_position(time, &probe);
        info!("Extracting frame at {time}s (seeking to {seek}s)");

        let pixels = self
            .ffmpeg
            .grab_frame(path, seek)
            .await?
            .ok_or_else(|| Error::FrameExtraction("no frame could be decoded".to_owned()))?;

        encode_png(probe.width, probe.height, pixels)
    }
}

fn check_time(time: Timestamp, probe: &VideoProbe) -> Result<()> {
    let secs = time.as_secs();
    if !time.is_valid() {
        return Err(Error::TimeOutOfRange("Time must be non-negative".to_owned()));
    }

    match probe.duration() {
        Some(duration) if secs > duration => Err(Error::TimeOutOfRange(format!(
            "Time {secs}s exceeds video duration {duration:.2}s"
        ))),
        _ => Ok(()),
    }
}

/// Position of the first frame shown at `time`.
///
/// The frame index is `floor(time * fps)`, capped to the last frame so that the
/// very end of the video still has a frame to show. Without a frame rate, the
/// first frame is used.
fn seek_position(time: Timestamp, probe: &VideoProbe) -> Timestamp {
    if probe.fps <= 0. {
        return Timestamp::from_secs(0.);
    }

    let mut index = (time.as_secs() * probe.fps).floor() as u64;
    if probe.total_frames > 0 {
        index = index.min(probe.total_frames - 1);
    }

    Timestamp::from_secs(index as f64 / probe.fps)
}

/// Encode packed RGB pixels as a PNG image.
fn encode_png(width: u32, height: u32, mut pixels: Vec<u8>) -> Result<Vec<u8>> {
    let expected = width as usize * height as usize * 3;
    if pixels.len() < expected {
        return Err(Error::FrameExtraction(format!(
            "decoded {} bytes instead of {expected}",
            pixels.len()
        )));
    }
    pixels.truncate(expected);

    let image = RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| Error::FrameExtraction("invalid frame buffer".to_owned()))?;

    let mut png = Cursor::new(Vec::new());
    image
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|err| Error::FrameExtraction(format!("could not encode PNG: {err}")))?;

    Ok(png.into_inner())
}
