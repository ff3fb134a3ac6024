use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    result::{Error, Result, ToolStage},
    settings::ToolSettings,
    types::{Timestamp, VideoSection},
};

use super::command::{CommandError, CommandLine, CommandOutput, CommandRunner, FFXXX_DEFAULT_ARGS};

/// What the frame extraction needs to know about the first video stream of a file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoProbe {
    pub width: u32,
    pub height: u32,
    /// Frames per second, 0 if unknown
    pub fps: f64,
    /// 0 if unknown
    pub total_frames: u64,
}

impl VideoProbe {
    /// Duration in seconds, `None` if it cannot be determined.
    pub fn duration(&self) -> Option<f64> {
        if self.fps > 0. && self.total_frames > 0 {
            Some(self.total_frames as f64 / self.fps)
        } else {
            None
        }
    }
}

/// Interface for the [ffmpeg](https://ffmpeg.org) and ffprobe programs
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    runner: Arc<dyn CommandRunner>,
    ffmpeg: String,
    ffprobe: String,
    clip_timeout: Duration,
    merge_timeout: Duration,
    frame_timeout: Duration,
}

impl Ffmpeg {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: &ToolSettings) -> Self {
        Self {
            runner,
            ffmpeg: settings.ffmpeg.clone(),
            ffprobe: settings.ffprobe.clone(),
            clip_timeout: Duration::from_secs(settings.clip_timeout_secs),
            merge_timeout: Duration::from_secs(settings.merge_timeout_secs),
            frame_timeout: Duration::from_secs(settings.frame_timeout_secs),
        }
    }

    /// Verify that the `ffmpeg` and `ffprobe` binaries are reachable
    pub async fn verify(&self) -> Result<()> {
        for program in [&self.ffmpeg, &self.ffprobe] {
            let mut cmd = CommandLine::new(program);
            cmd.arg("-version");

            let res = self.run(&cmd, self.frame_timeout, ToolStage::Probe).await?;
            if !res.success() {
                return Err(Error::Io(std::io::Error::other(format!(
                    "{program} -version did run but was not successful: {}",
                    res.stderr_lossy()
                ))));
            }
        }
        Ok(())
    }

    /// Cut the `[start, end)` range of the section out of `input`, without re-encoding.
    ///
    /// Timestamps of the output start at zero even when `start` is not on a keyframe.
    pub async fn clip_section(
        &self,
        section: &VideoSection,
        input: &Path,
        output: &Path,
    ) -> Result<()> {
        let mut cmd = self.ffmpeg_command();
        cmd.args(["-ss", &section.start.to_string()])
            .arg("-i")
            .arg(input)
            .args(["-t", &section.duration().to_string()])
            .args(["-c", "copy"])
            .args(["-avoid_negative_ts", "make_zero"])
            .arg(output);

        let res = self.run(&cmd, self.clip_timeout, ToolStage::Clip).await?;
        if !res.success() {
            return Err(Error::ClipFailed {
                section: section.id,
                stderr: res.stderr_lossy(),
            });
        }
        if !tokio::fs::try_exists(output).await? {
            return Err(Error::ClipFailed {
                section: section.id,
                stderr: missing_output(output, &res),
            });
        }

        Ok(())
    }

    /// Join the clips, in the given order, into `output`.
    ///
    /// Tries a lossless concatenation first, which requires every clip to share the same
    /// codec parameters. If it fails, the clips are re-encoded with common codecs.
    pub async fn concatenate(
        &self,
        clips: &[PathBuf],
        manifest: &Path,
        output: &Path,
    ) -> Result<()> {
        if clips.is_empty() {
            return Err(Error::invalid_input("No clip to concatenate"));
        }

        tokio::fs::write(manifest, concat_manifest(clips)).await?;
        debug!(
            "Concat manifest with {} clips written to {}",
            clips.len(),
            manifest.display()
        );

        let copy = self.concat_command(manifest, output, false);
        let mut res = self.run(&copy, self.merge_timeout, ToolStage::Merge).await?;

        if !res.success() {
            warn!(
                "Lossless concatenation failed, falling back to re-encoding: {}",
                res.stderr_lossy()
            );
            let reencode = self.concat_command(manifest, output, true);
            res = self.run(&reencode, self.merge_timeout, ToolStage::Merge).await?;
        }

        if !res.success() {
            return Err(Error::MergeFailed {
                stderr: res.stderr_lossy(),
            });
        }
        if !tokio::fs::try_exists(output).await? {
            return Err(Error::MergeFailed {
                stderr: missing_output(output, &res),
            });
        }

        Ok(())
    }

    /// Read the dimensions, frame rate and frame count of the first video stream.
    pub async fn probe(&self, input: &Path) -> Result<VideoProbe> {
        let mut cmd = CommandLine::new(&self.ffprobe);
        cmd.args(["-v", "error"])
            .args(["-select_streams", "v:0"])
            .args([
                "-show_entries",
                "stream=width,height,avg_frame_rate,r_frame_rate,nb_frames:format=duration",
            ])
            .args(["-of", "json"])
            .arg(input);

        let res = self.run(&cmd, self.frame_timeout, ToolStage::Probe).await?;
        if !res.success() {
            return Err(Error::UnreadableVideo(res.stderr_lossy()));
        }

        parse_probe(&res.stdout)
    }

    /// Decode the frame shown at `at` as packed RGB pixels, 3 bytes per pixel.
    ///
    /// The frame comes from the first video stream, at its coded size, so that it
    /// matches what [`Ffmpeg::probe`] reports even for rotated videos.
    /// Returns `Ok(None)` if no frame could be decoded at that position.
    pub async fn grab_frame(&self, input: &Path, at: Timestamp) -> Result<Option<Vec<u8>>> {
        let mut cmd = self.ffmpeg_command();
        cmd.args(["-ss", &at.to_string()])
            .arg("-noautorotate")
            .arg("-i")
            .arg(input)
            .args(["-map", "0:v:0"])
            .args(["-frames:v", "1"])
            .args(["-f", "rawvideo"])
            .args(["-pix_fmt", "rgb24"])
            .arg("pipe:1");

        let res = self.run(&cmd, self.frame_timeout, ToolStage::Frame).await?;
        if !res.success() {
            debug!("Frame decoding failed: {}", res.stderr_lossy());
            return Ok(None);
        }

        Ok(Some(res.stdout))
    }

    fn ffmpeg_command(&self) -> CommandLine {
        let mut cmd = CommandLine::new(&self.ffmpeg);
        cmd.args(FFXXX_DEFAULT_ARGS).arg("-y");
        cmd
    }

    fn concat_command(&self, manifest: &Path, output: &Path, reencode: bool) -> CommandLine {
        let mut cmd = self.ffmpeg_command();
        cmd.args(["-f", "concat"])
            .args(["-safe", "0"])
            .arg("-i")
            .arg(manifest);

        if reencode {
            cmd.args(["-c:v", "libx264"])
                .args(["-preset", "fast"])
                .args(["-c:a", "aac"]);
        } else {
            cmd.args(["-c", "copy"]);
        }

        cmd.arg(output);
        cmd
    }

    async fn run(
        &self,
        cmd: &CommandLine,
        timeout: Duration,
        stage: ToolStage,
    ) -> Result<CommandOutput> {
        match self.runner.run(cmd, timeout).await {
            Ok(res) => Ok(res),
            Err(CommandError::TimedOut { .. }) => Err(Error::ToolTimeout { stage, timeout }),
            Err(err) => Err(err.into()),
        }
    }
}

/// Content of the file listing the clips for the concat demuxer.
///
/// One `file '<path>'` line per clip. Quotes in paths are escaped the way the
/// demuxer expects: close the quote, escaped quote, reopen the quote.
pub fn concat_manifest(clips: &[PathBuf]) -> String {
    clips
        .iter()
        .map(|clip| {
            let path = clip.to_string_lossy().replace('\'', r"'\''");
            format!("file '{path}'\n")
        })
        .collect()
}

fn missing_output(output: &Path, res: &CommandOutput) -> String {
    let mut msg = format!("exited successfully but {} was not created", output.display());
    let stderr = res.stderr_lossy();
    if !stderr.is_empty() {
        msg.push_str(": ");
        msg.push_str(&stderr);
    }
    msg
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn parse_probe(stdout: &[u8]) -> Result<VideoProbe> {
    let probe: ProbeOutput = serde_json::from_slice(stdout)
        .map_err(|err| Error::UnreadableVideo(format!("Could not parse ffprobe output: {err}")))?;

    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| Error::UnreadableVideo("No video stream found".to_owned()))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(Error::UnreadableVideo(
                "Video stream has no dimensions".to_owned(),
            ))
        }
    };

    let fps = [&stream.avg_frame_rate, &stream.r_frame_rate]
        .into_iter()
        .flatten()
        .map(|rate| parse_frame_rate(rate))
        .find(|&fps| fps > 0.)
        .unwrap_or(0.);

    // Some containers do not store the frame count, estimate it from the duration
    let total_frames = stream
        .nb_frames
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|&n| n > 0)
        .or_else(|| {
            let duration = probe.format?.duration?.parse::<f64>().ok()?;
            (duration.is_finite() && duration > 0.).then(|| (duration * fps).floor() as u64)
        })
        .unwrap_or(0);

    Ok(VideoProbe {
        width,
        height,
        fps,
        total_frames,
    })
}

/// Parse a rational frame rate such as `30000/1001`. Return 0 when unknown.
fn parse_frame_rate(rate: &str) -> f64 {
    let fps = match rate.split_once('/') {
        Some((num, den)) => match (num.trim().parse::<f64>(), den.trim().parse::<f64>()) {
            (Ok(num), Ok(den)) if den != 0. => num / den,
            _ => 0.,
        },
        None => rate.trim().parse().unwrap_or(0.),
    };

    if fps.is_finite() && fps > 0. {
        fps
    } else {
        0.
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsStr;

    use super::*;
    use crate::outside::testing::ScriptedRunner;

    fn section(id: i64, start: f64, end: f64) -> VideoSection {
        VideoSection {
            id,
            video_index: 0,
            start: Timestamp::from_secs(start),
            end: Timestamp::from_secs(end),
        }
    }

    fn ffmpeg(runner: &Arc<ScriptedRunner>) -> Ffmpeg {
        Ffmpeg::new(runner.clone(), &ToolSettings::default())
    }

    #[test]
    fn manifest_lines() {
        let manifest = concat_manifest(&[
            PathBuf::from("/tmp/work/clip_2.mp4"),
            PathBuf::from("/tmp/work/it's.mp4"),
        ]);

        assert_eq!(
            manifest,
            "file '/tmp/work/clip_2.mp4'\nfile '/tmp/work/it'\\''s.mp4'\n"
        );
    }

    #[test]
    fn frame_rates() {
        assert_eq!(parse_frame_rate("30/1"), 30.);
        assert!((parse_frame_rate("30000/1001") - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("0/0"), 0.);
        assert_eq!(parse_frame_rate("25"), 25.);
        assert_eq!(parse_frame_rate("garbage"), 0.);
    }

    #[test]
    fn probe_with_frame_count() {
        let probe = parse_probe(
            br#"{"streams": [{"width": 640, "height": 360, "avg_frame_rate": "25/1",
                "r_frame_rate": "25/1", "nb_frames": "250"}],
                "format": {"duration": "10.000000"}}"#,
        )
        .unwrap();

        assert_eq!(probe.width, 640);
        assert_eq!(probe.height, 360);
        assert_eq!(probe.total_frames, 250);
        assert_eq!(probe.duration(), Some(10.));
    }

    #[test]
    fn probe_estimates_frame_count_from_duration() {
        let probe = parse_probe(
            br#"{"streams": [{"width": 320, "height": 240, "avg_frame_rate": "0/0",
                "r_frame_rate": "30/1"}], "format": {"duration": "2.5"}}"#,
        )
        .unwrap();

        assert_eq!(probe.fps, 30.);
        assert_eq!(probe.total_frames, 75);
    }

    #[test]
    fn probe_unknown_frame_rate_has_no_duration() {
        let probe = parse_probe(
            br#"{"streams": [{"width": 320, "height": 240, "avg_frame_rate": "0/0"}]}"#,
        )
        .unwrap();

        assert_eq!(probe.duration(), None);
    }

    #[test]
    fn probe_without_video_stream() {
        let err = parse_probe(br#"{"streams": [], "format": {}}"#).unwrap_err();
        assert!(matches!(err, Error::UnreadableVideo(_)));
    }

    #[tokio::test]
    async fn clip_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("source.mp4");
        let output = dir.path().join("clip_1.mp4");
        std::fs::write(&input, b"video").unwrap();

        let runner = Arc::new(ScriptedRunner::media());
        ffmpeg(&runner)
            .clip_section(&section(1, 5., 8.), &input, &output)
            .await
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        let cmd = &calls[0];
        assert_eq!(cmd.program(), OsStr::new("ffmpeg"));
        assert!(cmd.get_args().iter().any(|arg| arg == "-y"));
        assert_eq!(cmd.value_of("-ss"), Some(OsStr::new("5")));
        assert_eq!(cmd.value_of("-i"), Some(input.as_os_str()));
        assert_eq!(cmd.value_of("-t"), Some(OsStr::new("3")));
        assert!(cmd.has_pair("-c", "copy"));
        assert!(cmd.has_pair("-avoid_negative_ts", "make_zero"));
        assert_eq!(cmd.get_args().last().unwrap(), output.as_os_str());
        assert_eq!(std::fs::read(&output).unwrap(), b"video");
    }

    #[tokio::test]
    async fn clip_failure_forwards_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|_| {
            Ok(ScriptedRunner::failed("moov atom not found"))
        }));

        let err = ffmpeg(&runner)
            .clip_section(
                &section(9, 0., 1.),
                &dir.path().join("in.mp4"),
                &dir.path().join("out.mp4"),
            )
            .await
            .unwrap_err();

        match err {
            Error::ClipFailed { section, stderr } => {
                assert_eq!(section, 9);
                assert_eq!(stderr, "moov atom not found");
            }
            err => panic!("unexpected error {err:?}"),
        }
    }

    #[tokio::test]
    async fn clip_success_without_output_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|_| Ok(ScriptedRunner::succeeded())));

        let err = ffmpeg(&runner)
            .clip_section(
                &section(1, 0., 1.),
                &dir.path().join("in.mp4"),
                &dir.path().join("out.mp4"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ClipFailed { .. }));
    }

    #[tokio::test]
    async fn clip_timeout_is_its_own_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|cmd| {
            Err(CommandError::TimedOut {
                program: cmd.program().to_string_lossy().into_owned(),
                timeout: Duration::from_secs(300),
            })
        }));

        let err = ffmpeg(&runner)
            .clip_section(
                &section(1, 0., 1.),
                &dir.path().join("in.mp4"),
                &dir.path().join("out.mp4"),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ToolTimeout {
                stage: ToolStage::Clip,
                ..
            }
        ));
    }

    fn clips(dir: &Path) -> Vec<PathBuf> {
        let clips = vec![dir.join("clip_2.mp4"), dir.join("clip_1.mp4")];
        std::fs::write(&clips[0], b"first-").unwrap();
        std::fs::write(&clips[1], b"second").unwrap();
        clips
    }

    #[tokio::test]
    async fn concat_lossless_first() {
        let dir = tempfile::tempdir().unwrap();
        let clips = clips(dir.path());
        let manifest = dir.path().join("concat_list.txt");
        let output = dir.path().join("merged.mp4");

        let runner = Arc::new(ScriptedRunner::media());
        ffmpeg(&runner)
            .concatenate(&clips, &manifest, &output)
            .await
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].has_pair("-f", "concat"));
        assert!(calls[0].has_pair("-safe", "0"));
        assert!(calls[0].has_pair("-c", "copy"));
        assert_eq!(calls[0].value_of("-i"), Some(manifest.as_os_str()));
        assert_eq!(std::fs::read(&output).unwrap(), b"first-second");
        assert_eq!(
            std::fs::read_to_string(&manifest).unwrap(),
            concat_manifest(&clips)
        );
    }

    #[tokio::test]
    async fn concat_falls_back_to_reencoding() {
        let dir = tempfile::tempdir().unwrap();
        let clips = clips(dir.path());
        let output = dir.path().join("merged.mp4");

        let media = ScriptedRunner::media();
        let runner = Arc::new(ScriptedRunner::new(move |cmd| {
            if cmd.has_pair("-c", "copy") {
                Ok(ScriptedRunner::failed("codec parameters mismatch"))
            } else {
                media.respond(cmd)
            }
        }));

        ffmpeg(&runner)
            .concatenate(&clips, &dir.path().join("list.txt"), &output)
            .await
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].has_pair("-c:v", "libx264"));
        assert!(calls[1].has_pair("-preset", "fast"));
        assert!(calls[1].has_pair("-c:a", "aac"));
        assert_eq!(std::fs::read(&output).unwrap(), b"first-second");
    }

    #[tokio::test]
    async fn concat_fails_when_fallback_fails() {
        let dir = tempfile::tempdir().unwrap();
        let clips = clips(dir.path());

        let runner = Arc::new(ScriptedRunner::new(|cmd| {
            if cmd.has_pair("-c", "copy") {
                Ok(ScriptedRunner::failed("copy failed"))
            } else {
                Ok(ScriptedRunner::failed("encoder libx264 not found"))
            }
        }));

        let err = ffmpeg(&runner)
            .concatenate(
                &clips,
                &dir.path().join("list.txt"),
                &dir.path().join("merged.mp4"),
            )
            .await
            .unwrap_err();

        match err {
            Error::MergeFailed { stderr } => assert_eq!(stderr, "encoder libx264 not found"),
            err => panic!("unexpected error {err:?}"),
        }
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn concat_nothing_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::media());

        let err = ffmpeg(&runner)
            .concatenate(
                &[],
                &dir.path().join("list.txt"),
                &dir.path().join("merged.mp4"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn frame_comes_from_the_probed_stream() {
        let runner = Arc::new(ScriptedRunner::new(|_| Ok(ScriptedRunner::with_stdout(&[0; 6]))));

        let pixels = ffmpeg(&runner)
            .grab_frame(Path::new("/tmp/in.mp4"), Timestamp::from_secs(1.5))
            .await
            .unwrap();
        assert_eq!(pixels, Some(vec![0; 6]));

        let cmd = &runner.calls()[0];
        assert!(cmd.has_pair("-map", "0:v:0"));
        assert!(cmd.has_pair("-f", "rawvideo"));

        // Input options must come before the input
        let args = cmd.get_args();
        let position = |arg: &str| args.iter().position(|a| a == arg).unwrap();
        assert!(position("-noautorotate") < position("-i"));
        assert!(position("-i") < position("-map"));
        assert_eq!(cmd.value_of("-ss"), Some(OsStr::new("1.5")));
    }

    #[tokio::test]
    async fn failed_frame_decoding_is_no_frame() {
        let runner = Arc::new(ScriptedRunner::new(|_| {
            Ok(ScriptedRunner::failed("Output file is empty, nothing was encoded"))
        }));

        let pixels = ffmpeg(&runner)
            .grab_frame(Path::new("/tmp/in.mp4"), Timestamp::from_secs(0.))
            .await
            .unwrap();
        assert_eq!(pixels, None);
    }

    #[tokio::test]
    async fn verify_checks_both_programs() {
        let runner = Arc::new(ScriptedRunner::new(|cmd| {
            if cmd.program() == "ffprobe" {
                Ok(ScriptedRunner::failed("not installed"))
            } else {
                Ok(ScriptedRunner::succeeded())
            }
        }));

        assert!(ffmpeg(&runner).verify().await.is_err());
        assert_eq!(runner.calls().len(), 2);
    }
}
