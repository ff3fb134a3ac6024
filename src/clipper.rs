use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::{stream, StreamExt, TryStreamExt};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::{
    io::{discard, ScratchWorkspace},
    outside::{Ffmpeg, MediaFetcher},
    result::{Error, Result},
    types::VideoSection,
};

/// Cut sections out of remote videos and merge them into a single video.
///
/// Every file created for a request (downloads, clips, concat list, merged video)
/// is owned by the run and removed when it ends, whatever the outcome. As ownership
/// handles the removal, this also holds when the request is cancelled midway.
#[derive(Debug, Clone)]
pub struct ClipMerger {
    fetcher: Arc<dyn MediaFetcher>,
    ffmpeg: Arc<Ffmpeg>,
    scratch_dir: PathBuf,
    max_parallel_jobs: usize,
}

impl ClipMerger {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        ffmpeg: Arc<Ffmpeg>,
        scratch_dir: &Path,
        max_parallel_jobs: usize,
    ) -> Self {
        Self {
            fetcher,
            ffmpeg,
            scratch_dir: scratch_dir.to_path_buf(),
            max_parallel_jobs: max_parallel_jobs.max(1),
        }
    }

    /// Return the merged video of all the sections, in the order they are given.
    pub async fn run(&self, urls: &[String], sections: &[VideoSection]) -> Result<Vec<u8>> {
        validate_request(urls, sections)?;
        info!(
            "Clipping {} sections out of {} videos",
            sections.len(),
            urls.len()
        );

        let sources = self.download_all(urls).await?;

        let workspace = match ScratchWorkspace::create(&self.scratch_dir) {
            Ok(workspace) => workspace,
            Err(err) => {
                sources.into_iter().for_each(discard);
                return Err(err);
            }
        };

        let res = self.clip_and_merge(&sources, sections, &workspace).await;

        debug!("Cleaning up {} downloads and the workspace", sources.len());
        sources.into_iter().for_each(discard);
        workspace.close();

        res
    }

    /// Download every video, keeping the order of the URLs.
    ///
    /// Stops at the first failure, the files already downloaded are then dropped.
    async fn download_all(&self, urls: &[String]) -> Result<Vec<NamedTempFile>> {
        let downloads: Vec<_> = urls.iter().map(|url| self.fetcher.fetch(url)).collect();

        stream::iter(downloads)
            .buffered(self.max_parallel_jobs)
            .try_collect()
            .await
    }

    async fn clip_and_merge(
        &self,
        sources: &[NamedTempFile],
        sections: &[VideoSection],
        workspace: &ScratchWorkspace,
    ) -> Result<Vec<u8>> {
        let clips: Vec<_> = sections
            .iter()
            .map(|section| self.clip(sources, section, workspace))
            .collect();

        let clips: Vec<PathBuf> = stream::iter(clips)
            .buffered(self.max_parallel_jobs)
            .try_collect()
            .await?;

        info!("Merging {} clips", clips.len());
        let merged = workspace.merged_path();
        self.ffmpeg
            .concatenate(&clips, &workspace.manifest_path(), &merged)
            .await?;

        let bytes = tokio::fs::read(&merged).await?;
        info!("Merged video is {} bytes long", bytes.len());

        Ok(bytes)
    }

    async fn clip(
        &self,
        sources: &[NamedTempFile],
        section: &VideoSection,
        workspace: &ScratchWorkspace,
    ) -> Result<PathBuf> {
        // Indices have been validated against the URL list, which has the same length
        let source = usize::try_from(section.video_index)
            .ok()
            .and_then(|i| sources.get(i))
            .ok_or_else(|| {
                Error::invalid_input(format!(
                    "Invalid video_id {} in section {}",
                    section.video_index, section.id
                ))
            })?;

        let output = workspace.clip_path(section.id);
        info!("Clipping {section} into '{}'", output.display());

        self.ffmpeg
            .clip_section(section, source.path(), &output)
            .await?;

        debug!("Clip of section {} completed", section.id);
        Ok(output)
    }
}

/// Check the whole request before doing anything expensive.
pub fn validate_request(urls: &[String], sections: &[VideoSection]) -> Result<()> {
    if urls.is_empty() {
        return Err(Error::invalid_input("No video URL provided"));
    }
    if sections.is_empty() {
        return Err(Error::invalid_input("No video section provided"));
    }

    let mut ids = HashSet::with_capacity(sections.len());
    for section in sections {
        let id = section.id;

        if section.video_index < 0 || section.video_index >= urls.len() as i64 {
            return Err(Error::invalid_input(format!(
                "Invalid video_id {} in section {id}: must be between 0 and {}",
                section.video_index,
                urls.len() - 1
            )));
        }
        if !section.start.is_valid() {
            return Err(Error::invalid_input(format!(
                "Invalid start_time in section {id}: must be non-negative"
            )));
        }
        if !section.end.is_valid() || section.end <= section.start {
            return Err(Error::invalid_input(format!(
                "Invalid time range in section {id}: end_time must be greater than start_time"
            )));
        }
        if !ids.insert(id) {
            return Err(Error::invalid_input(format!(
                "Duplicate section identifier {id}"
            )));
        }
    }

    Ok(())
}
