use std::{
    fmt::Debug,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tempfile::NamedTempFile;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::{
    io::named_tempfile_in,
    result::{Error, Result},
    settings::FetchSettings,
    types::MediaRole,
};

/// Interface for retrieving remote videos to the local scratch storage
#[async_trait]
pub trait MediaFetcher: Send + Sync + Debug {
    /// Download the resource to a new temporary file.
    ///
    /// The caller owns the returned file: it is deleted when the handle is dropped.
    /// On failure, nothing is left on disk.
    async fn fetch(&self, url: &str) -> Result<NamedTempFile>;
}

/// Download videos over HTTP(S)
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    scratch_dir: PathBuf,
}

impl HttpFetcher {
    pub fn new(settings: &FetchSettings, scratch_dir: &Path) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .read_timeout(Duration::from_secs(settings.read_timeout_secs))
            .build()
            .map_err(|err| Error::Io(std::io::Error::other(err)))?;

        Ok(Self {
            client,
            scratch_dir: scratch_dir.to_path_buf(),
        })
    }

    async fn download_to(&self, url: &str, file: &NamedTempFile) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| download_error(url, err))?;

        let mut out = tokio::fs::File::from_std(file.as_file().try_clone()?);
        write_chunks(url, response.bytes_stream(), &mut out).await
    }
}

/// Write every chunk of the body, in order, and return the number of bytes written.
///
/// Errors while receiving are download errors, errors while writing are local I/O errors.
async fn write_chunks<S, B, W>(url: &str, chunks: S, out: &mut W) -> Result<u64>
where
    S: Stream<Item = reqwest::Result<B>>,
    B: AsRef<[u8]>,
    W: AsyncWrite + Unpin,
{
    let mut chunks = std::pin::pin!(chunks);
    let mut written = 0;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|err| download_error(url, err))?;
        let chunk = chunk.as_ref();
        out.write_all(chunk).await?;
        written += chunk.len() as u64;
    }
    out.flush().await?;

    Ok(written)
}

fn download_error(url: &str, err: reqwest::Error) -> Error {
    Error::Download {
        url: url.to_owned(),
        source: err.into(),
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<NamedTempFile> {
        info!("Downloading {url}");
        let file = named_tempfile_in(&self.scratch_dir, MediaRole::Source)?;

        // The file is removed on drop if the download fails
        let written = self.download_to(url, &file).await?;
        debug!("Downloaded {url} ({written} bytes) to {}", file.path().display());

        Ok(file)
    }
}
