use crate::error::FetchError;
use reqwest::{StatusCode, Url, redirect};
use std::{
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};
use tempfile::NamedTempFile;

/// Bounds applied to every outbound image download.
#[derive(Clone, Debug)]
pub struct FetchConfig {
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub max_redirects: usize,
    pub max_image_bytes: u64,
    /// Directory for downloaded images; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
            max_redirects: 5,
            max_image_bytes: 20 * 1024 * 1024,
            scratch_dir: None,
        }
    }
}

/// A downloaded image stored in a temporary file.
///
/// The file is removed when this value is dropped.
#[derive(Debug)]
pub struct DownloadedImage {
    file: NamedTempFile,
    len: u64,
}

impl DownloadedImage {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Downloads images over HTTP(S) into scoped temporary files.
#[derive(Clone, Debug)]
pub struct ImageFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl ImageFetcher {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .redirect(redirect::Policy::limited(config.max_redirects))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetches `url`; only a 200 response counts as success.
    pub async fn fetch(&self, url: &str) -> Result<DownloadedImage, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(format!(
                "unsupported scheme {}",
                parsed.scheme()
            )));
        }

        let mut response = self.client.get(parsed).send().await?;
        if response.status() != StatusCode::OK {
            return Err(FetchError::Status(response.status()));
        }

        let limit = self.config.max_image_bytes;
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(FetchError::TooLarge { limit });
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if (body.len() + chunk.len()) as u64 > limit {
                return Err(FetchError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        log::debug!("Downloaded {} bytes from {url}", body.len());

        self.store(&body)
    }

    fn store(&self, bytes: &[u8]) -> Result<DownloadedImage, FetchError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("facedet-");
        let mut file = match &self.config.scratch_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(bytes)?;
        file.flush()?;

        Ok(DownloadedImage {
            file,
            len: bytes.len() as u64,
        })
    }
}
