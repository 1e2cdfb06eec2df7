use std::future::Future;
use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Url};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::domain::Location;
use crate::error::{EnaError, FetchError};
use crate::retry::{RetryPolicy, retry_transfer};

const PART_SUFFIX: &str = ".part";

fn part_prefix(file_name: &str) -> String {
    format!(".{file_name}.")
}

/// Moves the bytes behind a [`Location`] to a local path.
///
/// Implementations must never leave a partial file at `destination`: either
/// the complete body is placed there atomically or the path is untouched.
pub trait Transport: Send + Sync {
    fn fetch(
        &self,
        location: &Location,
        destination: &Path,
    ) -> impl Future<Output = Result<(), FetchError>> + Send;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl HttpTransport {
    pub fn new(retry: RetryPolicy, cancel: CancellationToken) -> Result<Self, EnaError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ena-fetch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EnaError::HttpClient(err.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .read_timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| EnaError::HttpClient(err.to_string()))?;

        Ok(Self {
            client,
            retry,
            cancel,
        })
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    async fn attempt(&self, url: &Url, destination: &Path) -> Result<(), FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(classify_error)?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        let expected = response.content_length();

        let parent = destination
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent).await?;
        let file_name = destination
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "download".to_string());

        // Random suffix keeps concurrent writers of the same name apart; the
        // temp path is removed on drop unless persisted.
        let temp = tempfile::Builder::new()
            .prefix(&part_prefix(&file_name))
            .suffix(PART_SUFFIX)
            .tempfile_in(parent)?;
        let (file, temp_path) = temp.into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut received = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(classify_error)?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(expected) = expected {
            if received != expected {
                return Err(FetchError::Incomplete { expected, received });
            }
        }

        temp_path
            .persist(destination)
            .map_err(|err| FetchError::Io(err.error.to_string()))?;
        Ok(())
    }
}

impl Transport for HttpTransport {
    async fn fetch(&self, location: &Location, destination: &Path) -> Result<(), FetchError> {
        let url = &location.to_url()?;
        let label = location.as_str();
        retry_transfer(&self.retry, label, &self.cancel, |_| async move {
            tokio::select! {
                result = self.attempt(url, destination) => result,
                _ = self.cancel.cancelled() => Err(FetchError::Cancelled),
            }
        })
        .await
    }
}

/// Remove temporary files in `dir` left behind by unfinished transfers of
/// `names`. A forced exit skips the cleanup that normally drops them.
pub fn sweep_partials<'a>(dir: &Path, names: impl IntoIterator<Item = &'a str>) -> usize {
    let prefixes: Vec<String> = names.into_iter().map(part_prefix).collect();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.ends_with(PART_SUFFIX)
            || !prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
        {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                tracing::debug!("Removed stale {}", entry.path().display());
                removed += 1;
            }
            Err(err) => tracing::warn!("Cannot remove {}: {err}", entry.path().display()),
        }
    }
    removed
}

fn classify_error(err: reqwest::Error) -> FetchError {
    if err.is_builder() || err.is_redirect() {
        return FetchError::Request(err.to_string());
    }
    FetchError::Transport(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_location_fails_without_request() {
        let transport =
            HttpTransport::new(RetryPolicy::immediate(3), CancellationToken::new()).unwrap();
        let temp = tempfile::tempdir().unwrap();
        let location: Location = "gopher://host/a.fastq.gz".parse().unwrap();
        let result = transport
            .fetch(&location, &temp.path().join("a.fastq.gz"))
            .await;
        assert!(matches!(result, Err(FetchError::InvalidLocation(_))));
        assert!(!temp.path().join("a.fastq.gz").exists());
    }

    #[test]
    fn sweep_removes_only_matching_partials() {
        let temp = tempfile::tempdir().unwrap();
        for name in [
            ".a.fastq.gz.Xy12Ab.part",
            ".b.fastq.gz.Q9zz00.part",
            "a.fastq.gz",
            ".other.fastq.gz.abcdef.part",
        ] {
            std::fs::write(temp.path().join(name), b"x").unwrap();
        }
        let removed = sweep_partials(temp.path(), ["a.fastq.gz", "b.fastq.gz"]);
        assert_eq!(removed, 2);
        let mut left: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        left.sort();
        assert_eq!(left, vec![".other.fastq.gz.abcdef.part", "a.fastq.gz"]);
        assert_eq!(sweep_partials(&temp.path().join("missing"), ["a.fastq.gz"]), 0);
    }
}
