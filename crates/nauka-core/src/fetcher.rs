//! Streaming document download into a private temporary file.

use std::io::Write;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::Rejection;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP error: {0}")]
    Status(reqwest::StatusCode),
    #[error("incomplete download: received {received} of {expected} bytes")]
    Incomplete { expected: u64, received: u64 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FetchError> for Rejection {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Incomplete { expected, received } => {
                Rejection::Incomplete { expected, received }
            }
            other => Rejection::Transport(other.to_string()),
        }
    }
}

/// A fully downloaded document. The backing file is removed on drop.
#[derive(Debug)]
pub struct RawDocument {
    file: NamedTempFile,
    pub bytes: u64,
}

impl RawDocument {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Delete the backing file now, logging instead of failing if it cannot be removed.
    pub fn discard(self) {
        let path = self.file.path().to_path_buf();
        if let Err(e) = self.file.close() {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove downloaded file");
        }
    }
}

/// Downloads documents for one worker.
#[derive(Clone)]
pub struct DocumentFetcher {
    client: reqwest::Client,
    tmp_dir: PathBuf,
}

impl DocumentFetcher {
    pub fn new(client: reqwest::Client, tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            tmp_dir: tmp_dir.into(),
        }
    }

    /// Stream `url` into a fresh temporary file.
    ///
    /// `progress` is called after every chunk with the bytes received so far
    /// and the declared length, if any.
    pub async fn fetch(
        &self,
        url: &str,
        mut progress: impl FnMut(u64, Option<u64>),
    ) -> Result<RawDocument, FetchError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }

        let total_bytes = response.content_length();

        std::fs::create_dir_all(&self.tmp_dir)?;
        let mut file = tempfile::Builder::new()
            .prefix("nauka-")
            .suffix(".pdf")
            .tempfile_in(&self.tmp_dir)?;

        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| interrupted(e, total_bytes, received))?;
            file.write_all(&chunk)?;
            received += chunk.len() as u64;
            progress(received, total_bytes);
        }
        file.flush()?;

        check_complete(total_bytes, received)?;
        tracing::debug!(url, bytes = received, "downloaded");

        Ok(RawDocument {
            file,
            bytes: received,
        })
    }
}

/// A body that breaks off before its declared length is incomplete, not a
/// transport failure.
fn interrupted(error: reqwest::Error, expected: Option<u64>, received: u64) -> FetchError {
    match expected {
        Some(expected) if received < expected => {
            tracing::debug!(error = %error, expected, received, "body ended early");
            FetchError::Incomplete { expected, received }
        }
        _ => FetchError::Transport(error),
    }
}

/// A declared length of zero is treated as unknown.
fn check_complete(expected: Option<u64>, received: u64) -> Result<(), FetchError> {
    match expected {
        Some(expected) if expected != 0 && expected != received => {
            Err(FetchError::Incomplete { expected, received })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_check_complete() {
        assert!(check_complete(Some(5000), 5000).is_ok());
        assert!(check_complete(None, 4000).is_ok());
        assert!(check_complete(Some(0), 4000).is_ok());
        match check_complete(Some(5000), 4000) {
            Err(FetchError::Incomplete { expected, received }) => {
                assert_eq!(expected, 5000);
                assert_eq!(received, 4000);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_incomplete_maps_to_rejection() {
        let r: Rejection = FetchError::Incomplete {
            expected: 10,
            received: 3,
        }
        .into();
        assert_eq!(
            r,
            Rejection::Incomplete {
                expected: 10,
                received: 3
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_writes_body() {
        let server = MockServer::start().await;
        let body = vec![7u8; 5000];
        Mock::given(method("GET"))
            .and(path("/doc.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let fetcher = DocumentFetcher::new(reqwest::Client::new(), dir.path());
        let mut last = 0;
        let doc = fetcher
            .fetch(&format!("{}/doc.pdf", server.uri()), |n, _| last = n)
            .await
            .unwrap();

        assert_eq!(doc.bytes, 5000);
        assert_eq!(last, 5000);
        assert_eq!(std::fs::read(doc.path()).unwrap(), body);

        let path = doc.path().to_path_buf();
        doc.discard();
        assert!(!path.exists());
    }

    /// Serve one response declaring `declared` bytes but sending only `sent`.
    fn truncating_server(declared: usize, sent: usize) -> String {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/pdf\r\nContent-Length: {}\r\n\r\n",
                declared
            );
            stream.write_all(head.as_bytes()).unwrap();
            stream.write_all(&vec![b'x'; sent]).unwrap();
            stream.flush().unwrap();
        });
        format!("http://{}/doc.pdf", addr)
    }

    #[tokio::test]
    async fn test_truncated_body_is_incomplete() {
        let url = truncating_server(5000, 4000);
        let dir = tempfile::tempdir().unwrap();
        let fetcher = DocumentFetcher::new(reqwest::Client::new(), dir.path());

        let err = fetcher.fetch(&url, |_, _| {}).await.unwrap_err();
        match err {
            FetchError::Incomplete { expected, received } => {
                assert_eq!(expected, 5000);
                assert_eq!(received, 4000);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(
            Rejection::from(FetchError::Incomplete {
                expected: 5000,
                received: 4000
            })
            .kind(),
            "incomplete"
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let fetcher = DocumentFetcher::new(reqwest::Client::new(), dir.path());
        let err = fetcher
            .fetch(&format!("{}/missing.pdf", server.uri()), |_, _| {})
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status(s) if s == reqwest::StatusCode::NOT_FOUND));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
