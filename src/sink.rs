use std::path::{Path, PathBuf};

use axum::body::Bytes;
use futures::{pin_mut, Stream, StreamExt};
use tokio::{
    fs,
    io::{AsyncWrite, AsyncWriteExt, BufWriter},
};
use tracing::{debug, warn};

use crate::error::UploadError;

/// Streams upload bodies into files directly under the upload root.
pub struct FileSink {
    root: PathBuf,
}

impl FileSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    // `filename` must already have passed through `sanitize_filename`,
    // so the destination is always a direct child of the root.
    // An existing file of the same name is replaced.
    pub async fn store<S>(&self, filename: &str, stream: S) -> Result<u64, UploadError>
    where
        S: Stream<Item = Result<Bytes, UploadError>>,
    {
        let path = self.root.join(filename);
        let file = fs::File::create(&path).await?;
        let mut writer = BufWriter::new(file);

        match transfer(stream, &mut writer).await {
            Ok(written) => {
                debug!(filename = filename, bytes = written, "stored upload");
                Ok(written)
            }
            Err(err) => {
                // close the handle before removing the partial file
                drop(writer);
                if let Err(rm_err) = fs::remove_file(&path).await {
                    warn!(
                        filename = filename,
                        error = %rm_err,
                        "failed to remove partial upload",
                    );
                }
                Err(err)
            }
        }
    }
}

async fn transfer<S, W>(stream: S, writer: &mut W) -> Result<u64, UploadError>
where
    S: Stream<Item = Result<Bytes, UploadError>>,
    W: AsyncWrite + Unpin,
{
    pin_mut!(stream);

    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        writer.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    writer.flush().await?;

    Ok(written)
}

/// Reduces an untrusted client-supplied filename to a safe flat name.
///
/// Traversal segments and absolute paths are rejected outright; a
/// value with separators keeps only its final segment, so
/// `a/b/evil.txt` becomes `evil.txt`.
pub fn sanitize_filename(raw: &str) -> Result<&str, UploadError> {
    let invalid = || UploadError::InvalidFilename(raw.to_string());

    if raw.is_empty() || Path::new(raw).is_absolute() {
        return Err(invalid());
    }
    if raw.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(invalid());
    }

    let name = raw.rsplit(['/', '\\']).next().unwrap_or("");
    if name.is_empty() || name == "." {
        return Err(invalid());
    }

    Ok(name)
}

#[cfg(test)]
mod tests {
    use std::io;

    use futures::stream;
    use tempfile::tempdir;

    use super::*;

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = Result<Bytes, UploadError>> {
        let items: Vec<_> = parts
            .iter()
            .map(|part| Ok(Bytes::from_static(part.as_bytes())))
            .collect();
        stream::iter(items)
    }

    #[tokio::test]
    async fn store_writes_all_chunks() {
        let dir = tempdir().unwrap();
        let sink = FileSink::new(dir.path());

        let written = sink
            .store("data.bin", chunks(&["hello ", "upload ", "world"]))
            .await
            .unwrap();

        assert_eq!(written, 18);
        let content = std::fs::read_to_string(dir.path().join("data.bin")).unwrap();
        assert_eq!(content, "hello upload world");
    }

    #[tokio::test]
    async fn store_removes_partial_file_on_stream_error() {
        let dir = tempdir().unwrap();
        let sink = FileSink::new(dir.path());

        let stream = stream::iter(vec![
            Ok(Bytes::from_static(b"partial data")),
            Err(UploadError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "client went away",
            ))),
        ]);

        let result = sink.store("broken.bin", stream).await;

        assert!(matches!(result, Err(UploadError::Io(_))));
        assert!(!dir.path().join("broken.bin").exists());
    }

    #[tokio::test]
    async fn store_overwrites_existing_file() {
        let dir = tempdir().unwrap();
        let sink = FileSink::new(dir.path());

        sink.store("same.txt", chunks(&["first upload, rather long"]))
            .await
            .unwrap();
        sink.store("same.txt", chunks(&["second"])).await.unwrap();

        let content = std::fs::read_to_string(dir.path().join("same.txt")).unwrap();
        assert_eq!(content, "second");
    }

    #[test]
    fn sanitize_keeps_plain_names() {
        assert_eq!(sanitize_filename("report.pdf").unwrap(), "report.pdf");
    }

    #[test]
    fn sanitize_keeps_only_the_final_segment() {
        assert_eq!(sanitize_filename("a/b/evil.txt").unwrap(), "evil.txt");
        assert_eq!(sanitize_filename("dir\\file.txt").unwrap(), "file.txt");
    }

    #[test]
    fn sanitize_rejects_traversal_segments() {
        assert!(matches!(
            sanitize_filename("../../etc/passwd"),
            Err(UploadError::InvalidFilename(_))
        ));
        assert!(matches!(
            sanitize_filename("..\\secrets"),
            Err(UploadError::InvalidFilename(_))
        ));
    }

    #[test]
    fn sanitize_rejects_absolute_paths() {
        assert!(matches!(
            sanitize_filename("/etc/passwd"),
            Err(UploadError::InvalidFilename(_))
        ));
    }

    #[test]
    fn sanitize_rejects_empty_and_degenerate_names() {
        assert!(matches!(
            sanitize_filename(""),
            Err(UploadError::InvalidFilename(_))
        ));
        assert!(matches!(
            sanitize_filename("a/b/"),
            Err(UploadError::InvalidFilename(_))
        ));
        assert!(matches!(
            sanitize_filename("."),
            Err(UploadError::InvalidFilename(_))
        ));
    }
}
