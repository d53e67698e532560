use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use std::path::Path;
use tracing::{debug, trace};
use url::Url;

use super::SourceFetcher;
use crate::config::HttpConfig;
use crate::errors::{AppResult, SourceError, SourceResult};
use crate::utils::{CompressionFormat, DecompressionService, SourceLocation, UrlUtils};

/// Fetcher for http(s) and local file sources with gzip detection
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self { client })
    }

    async fn fetch_remote(&self, url: &Url) -> SourceResult<Vec<u8>> {
        let display_url = UrlUtils::obfuscate_credentials(url.as_str());
        debug!("Connecting to {}", display_url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| map_reqwest_error(&display_url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::http(display_url, status.as_u16()));
        }

        let total_size = response.content_length();
        let mut body = Vec::with_capacity(total_size.unwrap_or(0).min(64 * 1024 * 1024) as usize);
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| map_reqwest_error(&display_url, e))?;
            body.extend_from_slice(&chunk);
            trace!(
                "Downloaded {} / {:?} bytes from {}",
                body.len(),
                total_size,
                display_url
            );
        }

        debug!("Download completed for {}: {} bytes", display_url, body.len());
        Ok(body)
    }

    async fn read_file(path: &Path) -> SourceResult<Vec<u8>> {
        debug!("Reading local source {}", path.display());
        tokio::fs::read(path)
            .await
            .map_err(|e| SourceError::io(path.display().to_string(), e.to_string()))
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch_text(&self, location: &str) -> SourceResult<String> {
        let raw = match UrlUtils::classify(location) {
            SourceLocation::Remote(url) => self.fetch_remote(&url).await?,
            SourceLocation::File(path) => Self::read_file(&path).await?,
        };
        decode_body(location, raw)
    }
}

/// Decompress if needed and decode as UTF-8, replacing invalid sequences.
pub(crate) fn decode_body(location: &str, raw: Vec<u8>) -> SourceResult<String> {
    let format = DecompressionService::detect_compression_format(&raw);
    let bytes = match format {
        CompressionFormat::Uncompressed => raw,
        CompressionFormat::Gzip => {
            debug!("Content from {} is gzip compressed", UrlUtils::obfuscate_credentials(location));
            DecompressionService::decompress(Bytes::from(raw)).map_err(|e| {
                SourceError::parse_error("gzip", format!("Failed to decompress content: {e}"))
            })?
        }
    };

    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            debug!(
                "Content from {} is not valid UTF-8, decoding lossily",
                UrlUtils::obfuscate_credentials(location)
            );
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    };

    // Strip a UTF-8 byte order mark so header detection sees `#EXTM3U` / `<?xml`
    Ok(match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    })
}

fn map_reqwest_error(display_url: &str, error: reqwest::Error) -> SourceError {
    if error.is_timeout() {
        SourceError::timeout(display_url)
    } else {
        SourceError::connection(
            display_url,
            UrlUtils::obfuscate_credentials(&error.to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[tokio::test]
    async fn test_reads_plain_and_gzip_files() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("list.m3u");
        std::fs::write(&plain, "#EXTM3U\n").unwrap();

        let gz = dir.path().join("guide.xml.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"<tv></tv>").unwrap();
        std::fs::write(&gz, encoder.finish().unwrap()).unwrap();

        let fetcher = HttpFetcher::new(&HttpConfig::default()).unwrap();
        assert_eq!(
            fetcher.fetch_text(plain.to_str().unwrap()).await.unwrap(),
            "#EXTM3U\n"
        );

        let file_url = format!("file://{}", gz.display());
        assert_eq!(fetcher.fetch_text(&file_url).await.unwrap(), "<tv></tv>");
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let fetcher = HttpFetcher::new(&HttpConfig::default()).unwrap();
        let result = fetcher.fetch_text("/definitely/not/here.m3u").await;
        assert!(matches!(result, Err(SourceError::Io { .. })));
    }

    #[test]
    fn test_decode_strips_bom_and_tolerates_bad_utf8() {
        let mut raw = "\u{feff}#EXTM3U\n".as_bytes().to_vec();
        raw.extend_from_slice(&[0xff, b'\n']);
        let text = decode_body("mem", raw).unwrap();
        assert!(text.starts_with("#EXTM3U"));
        assert!(text.contains('\u{fffd}'));
    }
}
