use bytes::Bytes;
use flate2::read::GzDecoder;
use std::io::Read;

/// Compression formats detected by magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    Gzip,
    Uncompressed,
}

/// Magic byte detection and decompression for downloaded sources.
///
/// Guide feeds are frequently published as `.xml.gz`, sometimes without a
/// matching `Content-Encoding`, so detection looks at the payload itself.
pub struct DecompressionService;

impl DecompressionService {
    pub fn detect_compression_format(data: &[u8]) -> CompressionFormat {
        match infer::get(data) {
            Some(kind) if kind.mime_type() == "application/gzip" => CompressionFormat::Gzip,
            _ => CompressionFormat::Uncompressed,
        }
    }

    /// Decompress data based on detected format
    pub fn decompress(data: Bytes) -> std::io::Result<Vec<u8>> {
        match Self::detect_compression_format(&data) {
            CompressionFormat::Gzip => Self::decompress_gzip(&data),
            CompressionFormat::Uncompressed => Ok(data.to_vec()),
        }
    }

    fn decompress_gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        Ok(decompressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_detect_uncompressed() {
        let data = b"<?xml version=\"1.0\"?><tv></tv>";
        let format = DecompressionService::detect_compression_format(data);
        assert_eq!(format, CompressionFormat::Uncompressed);
    }

    #[test]
    fn test_detect_and_decompress_gzip() {
        let original_data = b"<tv><channel id=\"a\"/></tv>";

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(original_data).unwrap();
        let compressed = encoder.finish().unwrap();

        assert_eq!(
            DecompressionService::detect_compression_format(&compressed),
            CompressionFormat::Gzip
        );

        let decompressed = DecompressionService::decompress(Bytes::from(compressed)).unwrap();
        assert_eq!(decompressed, original_data);
    }

    #[test]
    fn test_truncated_gzip_is_an_error() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&[b'x'; 4096]).unwrap();
        let mut compressed = encoder.finish().unwrap();
        compressed.truncate(compressed.len() / 2);

        assert!(DecompressionService::decompress(Bytes::from(compressed)).is_err());
    }
}
