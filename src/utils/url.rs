//! URL utilities for consistent source handling

use regex::Regex;
use std::path::PathBuf;
use url::Url;

/// Where a configured source actually lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Remote(Url),
    File(PathBuf),
}

/// URL utilities for consistent URL handling
pub struct UrlUtils;

impl UrlUtils {
    /// Classify a configured source string as an HTTP(S) URL or a local file.
    ///
    /// `file://` URLs and anything that does not parse as an absolute URL are
    /// treated as filesystem paths.
    pub fn classify(source: &str) -> SourceLocation {
        let trimmed = source.trim();
        match Url::parse(trimmed) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => SourceLocation::Remote(url),
            Ok(url) if url.scheme() == "file" => match url.to_file_path() {
                Ok(path) => SourceLocation::File(path),
                Err(()) => SourceLocation::File(PathBuf::from(url.path())),
            },
            _ => SourceLocation::File(PathBuf::from(trimmed)),
        }
    }

    /// Whether a line looks like a fetchable source reference
    pub fn looks_like_source(line: &str) -> bool {
        let lower = line.trim().to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("file://")
    }

    /// Obfuscate credentials in URLs for safe logging
    ///
    /// Handles userinfo (`user:pass@host`) and the credential query parameters
    /// IPTV panels commonly use.
    pub fn obfuscate_credentials(url: &str) -> String {
        let mut obfuscated = url.to_string();

        if let Ok(parsed) = Url::parse(url) {
            if !parsed.username().is_empty() || parsed.password().is_some() {
                let mut new_url = parsed.clone();
                let _ = new_url.set_username("****");
                let _ = new_url.set_password(Some("****"));
                obfuscated = new_url.to_string();
            }
        }

        let sensitive_params = ["username", "password", "user", "pass", "pwd", "passwd", "token"];

        for param in &sensitive_params {
            let pattern = format!(r"(?i)([?&]{}=)[^&]*", regex::escape(param));
            if let Ok(re) = Regex::new(&pattern) {
                obfuscated = re.replace_all(&obfuscated, "${1}****").to_string();
            }
        }

        obfuscated
    }
}
