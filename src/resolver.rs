use crate::models::UrlsSource;
use once_cell::sync::Lazy;
use reqwest::Client;
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

/// Optional host allowlist, read once at first use. Unset means any host.
static DOMAIN_ALLOWLIST: Lazy<Option<Vec<String>>> = Lazy::new(|| {
    std::env::var("IMAGE_DOMAIN_ALLOWLIST")
        .ok()
        .map(|raw| {
            raw.split([',', ' ', '\n', '\t'])
                .map(|entry| entry.trim().to_lowercase())
                .filter(|entry| !entry.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|entries| !entries.is_empty())
});

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no image urls provided")]
    Empty,
    #[error("too many images: {0} exceeds the batch limit")]
    TooMany(usize),
    #[error("invalid image url: {0}")]
    InvalidUrl(String),
    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),
    #[error("domain not allowed: {0}")]
    DomainNotAllowed(String),
}

/// Per-item fetch failures. The batch continues past these.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("source unreachable: {0}")]
    Unreachable(String),
    #[error("payload is not an image: {0}")]
    NotAnImage(String),
}

#[derive(Debug, Clone)]
pub struct ResolvedImage {
    pub url: String,
    pub bytes: Vec<u8>,
    pub mime: String,
}

/// Normalize a pasted URL source into a trimmed, deduplicated, validated
/// list. Order is preserved; it drives SKU assignment and output order.
pub fn resolve_sources(source: &UrlsSource, max_images: usize) -> Result<Vec<String>, ResolveError> {
    let tokens = match source {
        UrlsSource::Single(value) => tokenize(value),
        UrlsSource::Multiple(values) => values.iter().flat_map(|value| tokenize(value)).collect(),
    };

    let urls = deduplicate(tokens);
    if urls.is_empty() {
        return Err(ResolveError::Empty);
    }
    if urls.len() > max_images {
        return Err(ResolveError::TooMany(urls.len()));
    }

    let allowlist = DOMAIN_ALLOWLIST.as_ref();
    for url in &urls {
        let parsed =
            reqwest::Url::parse(url).map_err(|_| ResolveError::InvalidUrl(url.clone()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ResolveError::UnsupportedScheme(url.clone()));
        }
        if let Some(allowed) = allowlist
            && let Some(host) = parsed.host_str()
            && !host_allowed(host, allowed)
        {
            return Err(ResolveError::DomainNotAllowed(host.to_string()));
        }
    }

    Ok(urls)
}

/// Parse an uploaded plain-text file body: one URL per line, blanks skipped.
pub fn parse_upload(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Download one image. `UnreachableSource` covers network errors and non-2xx
/// responses; `InvalidFormat` covers payloads that are not image bytes.
pub async fn fetch_image(client: &Client, url: &str) -> Result<ResolvedImage, FetchError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|err| FetchError::Unreachable(err.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Unreachable(format!("HTTP {status}")));
    }

    let header_mime = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or(value).trim().to_string());

    let bytes = response
        .bytes()
        .await
        .map_err(|err| FetchError::Unreachable(err.to_string()))?
        .to_vec();

    if bytes.is_empty() {
        return Err(FetchError::NotAnImage("empty response body".into()));
    }

    let mime = match header_mime {
        Some(ref mime) if mime.starts_with("image/") => mime.clone(),
        _ => sniff_image_mime(&bytes)
            .ok_or_else(|| FetchError::NotAnImage("unrecognized content".into()))?
            .to_string(),
    };

    debug!(
        target = "wooex.resolver",
        url = url,
        bytes = bytes.len(),
        mime = %mime,
        "image fetched"
    );

    Ok(ResolvedImage {
        url: url.to_string(),
        bytes,
        mime,
    })
}

fn tokenize(value: &str) -> Vec<String> {
    value
        .split(['\n', ',', ';', '|'])
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn deduplicate(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut result = Vec::new();
    for value in values {
        if seen.insert(value.clone()) {
            result.push(value);
        }
    }
    result
}

fn host_allowed(host: &str, allowed: &[String]) -> bool {
    let host = host.to_lowercase();
    allowed
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
}

/// Magic-byte fallback for servers that omit or mislabel Content-Type.
fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("image/png")
    } else if bytes.starts_with(b"GIF8") {
        Some("image/gif")
    } else if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else if bytes.starts_with(b"BM") {
        Some("image/bmp")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_mixed_separators_and_trims() {
        let source = UrlsSource::Single(
            "https://a.example/1.jpg\n https://a.example/2.jpg , https://a.example/3.jpg".into(),
        );
        let urls = resolve_sources(&source, 24).expect("resolve");
        assert_eq!(urls.len(), 3);
        assert_eq!(urls[0], "https://a.example/1.jpg");
    }

    #[test]
    fn deduplicates_preserving_first_occurrence_order() {
        let source = UrlsSource::Multiple(vec![
            "https://a.example/1.jpg".into(),
            "https://a.example/2.jpg".into(),
            "https://a.example/1.jpg".into(),
        ]);
        let urls = resolve_sources(&source, 24).expect("resolve");
        assert_eq!(
            urls,
            vec![
                "https://a.example/1.jpg".to_string(),
                "https://a.example/2.jpg".to_string(),
            ]
        );
    }

    #[test]
    fn empty_input_is_rejected() {
        let source = UrlsSource::Single("  \n  ".into());
        assert!(matches!(
            resolve_sources(&source, 24),
            Err(ResolveError::Empty)
        ));
    }

    #[test]
    fn rejects_non_http_schemes() {
        let source = UrlsSource::Single("file:///etc/passwd".into());
        assert!(matches!(
            resolve_sources(&source, 24),
            Err(ResolveError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn enforces_batch_limit() {
        let urls: Vec<String> = (0..5).map(|i| format!("https://a.example/{i}.jpg")).collect();
        let source = UrlsSource::Multiple(urls);
        assert!(matches!(
            resolve_sources(&source, 4),
            Err(ResolveError::TooMany(5))
        ));
    }

    #[test]
    fn upload_parsing_skips_blank_lines() {
        let body = "https://a.example/1.jpg\n\n  https://a.example/2.jpg  \n";
        let urls = parse_upload(body);
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[1], "https://a.example/2.jpg");
    }

    #[test]
    fn sniffs_common_image_formats() {
        assert_eq!(sniff_image_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(
            sniff_image_mime(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A]),
            Some("image/png")
        );
        assert_eq!(sniff_image_mime(b"GIF89a..."), Some("image/gif"));
        assert_eq!(sniff_image_mime(b"RIFF\x00\x00\x00\x00WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff_image_mime(b"not an image"), None);
    }
}
