//! Normalizes image references (data URLs or remote HTTPS URLs) into
//! base64-encoded payloads a provider's multimodal content part can carry.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::LlmError;

const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

pub struct FetchedImage {
    pub data: String,
    pub mime_type: String,
}

/// Resolves an image reference. `is_prod` gates the https-only restriction on
/// remote fetches; error messages never echo the source URL.
pub async fn resolve_image(client: &reqwest::Client, reference: &str, is_prod: bool) -> Result<FetchedImage, LlmError> {
    if let Some(rest) = reference.strip_prefix("data:") {
        return parse_data_url(rest);
    }

    if reference.starts_with("http://") || reference.starts_with("https://") {
        return fetch_remote(client, reference, is_prod).await;
    }

    Err(LlmError::ImageFetchError)
}

fn parse_data_url(rest: &str) -> Result<FetchedImage, LlmError> {
    let (header, payload) = rest.split_once(',').ok_or(LlmError::ImageFetchError)?;
    let (mime, is_base64) = match header.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (header, false),
    };

    if !mime.starts_with("image/") {
        return Err(LlmError::ImageFetchError);
    }

    let data = if is_base64 {
        payload.to_owned()
    } else {
        BASE64.encode(payload.as_bytes())
    };

    let decoded_len = BASE64.decode(&data).map_err(|_| LlmError::ImageFetchError)?.len();

    if decoded_len > MAX_IMAGE_BYTES {
        return Err(LlmError::ImageFetchError);
    }

    Ok(FetchedImage { data, mime_type: mime.to_owned() })
}

async fn fetch_remote(client: &reqwest::Client, url: &str, is_prod: bool) -> Result<FetchedImage, LlmError> {
    if is_prod && !url.starts_with("https://") {
        return Err(LlmError::ImageFetchError);
    }

    let response = client.get(url).send().await.map_err(|_| LlmError::ImageFetchError)?;

    if !response.status().is_success() {
        return Err(LlmError::ImageFetchError);
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();

    if !content_type.starts_with("image/") {
        return Err(LlmError::ImageFetchError);
    }

    if let Some(len) = response.content_length()
        && len as usize > MAX_IMAGE_BYTES
    {
        return Err(LlmError::ImageFetchError);
    }

    let bytes = response.bytes().await.map_err(|_| LlmError::ImageFetchError)?;

    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(LlmError::ImageFetchError);
    }

    Ok(FetchedImage { data: BASE64.encode(&bytes), mime_type: content_type })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_base64_data_url() {
        let png_1x1 = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNk+A8AAQUBAScY42YAAAAASUVORK5CYII=";
        let url = format!("data:image/png;base64,{png_1x1}");
        let image = parse_data_url(url.strip_prefix("data:").unwrap()).unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.data, png_1x1);
    }

    #[test]
    fn rejects_non_image_mime() {
        let url = "data:text/plain;base64,aGVsbG8=";
        assert!(parse_data_url(url.strip_prefix("data:").unwrap()).is_err());
    }

    #[test]
    fn encodes_raw_payload_when_not_base64() {
        let url = "data:image/svg+xml,hello";
        let image = parse_data_url(url.strip_prefix("data:").unwrap()).unwrap();
        assert_eq!(image.data, BASE64.encode("hello"));
    }
}
