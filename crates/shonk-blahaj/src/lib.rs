//! Random image API adapter.
//!
//! The API answers `{ "url": "..." }`; the image itself is a second GET.
//! Failures surface as `Error::External`; retrying is left to the caller.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use shonk_core::{
    errors::Error,
    ports::{FetchedImage, ImageProvider},
    Result,
};

#[derive(Debug, Deserialize)]
struct RandomImage {
    url: String,
}

#[derive(Clone, Debug)]
pub struct BlahajClient {
    api_url: String,
    http: reqwest::Client,
}

impl BlahajClient {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("shonk/0.1")
            .build()
            .map_err(|e| Error::Config(format!("http client build failed: {e}")))?;
        Ok(Self {
            api_url: api_url.into(),
            http,
        })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::External(format!("image api request error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::External(format!(
                "image api returned HTTP {status} for {url}"
            )));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ImageProvider for BlahajClient {
    async fn fetch_random(&self) -> Result<FetchedImage> {
        let meta: RandomImage = self
            .get(&self.api_url)
            .await?
            .json()
            .await
            .map_err(|e| Error::External(format!("image api response error: {e}")))?;

        let file_name = file_name_from_url(&meta.url).ok_or_else(|| {
            Error::External(format!("image url has no file name: {}", meta.url))
        })?;

        let bytes = self
            .get(&meta.url)
            .await?
            .bytes()
            .await
            .map_err(|e| Error::External(format!("image download error: {e}")))?
            .to_vec();

        tracing::info!(file = %file_name, bytes = bytes.len(), "downloaded image");
        Ok(FetchedImage {
            url: meta.url,
            file_name,
            bytes,
        })
    }
}

/// Last path segment of `url`, without query or fragment.
fn file_name_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let path = path.split_once("://").map(|(_, rest)| rest).unwrap_or(path);
    let (_, tail) = path.split_once('/')?;
    let name = tail.rsplit('/').next().unwrap_or_default().trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_is_last_path_segment() {
        assert_eq!(
            file_name_from_url("https://cdn.example/images/abc/shonk-12.png").as_deref(),
            Some("shonk-12.png")
        );
        assert_eq!(
            file_name_from_url("https://cdn.example/a.jpg?size=large#top").as_deref(),
            Some("a.jpg")
        );
    }

    #[test]
    fn urls_without_file_names_are_rejected() {
        assert_eq!(file_name_from_url("https://cdn.example"), None);
        assert_eq!(file_name_from_url("https://cdn.example/"), None);
        assert_eq!(file_name_from_url("https://cdn.example/images/"), None);
        assert_eq!(file_name_from_url("https://cdn.example/.."), None);
    }

    #[test]
    fn client_builds_with_timeout() {
        let client = BlahajClient::new("https://example.invalid/random", Duration::from_secs(1));
        assert!(client.is_ok());
    }
}
