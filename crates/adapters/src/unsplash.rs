use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Deserialize;

use blog_core::config::UnsplashConfig;
use blog_core::{PhotoCandidate, PhotoSearch, PhotoSearchError};

use crate::error::AdapterError;

const PER_PAGE: &str = "10";

/// Photo search against the Unsplash REST API.
pub struct UnsplashClient {
    client: Client,
    base_url: String,
    access_key: String,
    orientation: String,
    app_name: String,
}

impl UnsplashClient {
    pub fn new(config: &UnsplashConfig) -> Result<Self, AdapterError> {
        if config.access_key.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "unsplash.access_key must not be empty".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout.max(1)))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            access_key: config.access_key.trim().to_string(),
            orientation: config.orientation.clone(),
            app_name: config.app_name.clone(),
        })
    }

    async fn search_photos(&self, query: &str) -> Result<Vec<PhotoCandidate>, AdapterError> {
        let url = format!("{}/search/photos", self.base_url);
        debug!("GET {url} query=\"{query}\"");
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Client-ID {}", self.access_key))
            .header("Accept-Version", "v1")
            .query(&[
                ("query", query),
                ("per_page", PER_PAGE),
                ("orientation", self.orientation.as_str()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AdapterError::from_response(response).await);
        }

        let parsed: SearchResponse = response.json().await?;
        Ok(parsed
            .results
            .into_iter()
            .map(|photo| PhotoCandidate {
                url: photo.urls.regular.or(photo.urls.full).unwrap_or_default(),
                photographer_name: photo.user.name,
                photographer_profile_url: photo
                    .user
                    .links
                    .html
                    .map(|link| referral_link(&link, &self.app_name))
                    .unwrap_or_default(),
            })
            .collect())
    }
}

#[async_trait]
impl PhotoSearch for UnsplashClient {
    async fn search(&self, query: &str) -> Result<Vec<PhotoCandidate>, PhotoSearchError> {
        Ok(self.search_photos(query).await?)
    }
}

/// Stands in for Unsplash when no access key is configured. Every search
/// comes back empty, so posts go out without an image.
pub struct NoPhotoSearch;

#[async_trait]
impl PhotoSearch for NoPhotoSearch {
    async fn search(&self, _query: &str) -> Result<Vec<PhotoCandidate>, PhotoSearchError> {
        Ok(Vec::new())
    }
}

/// Unsplash requires profile links to carry the app's referral parameters.
pub fn referral_link(link: &str, app_name: &str) -> String {
    let separator = if link.contains('?') { '&' } else { '?' };
    format!("{link}{separator}utm_source={app_name}&utm_medium=referral")
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Photo>,
}

#[derive(Debug, Deserialize)]
struct Photo {
    urls: PhotoUrls,
    user: PhotoUser,
}

#[derive(Debug, Deserialize)]
struct PhotoUrls {
    #[serde(default)]
    regular: Option<String>,
    #[serde(default)]
    full: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PhotoUser {
    #[serde(default)]
    name: String,
    #[serde(default)]
    links: UserLinks,
}

#[derive(Debug, Default, Deserialize)]
struct UserLinks {
    #[serde(default)]
    html: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String) -> UnsplashConfig {
        UnsplashConfig {
            access_key: "unsplash-key".into(),
            base_url,
            ..UnsplashConfig::default()
        }
    }

    #[test]
    fn referral_link_appends_utm_parameters() {
        assert_eq!(
            referral_link("https://unsplash.com/@ana", "blog_pipeline"),
            "https://unsplash.com/@ana?utm_source=blog_pipeline&utm_medium=referral"
        );
        assert_eq!(
            referral_link("https://unsplash.com/@ana?x=1", "app"),
            "https://unsplash.com/@ana?x=1&utm_source=app&utm_medium=referral"
        );
    }

    #[test]
    fn missing_access_key_is_a_config_error() {
        let result = UnsplashClient::new(&UnsplashConfig::default());
        assert!(matches!(result, Err(AdapterError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn search_maps_results_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/photos"))
            .and(query_param("query", "hiking"))
            .and(query_param("orientation", "landscape"))
            .and(header("authorization", "Client-ID unsplash-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 2,
                "results": [
                    {
                        "urls": {
                            "regular": "https://images.unsplash.com/1",
                            "full": "https://images.unsplash.com/1-full"
                        },
                        "user": {
                            "name": "Ana Trail",
                            "links": { "html": "https://unsplash.com/@ana" }
                        }
                    },
                    {
                        "urls": { "full": "https://images.unsplash.com/2-full" },
                        "user": { "name": "Bo", "links": {} }
                    }
                ]
            })))
            .mount(&server)
            .await;

        let client = UnsplashClient::new(&config(server.uri())).unwrap();
        let photos = client.search("hiking").await.unwrap();

        assert_eq!(photos.len(), 2);
        assert_eq!(photos[0].url, "https://images.unsplash.com/1");
        assert_eq!(photos[0].photographer_name, "Ana Trail");
        assert_eq!(
            photos[0].photographer_profile_url,
            "https://unsplash.com/@ana?utm_source=blog_pipeline&utm_medium=referral"
        );
        assert_eq!(photos[1].url, "https://images.unsplash.com/2-full");
        assert!(photos[1].photographer_profile_url.is_empty());
    }

    #[tokio::test]
    async fn empty_results_are_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
            .mount(&server)
            .await;

        let client = UnsplashClient::new(&config(server.uri())).unwrap();
        assert!(client.search("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn http_errors_surface() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Rate Limit Exceeded"))
            .mount(&server)
            .await;

        let client = UnsplashClient::new(&config(server.uri())).unwrap();
        let error = client.search("hiking").await.unwrap_err();
        assert!(error.to_string().contains("403"));
    }
}
