use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, info, warn};
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::json;

use blog_core::config::SiteConfig;
use blog_core::{
    ContentError, ContentManagement, CreatedPost, IdempotencyToken, ImageReference, PostStatus,
    PostSubmission, SiteId,
};

use crate::error::AdapterError;

/// Statuses searched when looking for an earlier post with the same slug.
const ANY_STATUS: &str = "publish,draft,pending,private,future";

pub fn slug_for(token: &IdempotencyToken) -> String {
    format!("post-{token}")
}

struct Site {
    base_url: String,
    username: String,
    app_password: String,
    default_status: PostStatus,
    client: Client,
}

impl Site {
    fn new(config: &SiteConfig) -> Result<Self, AdapterError> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(AdapterError::InvalidConfig(
                "site base_url must not be empty".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout.max(1)))
            .build()?;
        Ok(Self {
            base_url,
            username: config.username.clone(),
            app_password: config.app_password.clone(),
            default_status: config.default_status,
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(&self.username, Some(&self.app_password))
    }

    async fn send<T>(&self, builder: RequestBuilder) -> Result<T, AdapterError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = self.authed(builder).send().await?;
        if !response.status().is_success() {
            return Err(AdapterError::from_response(response).await);
        }
        Ok(response.json().await?)
    }
}

/// WordPress REST client for every configured site.
pub struct WordPressClient {
    sites: BTreeMap<SiteId, Site>,
}

impl WordPressClient {
    pub fn new(sites: &BTreeMap<String, SiteConfig>) -> Result<Self, AdapterError> {
        let sites: BTreeMap<SiteId, Site> = sites
            .iter()
            .map(|(name, config)| Ok((SiteId::new(name.clone()), Site::new(config)?)))
            .collect::<Result<_, AdapterError>>()?;
        Ok(Self { sites })
    }

    /// Checks the credentials of `site` and returns the account's display name.
    pub async fn verify(&self, site: &SiteId) -> Result<String, AdapterError> {
        let site = self.site(site)?;
        let user: WpUser = site
            .send(site.client.get(site.endpoint("users/me")).query(&[("context", "edit")]))
            .await?;
        Ok(user.name)
    }

    fn site(&self, id: &SiteId) -> Result<&Site, AdapterError> {
        self.sites
            .get(id)
            .ok_or_else(|| AdapterError::InvalidConfig(format!("site `{id}` is not configured")))
    }

    async fn lookup(
        &self,
        id: &SiteId,
        token: &IdempotencyToken,
    ) -> Result<Option<CreatedPost>, AdapterError> {
        let site = self.site(id)?;
        let slug = slug_for(token);
        let posts: Vec<WpPost> = site
            .send(site.client.get(site.endpoint("posts")).query(&[
                ("slug", slug.as_str()),
                ("status", ANY_STATUS),
                ("_fields", "id,link,date_gmt"),
            ]))
            .await?;
        Ok(posts.into_iter().next().map(WpPost::into_created))
    }

    async fn create(
        &self,
        id: &SiteId,
        submission: &PostSubmission,
    ) -> Result<CreatedPost, AdapterError> {
        let site = self.site(id)?;
        let body = NewPost {
            title: &submission.title,
            content: &submission.content_html,
            status: submission.status.unwrap_or(site.default_status).as_str(),
            slug: slug_for(&submission.token),
        };
        let post: WpPost = site
            .send(site.client.post(site.endpoint("posts")).json(&body))
            .await?;
        info!("created WordPress post {} ({})", post.id, post.link);

        if let Some(image) = &submission.featured_image {
            if let Err(err) = self.attach_featured_image(site, post.id, image).await {
                warn!("post {} published without featured image: {err}", post.id);
            }
        }
        Ok(post.into_created())
    }

    /// Download, upload to the media library, set alt text, then link the
    /// media to the post. The post already exists, so failures only warn.
    async fn attach_featured_image(
        &self,
        site: &Site,
        post_id: u64,
        image: &ImageReference,
    ) -> Result<u64, AdapterError> {
        let download = site.client.get(&image.url).send().await?;
        if !download.status().is_success() {
            return Err(AdapterError::from_response(download).await);
        }
        let content_type = download
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        let bytes = download.bytes().await?;
        debug!("downloaded {} bytes for featured image", bytes.len());

        let filename = format!("featured-{post_id}.{}", extension_for(&content_type));
        let media: WpMedia = site
            .send(
                site.client
                    .post(site.endpoint("media"))
                    .header(CONTENT_TYPE, content_type)
                    .header(CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\""))
                    .body(bytes),
            )
            .await?;

        let _: WpMedia = site
            .send(
                site.client
                    .post(site.endpoint(&format!("media/{}", media.id)))
                    .json(&json!({ "alt_text": image.alt_text })),
            )
            .await?;

        let _: WpPost = site
            .send(
                site.client
                    .post(site.endpoint(&format!("posts/{post_id}")))
                    .json(&json!({ "featured_media": media.id })),
            )
            .await?;
        Ok(media.id)
    }
}

#[async_trait]
impl ContentManagement for WordPressClient {
    fn has_site(&self, site: &SiteId) -> bool {
        self.sites.contains_key(site)
    }

    async fn find_by_token(
        &self,
        site: &SiteId,
        token: &IdempotencyToken,
    ) -> Result<Option<CreatedPost>, ContentError> {
        Ok(self.lookup(site, token).await?)
    }

    async fn create_post(
        &self,
        site: &SiteId,
        submission: &PostSubmission,
    ) -> Result<CreatedPost, ContentError> {
        Ok(self.create(site, submission).await?)
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "jpg",
    }
}

#[derive(Serialize)]
struct NewPost<'a> {
    title: &'a str,
    content: &'a str,
    status: &'static str,
    slug: String,
}

#[derive(Debug, Deserialize)]
struct WpPost {
    id: u64,
    #[serde(default)]
    link: String,
    #[serde(default)]
    date_gmt: Option<String>,
}

impl WpPost {
    fn into_created(self) -> CreatedPost {
        CreatedPost {
            post_id: self.id.to_string(),
            post_url: self.link,
            published_at: self.date_gmt.as_deref().and_then(parse_gmt),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WpMedia {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct WpUser {
    #[serde(default)]
    name: String,
}

/// WordPress reports `date_gmt` without an offset.
fn parse_gmt(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use wiremock::matchers::{body_partial_json, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> WordPressClient {
        let mut sites = BTreeMap::new();
        sites.insert(
            "main".to_string(),
            SiteConfig {
                base_url: format!("{}/wp-json/wp/v2/", server.uri()),
                username: "editor".into(),
                app_password: "abcd efgh".into(),
                default_status: PostStatus::Draft,
                timeout: 5,
            },
        );
        WordPressClient::new(&sites).unwrap()
    }

    fn submission(token: &IdempotencyToken, image: Option<ImageReference>) -> PostSubmission {
        PostSubmission {
            title: "Ten Trail Tips".into(),
            content_html: "<p>Walk.</p>".into(),
            status: None,
            featured_image: image,
            token: token.clone(),
        }
    }

    #[test]
    fn parses_gmt_dates() {
        let parsed = parse_gmt("2024-05-01T09:30:00").unwrap();
        assert_eq!((parsed.year(), parsed.month(), parsed.hour()), (2024, 5, 9));
        assert!(parse_gmt("yesterday").is_none());
    }

    #[tokio::test]
    async fn finds_post_by_token_slug() {
        let server = MockServer::start().await;
        let token = IdempotencyToken::from_key("trip-1");
        Mock::given(method("GET"))
            .and(path("/wp-json/wp/v2/posts"))
            .and(query_param("slug", "post-trip-1"))
            .and(query_param("status", ANY_STATUS))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": 123, "link": "https://site/p/123", "date_gmt": "2024-05-01T09:30:00" }
            ])))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let found = client
            .find_by_token(&SiteId::new("main"), &token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.post_id, "123");
        assert_eq!(found.post_url, "https://site/p/123");
        assert!(found.published_at.is_some());
    }

    #[tokio::test]
    async fn no_match_returns_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wp-json/wp/v2/posts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let found = client
            .find_by_token(&SiteId::new("main"), &IdempotencyToken::generate())
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn creates_post_with_slug_and_default_status() {
        let server = MockServer::start().await;
        let token = IdempotencyToken::from_key("trip-2");
        Mock::given(method("POST"))
            .and(path("/wp-json/wp/v2/posts"))
            .and(body_partial_json(json!({
                "title": "Ten Trail Tips",
                "status": "draft",
                "slug": "post-trip-2"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": 123, "link": "https://site/p/123"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let created = client
            .create_post(&SiteId::new("main"), &submission(&token, None))
            .await
            .unwrap();
        assert_eq!(created.post_id, "123");
    }

    #[tokio::test]
    async fn featured_image_is_uploaded_and_linked() {
        let server = MockServer::start().await;
        let token = IdempotencyToken::generate();
        Mock::given(method("POST"))
            .and(path("/wp-json/wp/v2/posts"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": 123, "link": "https://site/p/123"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/photo.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/jpeg")
                    .set_body_bytes(vec![0xFF, 0xD8, 0xFF]),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wp/v2/media"))
            .and(header("content-type", "image/jpeg"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 77 })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wp/v2/media/77"))
            .and(body_partial_json(json!({ "alt_text": "photo by Ana" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 77 })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wp/v2/posts/123"))
            .and(body_partial_json(json!({ "featured_media": 77 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 123, "link": "https://site/p/123"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let image = ImageReference {
            url: format!("{}/photo.jpg", server.uri()),
            alt_text: "photo by Ana".into(),
            photographer_name: "Ana".into(),
            photographer_profile_url: "https://unsplash.com/@ana".into(),
        };
        let client = client_for(&server);
        let created = client
            .create_post(&SiteId::new("main"), &submission(&token, Some(image)))
            .await
            .unwrap();
        assert_eq!(created.post_id, "123");
    }

    #[tokio::test]
    async fn failed_image_download_keeps_the_post() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wp/v2/posts"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": 123, "link": "https://site/p/123"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let image = ImageReference {
            url: format!("{}/missing.jpg", server.uri()),
            alt_text: "alt".into(),
            photographer_name: "Ana".into(),
            photographer_profile_url: "https://unsplash.com/@ana".into(),
        };
        let client = client_for(&server);
        let created = client
            .create_post(
                &SiteId::new("main"),
                &submission(&IdempotencyToken::generate(), Some(image)),
            )
            .await
            .unwrap();
        assert_eq!(created.post_id, "123");
    }

    #[tokio::test]
    async fn rejected_credentials_are_authentication_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wp/v2/posts"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "code": "rest_not_logged_in"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let error = client
            .create_post(
                &SiteId::new("main"),
                &submission(&IdempotencyToken::generate(), None),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, ContentError::Authentication(_)));
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let error = client
            .find_by_token(&SiteId::new("main"), &IdempotencyToken::generate())
            .await
            .unwrap_err();
        assert!(matches!(error, ContentError::Transient(_)));
    }

    #[tokio::test]
    async fn unreadable_create_response_is_unconfirmed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wp/v2/posts"))
            .respond_with(ResponseTemplate::new(201).set_body_string("<html>cached</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let error = client
            .create_post(
                &SiteId::new("main"),
                &submission(&IdempotencyToken::generate(), None),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, ContentError::Unconfirmed(_)));
        assert!(error.is_retriable());
    }

    #[tokio::test]
    async fn verify_returns_account_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wp-json/wp/v2/users/me"))
            .and(query_param("context", "edit"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "id": 1, "name": "Editor" })),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert_eq!(client.verify(&SiteId::new("main")).await.unwrap(), "Editor");
        assert!(client.has_site(&SiteId::new("main")));
        assert!(!client.has_site(&SiteId::new("other")));
    }
}
