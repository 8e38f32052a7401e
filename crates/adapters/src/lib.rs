mod error;
mod llm;
mod unsplash;
mod wordpress;

use std::sync::Arc;

use log::warn;

pub use error::AdapterError;
pub use llm::{check_base_url, create_llm_adapter, create_llm_adapter_from_profile};
pub use unsplash::{referral_link, NoPhotoSearch, UnsplashClient};
pub use wordpress::{slug_for, WordPressClient};

use blog_core::config::Config;
use blog_core::{Capabilities, PhotoSearch};

/// Builds every capability the pipeline needs from one config file.
pub fn create_capabilities(config: &Config) -> Result<Capabilities, AdapterError> {
    let invalid = |err: blog_core::ConfigError| AdapterError::InvalidConfig(err.to_string());
    let writer_name = config.writer_interface().map_err(invalid)?;
    let reviewer_name = config.reviewer_interface().map_err(invalid)?;

    let writer = create_llm_adapter(config, writer_name)?;
    let reviewer = if reviewer_name == writer_name {
        writer.clone()
    } else {
        create_llm_adapter(config, reviewer_name)?
    };

    let photos: Arc<dyn PhotoSearch> = if config.unsplash.access_key.trim().is_empty() {
        warn!("unsplash.access_key is empty; posts will be published without images");
        Arc::new(NoPhotoSearch)
    } else {
        Arc::new(UnsplashClient::new(&config.unsplash)?)
    };

    Ok(Capabilities {
        writer,
        reviewer,
        photos,
        cms: Arc::new(WordPressClient::new(&config.sites)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use blog_core::config::{LlmConfig, SiteConfig};
    use blog_core::{PostStatus, SiteId};

    fn config() -> Config {
        let mut config = Config::default();
        config.upsert_llm_profile(
            "writer",
            LlmConfig {
                api_key: "sk".into(),
                interface_format: "openai".into(),
                model_name: "gpt-4o-mini".into(),
                ..LlmConfig::default()
            },
        );
        config.unsplash.access_key = "key".into();
        config.upsert_site(
            "main",
            SiteConfig {
                base_url: "https://blog.example.com/wp-json/wp/v2".into(),
                username: "editor".into(),
                app_password: "secret".into(),
                default_status: PostStatus::Publish,
                timeout: 30,
            },
        );
        config
    }

    #[test]
    fn builds_capabilities_and_shares_a_single_model() {
        let capabilities = create_capabilities(&config()).unwrap();
        assert!(Arc::ptr_eq(&capabilities.writer, &capabilities.reviewer));
        assert!(capabilities.cms.has_site(&SiteId::new("main")));
    }

    #[tokio::test]
    async fn empty_unsplash_key_builds_without_images() {
        let mut config = config();
        config.unsplash.access_key = "  ".into();
        let capabilities = create_capabilities(&config).unwrap();
        assert!(capabilities.photos.search("hiking").await.unwrap().is_empty());
    }

    #[test]
    fn missing_review_profile_is_reported() {
        let mut config = config();
        config.pipeline.review_interface = Some("editor".into());
        assert!(matches!(
            create_capabilities(&config),
            Err(AdapterError::InvalidConfig(_))
        ));
    }
}
