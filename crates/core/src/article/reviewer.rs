use thiserror::Error;

use super::{
    clean_model_output, split_title, synthesize_title, Draft, FinalArticle, LanguageModel,
    LanguageModelError, ModelRequest,
};
use crate::length::LengthPolicy;
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::prompts::{PromptError, PromptRegistry, REVIEW_ARTICLE};
use crate::request::DEFAULT_WRITING_STYLE;

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("failed to render review prompt: {0}")]
    Prompt(#[from] PromptError),
    #[error("language model failed while reviewing: {0}")]
    Model(#[source] LanguageModelError),
    #[error("review returned an empty body")]
    EmptyBody,
    #[error("revised article has {word_count} words, outside {min_words}..={max_words}")]
    OutOfBounds {
        word_count: u32,
        min_words: u32,
        max_words: u32,
    },
}

impl ReviewError {
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Prompt(_) => false,
            Self::Model(source) => source.is_retriable(),
            Self::EmptyBody | Self::OutOfBounds { .. } => true,
        }
    }
}

/// Second model pass that edits a draft and settles on its title. The revised
/// body must stay inside the length band.
pub struct ArticleReviewer<'a> {
    model: &'a dyn LanguageModel,
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
}

impl<'a> ArticleReviewer<'a> {
    pub fn new(
        model: &'a dyn LanguageModel,
        prompts: &'a PromptRegistry,
        sink: &'a dyn LogSink,
    ) -> Self {
        Self {
            model,
            prompts,
            sink,
        }
    }

    pub async fn review(
        &self,
        draft: &Draft,
        policy: &LengthPolicy,
    ) -> Result<FinalArticle, ReviewError> {
        self.review_with_style(draft, "", DEFAULT_WRITING_STYLE, policy).await
    }

    pub async fn review_with_style(
        &self,
        draft: &Draft,
        genre: &str,
        writing_style: &str,
        policy: &LengthPolicy,
    ) -> Result<FinalArticle, ReviewError> {
        let prompt = self.prompts.format_with(
            REVIEW_ARTICLE,
            [
                ("genre", genre.to_string()),
                ("writing_style", writing_style.to_string()),
                ("min_words", policy.min_words.to_string()),
                ("max_words", policy.max_words.to_string()),
                ("draft", draft.text.clone()),
            ],
        )?;
        let request = ModelRequest::new(prompt).with_max_tokens(policy.max_tokens());

        let response = self
            .model
            .invoke(&request)
            .await
            .map_err(ReviewError::Model)?;
        let cleaned = clean_model_output(&response);

        let (title, body) = split_title(&cleaned);
        if body.trim().is_empty() {
            return Err(ReviewError::EmptyBody);
        }

        let title = match title {
            Some(title) => title,
            None => {
                // Reviewer dropped the title; fall back to the draft's own.
                let (draft_title, _) = split_title(&draft.text);
                let fallback = if genre.trim().is_empty() { "Untitled" } else { genre };
                draft_title.unwrap_or_else(|| synthesize_title(&body, fallback))
            }
        };

        let article = FinalArticle::new(title, body);
        if !policy.contains(article.word_count()) {
            return Err(ReviewError::OutOfBounds {
                word_count: article.word_count(),
                min_words: policy.min_words,
                max_words: policy.max_words,
            });
        }

        self.sink.log(LogRecord::new(
            LogLevel::Info,
            format!(
                "review done: \"{}\" ({} -> {} words)",
                article.title(),
                draft.word_count,
                article.word_count()
            ),
        ));
        Ok(article)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::length::LengthCategory;
    use crate::logging::NullLogSink;
    use async_trait::async_trait;

    struct FixedModel(String);

    #[async_trait]
    impl LanguageModel for FixedModel {
        async fn invoke(&self, _request: &ModelRequest) -> Result<String, LanguageModelError> {
            Ok(self.0.clone())
        }
    }

    fn body(n: usize) -> String {
        vec!["trail"; n].join(" ")
    }

    fn short() -> LengthPolicy {
        LengthPolicy::resolve(LengthCategory::Short)
    }

    #[tokio::test]
    async fn extracts_title_and_keeps_it_out_of_body() {
        let model = FixedModel(format!("Title: Better Trails\n\n{}", body(460)));
        let prompts = PromptRegistry::new().unwrap();
        let reviewer = ArticleReviewer::new(&model, &prompts, &NullLogSink);

        let article = reviewer
            .review(&Draft::new(body(450)), &short())
            .await
            .unwrap();
        assert_eq!(article.title(), "Better Trails");
        assert_eq!(article.word_count(), 460);
        assert!(!article.body().contains("Better Trails"));
    }

    #[tokio::test]
    async fn falls_back_to_draft_title() {
        let model = FixedModel(body(400));
        let prompts = PromptRegistry::new().unwrap();
        let reviewer = ArticleReviewer::new(&model, &prompts, &NullLogSink);

        let draft = Draft::new(format!("Title: Original\n\n{}", body(450)));
        let article = reviewer.review(&draft, &short()).await.unwrap();
        assert_eq!(article.title(), "Original");
    }

    #[tokio::test]
    async fn synthesizes_title_when_none_exists() {
        let model = FixedModel(format!("Hiking keeps you fit and happy. {}", body(400)));
        let prompts = PromptRegistry::new().unwrap();
        let reviewer = ArticleReviewer::new(&model, &prompts, &NullLogSink);

        let article = reviewer
            .review(&Draft::new(body(450)), &short())
            .await
            .unwrap();
        assert_eq!(article.title(), "Hiking keeps you fit and happy");
    }

    #[tokio::test]
    async fn out_of_band_revision_is_retriable() {
        let model = FixedModel(format!("Title: Too Long\n\n{}", body(900)));
        let prompts = PromptRegistry::new().unwrap();
        let reviewer = ArticleReviewer::new(&model, &prompts, &NullLogSink);

        let error = reviewer
            .review(&Draft::new(body(450)), &short())
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            ReviewError::OutOfBounds { word_count: 900, .. }
        ));
        assert!(error.is_retriable());
    }

    #[tokio::test]
    async fn title_only_reply_is_empty_body() {
        let model = FixedModel("Title: Nothing Else".into());
        let prompts = PromptRegistry::new().unwrap();
        let reviewer = ArticleReviewer::new(&model, &prompts, &NullLogSink);

        let error = reviewer
            .review(&Draft::new(body(450)), &short())
            .await
            .unwrap_err();
        assert!(matches!(error, ReviewError::EmptyBody));
    }
}
