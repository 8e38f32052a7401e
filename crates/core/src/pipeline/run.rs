use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::article::{Draft, FinalArticle};
use crate::image::ImageAsset;
use crate::publish::{IdempotencyToken, PublishResult};
use crate::request::BlogRequest;

/// Pipeline stages in execution order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Pending,
    Generating,
    Reviewing,
    SourcingImage,
    Publishing,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Generating => "GENERATING",
            Self::Reviewing => "REVIEWING",
            Self::SourcingImage => "SOURCING_IMAGE",
            Self::Publishing => "PUBLISHING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub stage: Stage,
    pub kind: String,
    pub message: String,
    pub attempts: u32,
}

/// State of one run. Lives only as long as the orchestrator call that owns it.
#[derive(Clone, Debug, Serialize)]
pub struct PipelineRun {
    pub run_id: String,
    pub request: BlogRequest,
    pub token: IdempotencyToken,
    pub stage: Stage,
    pub draft: Option<Draft>,
    pub final_article: Option<FinalArticle>,
    pub image: Option<ImageAsset>,
    pub result: Option<PublishResult>,
    pub error: Option<ErrorInfo>,
    pub attempts: BTreeMap<Stage, u32>,
    /// Set once a publish attempt may have created the post without
    /// confirming it. Never cleared for the rest of the run.
    pub publish_unconfirmed: bool,
}

impl PipelineRun {
    pub fn new(request: BlogRequest) -> Self {
        let token = request
            .idempotency_key
            .as_deref()
            .map(IdempotencyToken::from_key)
            .unwrap_or_else(IdempotencyToken::generate);
        Self {
            run_id: Uuid::new_v4().simple().to_string(),
            request,
            token,
            stage: Stage::Pending,
            draft: None,
            final_article: None,
            image: None,
            result: None,
            error: None,
            attempts: BTreeMap::new(),
            publish_unconfirmed: false,
        }
    }

    pub fn start(&mut self) {
        self.advance(Stage::Generating);
    }

    pub fn complete_generation(&mut self, draft: Draft) {
        self.draft = Some(draft);
        self.advance(Stage::Reviewing);
    }

    pub fn complete_review(&mut self, article: FinalArticle) {
        self.final_article = Some(article);
        self.advance(Stage::SourcingImage);
    }

    /// Image sourcing is best-effort, so this always moves on to publishing.
    pub fn complete_image(&mut self, image: Option<ImageAsset>) {
        self.image = image;
        self.advance(Stage::Publishing);
    }

    pub fn complete(&mut self, result: PublishResult) {
        self.result = Some(result);
        self.advance(Stage::Done);
    }

    pub fn fail(&mut self, kind: impl Into<String>, message: impl Into<String>) {
        let stage = self.stage;
        self.error = Some(ErrorInfo {
            stage,
            kind: kind.into(),
            message: message.into(),
            attempts: self.attempts_for(stage),
        });
        self.advance(Stage::Failed);
    }

    /// Counts an attempt at the current stage and returns its 1-based number.
    pub fn record_attempt(&mut self) -> u32 {
        let counter = self.attempts.entry(self.stage).or_insert(0);
        *counter += 1;
        *counter
    }

    pub fn attempts_for(&self, stage: Stage) -> u32 {
        self.attempts.get(&stage).copied().unwrap_or(0)
    }

    pub fn mark_publish_unconfirmed(&mut self) {
        self.publish_unconfirmed = true;
    }

    /// Stage that failed, if the run failed.
    pub fn failed_stage(&self) -> Option<Stage> {
        self.error.as_ref().map(|error| error.stage)
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(
            !self.stage.is_terminal() && next > self.stage,
            "stage must move forward: {} -> {}",
            self.stage,
            next
        );
        self.stage = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::length::LengthCategory;

    fn request() -> BlogRequest {
        BlogRequest::new("hiking", LengthCategory::Short, "main")
    }

    #[test]
    fn happy_path_moves_forward() {
        let mut run = PipelineRun::new(request());
        assert_eq!(run.stage, Stage::Pending);
        run.start();
        assert_eq!(run.record_attempt(), 1);
        run.complete_generation(Draft::new("a b c"));
        run.complete_review(FinalArticle::new("T", "a b c"));
        run.complete_image(None);
        assert_eq!(run.stage, Stage::Publishing);
        assert!(run.final_article.is_some());
        assert!(run.result.is_none());
    }

    #[test]
    fn failure_records_stage_and_attempts() {
        let mut run = PipelineRun::new(request());
        run.start();
        run.record_attempt();
        run.record_attempt();
        run.fail("generation", "boom");

        let error = run.error.as_ref().unwrap();
        assert_eq!(error.stage, Stage::Generating);
        assert_eq!(error.attempts, 2);
        assert_eq!(run.stage, Stage::Failed);
        assert_eq!(run.failed_stage(), Some(Stage::Generating));
        assert!(run.final_article.is_none());
    }

    #[test]
    fn caller_key_becomes_token() {
        let run = PipelineRun::new(request().with_idempotency_key("Retry-7"));
        assert_eq!(run.token.as_str(), "retry-7");
        assert_ne!(PipelineRun::new(request()).token, PipelineRun::new(request()).token);
    }

    #[test]
    fn stage_serializes_screaming_case() {
        assert_eq!(
            serde_json::to_string(&Stage::SourcingImage).unwrap(),
            "\"SOURCING_IMAGE\""
        );
    }

    #[test]
    #[should_panic(expected = "stage must move forward")]
    #[cfg(debug_assertions)]
    fn regression_is_caught_in_debug_builds() {
        let mut run = PipelineRun::new(request());
        run.start();
        run.complete_generation(Draft::new("a"));
        run.start();
    }
}
