mod error;
mod retry;
mod run;

pub use error::{AmbiguityReason, PipelineError, StageError};
pub use retry::RetryPolicy;
pub use run::{ErrorInfo, PipelineRun, Stage};

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::article::{ArticleGenerator, ArticleReviewer, LanguageModel};
use crate::config::ConfigError;
use crate::image::{ImageAsset, ImageSourcer, ImageSourcingError, PhotoSearch};
use crate::length::LengthPolicy;
use crate::logging::{LogLevel, LogRecord, LogSink, SharedLogSink};
use crate::prompts::PromptRegistry;
use crate::publish::{ContentManagement, IdempotencyToken, PublishResult, Publisher};
use crate::request::{BlogRequest, SiteId};

/// Retry and timeout constants handed to the orchestrator at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineSettings {
    pub retry: RetryPolicy,
    pub call_timeout: Duration,
    pub image_timeout: Duration,
    pub publish_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(180),
            image_timeout: Duration::from_secs(20),
            publish_timeout: Duration::from_secs(60),
        }
    }
}

/// The external services one pipeline needs.
#[derive(Clone)]
pub struct Capabilities {
    pub writer: Arc<dyn LanguageModel>,
    pub reviewer: Arc<dyn LanguageModel>,
    pub photos: Arc<dyn PhotoSearch>,
    pub cms: Arc<dyn ContentManagement>,
}

/// A published post, as returned to callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlogPost {
    pub run_id: String,
    pub title: String,
    pub word_count: u32,
    pub image: Option<ImageAsset>,
    pub publish: PublishResult,
}

/// Final run state together with its outcome.
#[derive(Debug)]
pub struct RunReport {
    pub run: PipelineRun,
    pub outcome: Result<BlogPost, PipelineError>,
}

/// Runs generate, review, image sourcing and publishing in order for each
/// request. Holds no per-run state, so one instance serves concurrent runs.
pub struct PipelineOrchestrator {
    capabilities: Capabilities,
    prompts: Arc<PromptRegistry>,
    settings: PipelineSettings,
    sink: SharedLogSink,
}

impl PipelineOrchestrator {
    pub fn from_capabilities(
        capabilities: Capabilities,
        prompts: Arc<PromptRegistry>,
        settings: PipelineSettings,
        sink: SharedLogSink,
    ) -> Self {
        Self {
            capabilities,
            prompts,
            settings,
            sink,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn has_site(&self, site: &SiteId) -> bool {
        self.capabilities.cms.has_site(site)
    }

    pub async fn run(
        &self,
        request: BlogRequest,
        cancel: &CancellationToken,
    ) -> Result<BlogPost, PipelineError> {
        self.execute(request, cancel).await.outcome
    }

    pub async fn execute(&self, request: BlogRequest, cancel: &CancellationToken) -> RunReport {
        let mut run = PipelineRun::new(request);
        self.log(
            &run,
            LogLevel::Info,
            format!(
                "run started: genre=\"{}\" length={} site={}",
                run.request.genre(),
                run.request.length,
                run.request.target_site
            ),
        );

        let outcome = self.drive(&mut run, cancel).await;
        match &outcome {
            Ok(post) => self.log(
                &run,
                LogLevel::Info,
                format!("run done: post {} at {}", post.publish.post_id, post.publish.post_url),
            ),
            Err(err) => {
                run.fail(err.kind(), err.to_string());
                let failed = run.failed_stage().unwrap_or(Stage::Pending);
                self.sink.log(
                    LogRecord::new(LogLevel::Error, format!("run failed: {err}"))
                        .with_run(&run.run_id)
                        .with_stage(failed),
                );
            }
        }

        RunReport { run, outcome }
    }

    /// Looks up a photo for `genre` without running the pipeline.
    pub async fn preview_image(&self, genre: &str) -> Result<ImageAsset, ImageSourcingError> {
        let sourcer = ImageSourcer::new(self.capabilities.photos.as_ref(), self.sink.as_ref());
        tokio::time::timeout(self.settings.image_timeout, sourcer.source(genre))
            .await
            .unwrap_or(Err(ImageSourcingError::Timeout(self.settings.image_timeout)))
    }

    async fn drive(
        &self,
        run: &mut PipelineRun,
        cancel: &CancellationToken,
    ) -> Result<BlogPost, PipelineError> {
        run.request.validate()?;
        if !self.has_site(&run.request.target_site) {
            return Err(ConfigError::UnknownSite(run.request.target_site.to_string()).into());
        }

        let request = run.request.clone();
        let policy = LengthPolicy::resolve(request.length);
        let genre = request.genre();
        let style = request.writing_style();

        run.start();
        let draft = {
            let log = self.stage_log(run);
            let generator =
                ArticleGenerator::new(self.capabilities.writer.as_ref(), &self.prompts, &log)
                    .with_selector(self.capabilities.reviewer.as_ref());
            let (generator, policy) = (&generator, &policy);
            self.attempt_stage(run, cancel, self.settings.call_timeout, move || async move {
                generator
                    .generate_with_style(genre, style, policy)
                    .await
                    .map_err(StageError::from)
            })
            .await?
        };
        run.complete_generation(draft.clone());

        let article = {
            let log = self.stage_log(run);
            let reviewer =
                ArticleReviewer::new(self.capabilities.reviewer.as_ref(), &self.prompts, &log);
            let (reviewer, draft, policy) = (&reviewer, &draft, &policy);
            self.attempt_stage(run, cancel, self.settings.call_timeout, move || async move {
                reviewer
                    .review_with_style(draft, genre, style, policy)
                    .await
                    .map_err(StageError::from)
            })
            .await?
        };
        run.complete_review(article.clone());

        let image = self.source_image(run, cancel, genre).await?;
        run.complete_image(image.clone());

        let result = {
            let log = self.stage_log(run);
            let publisher = Publisher::new(self.capabilities.cms.as_ref(), &log);
            let status = request.post_status;
            let token = run.token.clone();
            let (publisher, article, image, site, token) = (
                &publisher,
                &article,
                image.as_ref(),
                &request.target_site,
                &token,
            );
            let watch = PublishWatch::arm(self.sink.as_ref(), run);
            let outcome = self
                .attempt_stage(run, cancel, self.settings.publish_timeout, move || async move {
                    publisher
                        .publish(article, image, site, token, status)
                        .await
                        .map_err(StageError::from)
                })
                .await;
            watch.settle();
            outcome?
        };
        run.complete(result.clone());

        Ok(BlogPost {
            run_id: run.run_id.clone(),
            title: article.title().to_string(),
            word_count: article.word_count(),
            image,
            publish: result,
        })
    }

    /// One attempt only; any failure means the post goes out without an image.
    async fn source_image(
        &self,
        run: &mut PipelineRun,
        cancel: &CancellationToken,
        genre: &str,
    ) -> Result<Option<ImageAsset>, PipelineError> {
        run.record_attempt();
        let log = self.stage_log(run);
        let sourcer = ImageSourcer::new(self.capabilities.photos.as_ref(), &log);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(self.interrupted(run)),
            outcome = tokio::time::timeout(self.settings.image_timeout, sourcer.source(genre)) => {
                outcome.unwrap_or(Err(ImageSourcingError::Timeout(self.settings.image_timeout)))
            }
        };

        match outcome {
            Ok(asset) => Ok(Some(asset)),
            Err(err) => {
                log.log(LogRecord::new(
                    LogLevel::Warn,
                    format!("continuing without an image: {err}"),
                ));
                Ok(None)
            }
        }
    }

    /// Runs `call` until it succeeds, fails with a non-retriable error or the
    /// retry policy is exhausted. Every call and every backoff sleep races
    /// against `cancel`.
    async fn attempt_stage<T, F, Fut>(
        &self,
        run: &mut PipelineRun,
        cancel: &CancellationToken,
        timeout: Duration,
        mut call: F,
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        let retry = &self.settings.retry;
        loop {
            let attempt = run.record_attempt();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.interrupted(run)),
                result = tokio::time::timeout(timeout, call()) => {
                    result.unwrap_or(Err(StageError::Timeout(timeout)))
                }
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let unconfirmed = run.stage == Stage::Publishing && err.may_have_created();
            if unconfirmed && !run.publish_unconfirmed {
                run.mark_publish_unconfirmed();
                self.log(
                    run,
                    LogLevel::Warn,
                    format!("post may exist unconfirmed; lookups use token {}", run.token),
                );
            }

            if !err.is_retriable() || !retry.has_attempts_left(attempt) {
                return Err(self.stage_failure(run, attempt, err));
            }

            let delay = retry.delay_for(attempt);
            self.log(
                run,
                LogLevel::Warn,
                format!(
                    "attempt {attempt}/{} failed: {err}; retrying in {delay:?}",
                    retry.max_attempts
                ),
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.interrupted(run)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn stage_failure(&self, run: &PipelineRun, attempts: u32, err: StageError) -> PipelineError {
        if run.stage == Stage::Publishing {
            let reason = match &err {
                StageError::Timeout(after) => Some(AmbiguityReason::TimedOut(*after)),
                _ if run.publish_unconfirmed => Some(AmbiguityReason::Unconfirmed),
                _ => None,
            };
            if let Some(reason) = reason {
                return PipelineError::AmbiguousOutcome {
                    token: run.token.clone(),
                    reason,
                };
            }
        }
        PipelineError::StageFailed {
            stage: run.stage,
            attempts,
            source: err,
        }
    }

    /// Once publishing has begun a post may already exist, so cancellation
    /// is reported as ambiguous rather than as a clean stop.
    fn interrupted(&self, run: &PipelineRun) -> PipelineError {
        if run.stage == Stage::Publishing {
            PipelineError::AmbiguousOutcome {
                token: run.token.clone(),
                reason: AmbiguityReason::Cancelled,
            }
        } else {
            PipelineError::Cancelled { stage: run.stage }
        }
    }

    fn stage_log(&self, run: &PipelineRun) -> StageLog<'_> {
        StageLog {
            sink: self.sink.as_ref(),
            run_id: run.run_id.clone(),
            stage: run.stage,
        }
    }

    fn log(&self, run: &PipelineRun, level: LogLevel, message: impl Into<String>) {
        self.sink.log(
            LogRecord::new(level, message)
                .with_run(&run.run_id)
                .with_stage(run.stage),
        );
    }
}

/// Logs the idempotency token if the publish stage is abandoned without an
/// outcome, which happens when the future driving the run is dropped.
struct PublishWatch<'a> {
    sink: &'a dyn LogSink,
    run_id: String,
    token: IdempotencyToken,
    armed: bool,
}

impl<'a> PublishWatch<'a> {
    fn arm(sink: &'a dyn LogSink, run: &PipelineRun) -> Self {
        Self {
            sink,
            run_id: run.run_id.clone(),
            token: run.token.clone(),
            armed: true,
        }
    }

    fn settle(mut self) {
        self.armed = false;
    }
}

impl Drop for PublishWatch<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.sink.log(
                LogRecord::new(
                    LogLevel::Error,
                    format!(
                        "run abandoned while publishing; the post may exist, \
                         retry with idempotency token {}",
                        self.token
                    ),
                )
                .with_run(&self.run_id)
                .with_stage(Stage::Publishing),
            );
        }
    }
}

/// Stamps records from stage components with the run id and stage.
struct StageLog<'a> {
    sink: &'a dyn LogSink,
    run_id: String,
    stage: Stage,
}

impl LogSink for StageLog<'_> {
    fn log(&self, mut record: LogRecord) {
        if record.run_id.is_none() {
            record.run_id = Some(self.run_id.clone());
        }
        if record.stage.is_none() {
            record.stage = Some(self.stage.to_string());
        }
        self.sink.log(record);
    }
}
