pub mod article;
pub mod config;
pub mod image;
pub mod length;
pub mod logging;
pub mod pipeline;
pub mod prompts;
pub mod publish;
pub mod request;

pub use article::{
    clean_model_output, ArticleGenerator, ArticlePlan, ArticleReviewer, Draft, FinalArticle,
    GenerationError, LanguageModel, LanguageModelError, ModelRequest, ReviewError,
};
pub use config::{
    Config, ConfigError, ConfigStore, LlmConfig, PipelineConfig, PromptConfig, RecentUsage,
    ServerConfig, SiteConfig, UnsplashConfig,
};
pub use image::{
    ImageAsset, ImageSourcer, ImageSourcingError, PhotoCandidate, PhotoSearch, PhotoSearchError,
};
pub use length::{count_words, LengthCategory, LengthPolicy};
pub use logging::{
    LogFacadeSink, LogLevel, LogRecord, LogSink, NullLogSink, SharedLogSink, StdoutLogSink,
    VecLogSink,
};
pub use pipeline::{
    AmbiguityReason, BlogPost, Capabilities, ErrorInfo, PipelineError, PipelineOrchestrator,
    PipelineRun, PipelineSettings, RetryPolicy, RunReport, Stage, StageError,
};
pub use prompts::{PromptArguments, PromptError, PromptRegistry, PromptSource, PromptTemplate};
pub use publish::{
    render_content, BoxError, ContentError, ContentManagement, CreatedPost, IdempotencyToken,
    ImageReference, PostSubmission, PublishError, PublishResult, Publisher,
};
pub use request::{BlogRequest, PostStatus, SiteId, DEFAULT_WRITING_STYLE};
