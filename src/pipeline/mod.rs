use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ai::Summarizer;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{LinkStatus, NewLink, TokenUsage};
use crate::services::{Extractor, Fetcher};

/// Stored content is truncated to this many characters.
pub const MAX_CONTENT_LENGTH: usize = 10_000;

/// Pipeline stages, in order. Failure is reachable from any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DuplicateCheck,
    Fetching,
    Extracting,
    Summarizing,
    Persisting,
    AssociatingMetadata,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::DuplicateCheck => "duplicate_check",
            Stage::Fetching => "fetching",
            Stage::Extracting => "extracting",
            Stage::Summarizing => "summarizing",
            Stage::Persisting => "persisting",
            Stage::AssociatingMetadata => "associating_metadata",
        }
    }
}

/// Optional task/activity to associate the ingested link with.
#[derive(Debug, Clone)]
pub enum AssociationTarget {
    Task(Option<String>),
    Activity(Option<String>),
}

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub url: String,
    /// Caller-supplied category; takes priority over the AI suggestion.
    pub category: Option<String>,
    /// Caller-supplied tags; take priority over AI suggestions.
    pub tags: Vec<String>,
    pub target: Option<AssociationTarget>,
}

impl IngestRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            category: None,
            tags: Vec::new(),
            target: None,
        }
    }
}

/// Terminal payload of a successful pipeline run.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub link_id: i64,
    /// The stored (truncated) content; identical whether the run fetched the
    /// page or short-circuited on an existing record.
    pub preview: String,
    pub summary: String,
    pub suggested_category: String,
    pub suggested_tags: Vec<String>,
    pub usage: TokenUsage,
}

/// Stage-completion events delivered to the caller over an mpsc channel.
#[derive(Debug)]
pub enum IngestEvent {
    Fetched,
    Extracted,
    Summarized,
    Complete(IngestOutcome),
    Failed { reason: String },
}

pub struct Pipeline {
    repository: Arc<Repository>,
    fetcher: Arc<Fetcher>,
    extractor: Extractor,
    summarizer: Option<Arc<Summarizer>>,
}

impl Pipeline {
    pub fn new(repository: Arc<Repository>, summarizer: Option<Summarizer>) -> Self {
        Self {
            repository,
            fetcher: Arc::new(Fetcher::new()),
            extractor: Extractor::new(),
            summarizer: summarizer.map(Arc::new),
        }
    }

    /// True when an AI summarizer is configured. Its absence is a valid
    /// mode: the summarizing stage is skipped, never failed.
    pub fn summarization_available(&self) -> bool {
        self.summarizer.is_some()
    }

    /// Runs the full ingest pipeline as a background task. Stage events and
    /// the terminal Complete/Failed event arrive on `events`.
    pub fn ingest(
        &self,
        request: IngestRequest,
        events: mpsc::Sender<IngestEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let repository = Arc::clone(&self.repository);
        let fetcher = Arc::clone(&self.fetcher);
        let extractor = self.extractor;
        let summarizer = self.summarizer.clone();

        tokio::spawn(async move {
            let result =
                run_ingest(&repository, &fetcher, &extractor, summarizer.as_deref(), request, &events, &cancel)
                    .await;
            let event = match result {
                Ok(outcome) => IngestEvent::Complete(outcome),
                Err(e) => IngestEvent::Failed {
                    reason: e.to_string(),
                },
            };
            let _ = events.send(event).await;
        })
    }

    /// Re-runs fetch/extract/summarize for an existing link and updates it
    /// in place. Associations and status are preserved.
    pub fn refresh(
        &self,
        url: String,
        events: mpsc::Sender<IngestEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let repository = Arc::clone(&self.repository);
        let fetcher = Arc::clone(&self.fetcher);
        let extractor = self.extractor;
        let summarizer = self.summarizer.clone();

        tokio::spawn(async move {
            let result = run_refresh(
                &repository,
                &fetcher,
                &extractor,
                summarizer.as_deref(),
                url,
                &events,
                &cancel,
            )
            .await;
            let event = match result {
                Ok(outcome) => IngestEvent::Complete(outcome),
                Err(e) => IngestEvent::Failed {
                    reason: e.to_string(),
                },
            };
            let _ = events.send(event).await;
        })
    }

    /// Resolves category/tag names (creating missing rows) and links them to
    /// the record. Safe to call repeatedly.
    pub async fn save_metadata(
        &self,
        link_id: i64,
        category: Option<&str>,
        tags: &[String],
    ) -> Result<()> {
        associate_metadata(&self.repository, link_id, category, tags).await
    }
}

async fn run_ingest(
    repository: &Repository,
    fetcher: &Fetcher,
    extractor: &Extractor,
    summarizer: Option<&Summarizer>,
    request: IngestRequest,
    events: &mpsc::Sender<IngestEvent>,
    cancel: &CancellationToken,
) -> Result<IngestOutcome> {
    let url = request.url.clone();

    tracing::debug!(stage = Stage::DuplicateCheck.as_str(), url = %url);
    if let Some(existing) = repository.get_link_by_url(&url).await? {
        // Short-circuit: the record already exists, no network call is made.
        return Ok(IngestOutcome {
            link_id: existing.id,
            preview: existing.content.unwrap_or_default(),
            summary: existing.summary.unwrap_or_default(),
            suggested_category: String::new(),
            suggested_tags: Vec::new(),
            usage: TokenUsage::default(),
        });
    }

    tracing::debug!(stage = Stage::Fetching.as_str(), url = %url);
    let html = fetcher.fetch_url(&url, cancel).await?;
    let _ = events.send(IngestEvent::Fetched).await;

    tracing::debug!(stage = Stage::Extracting.as_str(), url = %url);
    let (title, text) = extractor.extract_text(&html, &url)?;
    let _ = events.send(IngestEvent::Extracted).await;

    let content = extractor.truncate_text(&text, MAX_CONTENT_LENGTH);

    let mut summary = String::new();
    let mut suggested_category = String::new();
    let mut suggested_tags: Vec<String> = Vec::new();
    let mut usage = TokenUsage::default();

    if let Some(summarizer) = summarizer {
        tracing::debug!(stage = Stage::Summarizing.as_str(), url = %url);
        match with_cancel(cancel, summarizer.summarize(&title, &text)).await {
            Ok((s, u)) => {
                summary = s;
                usage.add(u);
            }
            Err(AppError::Cancelled) => return Err(AppError::Cancelled),
            Err(e) => tracing::warn!(url = %url, "summarization failed: {}", e),
        }
        match with_cancel(cancel, summarizer.suggest_metadata(&title, &text)).await {
            Ok((category, tags, u)) => {
                suggested_category = category;
                suggested_tags = tags;
                usage.add(u);
            }
            Err(AppError::Cancelled) => return Err(AppError::Cancelled),
            Err(e) => tracing::warn!(url = %url, "metadata suggestion failed: {}", e),
        }
        log_usage(&url, usage);
        let _ = events.send(IngestEvent::Summarized).await;
    }

    tracing::debug!(stage = Stage::Persisting.as_str(), url = %url);
    let link = repository
        .create_link(NewLink {
            url: url.clone(),
            title: non_empty(&title),
            content: non_empty(&content),
            summary: non_empty(&summary),
            status: LinkStatus::ReadLater,
        })
        .await?;
    repository.touch_fetched_at(link.id).await?;
    if !summary.is_empty() {
        repository.touch_summarized_at(link.id).await?;
    }

    tracing::debug!(stage = Stage::AssociatingMetadata.as_str(), url = %url);

    // Flag-supplied values take priority over AI suggestions.
    let category = request
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .or_else(|| Some(suggested_category.trim()).filter(|c| !c.is_empty()));
    let tags = if request.tags.is_empty() {
        suggested_tags.clone()
    } else {
        request.tags.clone()
    };
    associate_metadata(repository, link.id, category, &tags).await?;

    if let Some(target) = &request.target {
        associate_target(repository, link.id, target, &title, &url).await;
    }

    Ok(IngestOutcome {
        link_id: link.id,
        preview: content,
        summary,
        suggested_category,
        suggested_tags,
        usage,
    })
}

async fn run_refresh(
    repository: &Repository,
    fetcher: &Fetcher,
    extractor: &Extractor,
    summarizer: Option<&Summarizer>,
    url: String,
    events: &mpsc::Sender<IngestEvent>,
    cancel: &CancellationToken,
) -> Result<IngestOutcome> {
    let existing = repository
        .get_link_by_url(&url)
        .await?
        .ok_or_else(|| AppError::LinkNotFound(url.clone()))?;

    tracing::debug!(stage = Stage::Fetching.as_str(), url = %url);
    let html = fetcher.fetch_url(&url, cancel).await?;
    repository.touch_fetched_at(existing.id).await?;
    let _ = events.send(IngestEvent::Fetched).await;

    tracing::debug!(stage = Stage::Extracting.as_str(), url = %url);
    let (title, text) = extractor.extract_text(&html, &url)?;
    let _ = events.send(IngestEvent::Extracted).await;

    let content = extractor.truncate_text(&text, MAX_CONTENT_LENGTH);

    let mut summary = String::new();
    let mut usage = TokenUsage::default();

    if let Some(summarizer) = summarizer {
        tracing::debug!(stage = Stage::Summarizing.as_str(), url = %url);
        match with_cancel(cancel, summarizer.summarize(&title, &text)).await {
            Ok((s, u)) => {
                summary = s;
                usage.add(u);
                repository.touch_summarized_at(existing.id).await?;
            }
            Err(AppError::Cancelled) => return Err(AppError::Cancelled),
            Err(e) => tracing::warn!(url = %url, "summarization failed: {}", e),
        }
        log_usage(&url, usage);
        let _ = events.send(IngestEvent::Summarized).await;
    }

    tracing::debug!(stage = Stage::Persisting.as_str(), url = %url);
    repository
        .update_link(
            existing.id,
            non_empty(&title),
            non_empty(&content),
            non_empty(&summary),
        )
        .await?;

    Ok(IngestOutcome {
        link_id: existing.id,
        preview: content,
        summary,
        suggested_category: String::new(),
        suggested_tags: Vec::new(),
        usage,
    })
}

/// Association conflicts are tolerated and association failures never fail
/// the pipeline; they are logged and skipped.
async fn associate_metadata(
    repository: &Repository,
    link_id: i64,
    category: Option<&str>,
    tags: &[String],
) -> Result<()> {
    if let Some(name) = category.map(str::trim).filter(|c| !c.is_empty()) {
        match repository.get_or_create_category(name).await {
            Ok(category) => {
                if let Err(e) = repository.link_category(link_id, category.id).await {
                    tracing::warn!("could not link category {:?}: {}", name, e);
                }
            }
            Err(e) => tracing::warn!("could not create category {:?}: {}", name, e),
        }
    }

    for tag_name in tags {
        // Tags are normalized to lower-case; category names are not.
        let tag_name = tag_name.trim().to_lowercase();
        if tag_name.is_empty() {
            continue;
        }
        match repository.get_or_create_tag(&tag_name).await {
            Ok(tag) => {
                if let Err(e) = repository.link_tag(link_id, tag.id).await {
                    tracing::warn!("could not link tag {:?}: {}", tag_name, e);
                }
            }
            Err(e) => tracing::warn!("could not create tag {:?}: {}", tag_name, e),
        }
    }

    Ok(())
}

async fn associate_target(
    repository: &Repository,
    link_id: i64,
    target: &AssociationTarget,
    title: &str,
    url: &str,
) {
    let fallback = |name: &Option<String>| {
        name.as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                if title.is_empty() {
                    url.to_string()
                } else {
                    title.to_string()
                }
            })
    };

    match target {
        AssociationTarget::Task(name) => {
            let name = fallback(name);
            match repository.get_or_create_task(&name).await {
                Ok(task) => {
                    if let Err(e) = repository.link_task(link_id, task.id).await {
                        tracing::warn!("could not link task {:?}: {}", name, e);
                    }
                }
                Err(e) => tracing::warn!("could not create task {:?}: {}", name, e),
            }
        }
        AssociationTarget::Activity(name) => {
            let name = fallback(name);
            match repository.get_or_create_activity(&name).await {
                Ok(activity) => {
                    if let Err(e) = repository.link_activity(link_id, activity.id).await {
                        tracing::warn!("could not link activity {:?}: {}", name, e);
                    }
                }
                Err(e) => tracing::warn!("could not create activity {:?}: {}", name, e),
            }
        }
    }
}

async fn with_cancel<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        res = fut => res,
    }
}

fn log_usage(url: &str, usage: TokenUsage) {
    if usage.is_zero() {
        return;
    }
    tracing::info!(
        url = %url,
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        cost_usd = format!("${:.5}", usage.cost_usd()),
        "LLM usage",
    );
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
