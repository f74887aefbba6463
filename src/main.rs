use std::io::IsTerminal;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use linkstash::ai::Summarizer;
use linkstash::config::Config;
use linkstash::db::Repository;
use linkstash::models::TokenUsage;
use linkstash::pipeline::{AssociationTarget, IngestEvent, IngestRequest, Pipeline};

const USAGE: &str = "Usage:
  linkstash add <url>... [--category NAME] [--tags a,b] [--task [NAME]] [--activity [NAME]]
  linkstash refetch <url>...
  linkstash search <text>
  linkstash delete <url>

URLs may also be piped via stdin, one per line. --debug enables verbose logging.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    let debug = args.iter().any(|a| a == "--debug");
    args.retain(|a| a != "--debug");

    // Logs go to stderr so they never mix with command output.
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load()?;

    let Some(command) = args.first().cloned() else {
        println!("{}", USAGE);
        return Ok(());
    };
    let rest = args[1..].to_vec();

    match command.as_str() {
        "add" => run_add(&config, rest).await,
        "refetch" => run_refetch(&config, rest).await,
        "search" => run_search(&config, rest).await,
        "delete" => run_delete(&config, rest).await,
        _ => {
            println!("{}", USAGE);
            Ok(())
        }
    }
}

struct AddFlags {
    urls: Vec<String>,
    category: Option<String>,
    tags: Vec<String>,
    target: Option<AssociationTarget>,
}

fn parse_add_flags(args: Vec<String>) -> anyhow::Result<AddFlags> {
    let mut flags = AddFlags {
        urls: Vec::new(),
        category: None,
        tags: Vec::new(),
        target: None,
    };

    let mut iter = args.into_iter().peekable();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--category" | "-c" => {
                flags.category = iter.next();
            }
            "--tags" | "-t" => {
                if let Some(raw) = iter.next() {
                    flags.tags = parse_tags(&raw);
                }
            }
            "--task" => {
                let name = iter.peek().filter(|a| !a.starts_with("--")).cloned();
                if name.is_some() {
                    iter.next();
                }
                flags.target = Some(AssociationTarget::Task(name));
            }
            "--activity" => {
                let name = iter.peek().filter(|a| !a.starts_with("--")).cloned();
                if name.is_some() {
                    iter.next();
                }
                flags.target = Some(AssociationTarget::Activity(name));
            }
            _ => flags.urls.push(arg),
        }
    }

    Ok(flags)
}

/// Tags are normalized to lower-case; category names are left as typed.
fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Append URLs piped via stdin, one per line; `#` lines are comments.
fn collect_stdin_urls(urls: &mut Vec<String>) {
    if std::io::stdin().is_terminal() {
        return;
    }
    for line in std::io::stdin().lines().map_while(|l| l.ok()) {
        let line = line.trim();
        if !line.is_empty() && !line.starts_with('#') {
            urls.push(line.to_string());
        }
    }
}

fn ctrl_c_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
    cancel
}

async fn run_add(config: &Config, args: Vec<String>) -> anyhow::Result<()> {
    let mut flags = parse_add_flags(args)?;
    collect_stdin_urls(&mut flags.urls);

    if flags.urls.is_empty() {
        anyhow::bail!("no URLs provided: pass as arguments or pipe via stdin");
    }

    let repository = Arc::new(Repository::new(&config.db_path).await?);
    let summarizer = config.openai_api_key.clone().map(Summarizer::new);
    let pipeline = Pipeline::new(Arc::clone(&repository), summarizer);
    let cancel = ctrl_c_token();

    let mut grand_total = TokenUsage::default();
    let mut processed = 0usize;
    let mut skipped = 0usize;
    let multi = flags.urls.len() > 1;

    for (i, url) in flags.urls.iter().enumerate() {
        if multi {
            println!("\n[{}/{}] {}", i + 1, flags.urls.len(), url);
        }
        println!("Fetching {} ...", url);

        let request = IngestRequest {
            url: url.clone(),
            category: flags.category.clone(),
            tags: flags.tags.clone(),
            target: flags.target.clone(),
        };

        let (tx, mut rx) = mpsc::channel(8);
        let handle = pipeline.ingest(request, tx, cancel.clone());

        let mut failed = false;
        while let Some(event) = rx.recv().await {
            match event {
                IngestEvent::Fetched => println!("Extracting content ..."),
                IngestEvent::Extracted => {
                    if pipeline.summarization_available() {
                        println!("Summarizing ...");
                    }
                }
                IngestEvent::Summarized => {}
                IngestEvent::Complete(outcome) => {
                    let title = repository
                        .get_link(outcome.link_id)
                        .await?
                        .and_then(|l| l.title)
                        .unwrap_or_else(|| url.clone());
                    println!("Saved: [{}] {}", outcome.link_id, title);
                    if !outcome.summary.is_empty() {
                        println!("\nSummary: {}", outcome.summary);
                    }
                    grand_total.add(outcome.usage);
                }
                IngestEvent::Failed { reason } => {
                    tracing::error!(url = %url, "failed to add URL: {}", reason);
                    eprintln!("Error: {}", reason);
                    failed = true;
                }
            }
        }
        let _ = handle.await;

        if failed {
            skipped += 1;
        } else {
            processed += 1;
        }
    }

    if multi {
        println!("\n--- Summary ---");
        println!("Processed: {}  Skipped: {}", processed, skipped);
    }
    if !grand_total.is_zero() {
        println!(
            "LLM cost:  ${:.5}  ({} in + {} out tokens)",
            grand_total.cost_usd(),
            grand_total.input_tokens,
            grand_total.output_tokens
        );
    }

    Ok(())
}

async fn run_refetch(config: &Config, args: Vec<String>) -> anyhow::Result<()> {
    let mut urls = args;
    collect_stdin_urls(&mut urls);
    if urls.is_empty() {
        anyhow::bail!("no URLs provided: pass as arguments or pipe via stdin");
    }

    let repository = Arc::new(Repository::new(&config.db_path).await?);
    let summarizer = config.openai_api_key.clone().map(Summarizer::new);
    let pipeline = Pipeline::new(Arc::clone(&repository), summarizer);
    let cancel = ctrl_c_token();

    let mut grand_total = TokenUsage::default();

    for url in &urls {
        println!("Fetching {} ...", url);
        let (tx, mut rx) = mpsc::channel(8);
        let handle = pipeline.refresh(url.clone(), tx, cancel.clone());

        while let Some(event) = rx.recv().await {
            match event {
                IngestEvent::Fetched => println!("Extracting content ..."),
                IngestEvent::Extracted => {
                    if pipeline.summarization_available() {
                        println!("Summarizing ...");
                    }
                }
                IngestEvent::Summarized => {}
                IngestEvent::Complete(outcome) => {
                    println!("Updated: [{}] {}", outcome.link_id, url);
                    if !outcome.summary.is_empty() {
                        println!("\nSummary: {}", outcome.summary);
                    }
                    grand_total.add(outcome.usage);
                }
                IngestEvent::Failed { reason } => {
                    tracing::error!(url = %url, "failed to refetch URL: {}", reason);
                    eprintln!("Error: {}", reason);
                }
            }
        }
        let _ = handle.await;
    }

    if !grand_total.is_zero() {
        println!(
            "LLM cost:  ${:.5}  ({} in + {} out tokens)",
            grand_total.cost_usd(),
            grand_total.input_tokens,
            grand_total.output_tokens
        );
    }

    Ok(())
}

async fn run_search(config: &Config, args: Vec<String>) -> anyhow::Result<()> {
    let Some(query) = args.first() else {
        anyhow::bail!("usage: linkstash search <text>");
    };

    let repository = Repository::new(&config.db_path).await?;
    let links = repository.search_links(query, 100).await?;

    if links.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} result(s):\n", links.len());
    for (i, link) in links.iter().enumerate() {
        let title = link.title.clone().unwrap_or_else(|| link.url.clone());
        println!("{}. {}", i + 1, title);
        println!("   {}", link.url);
        if let Some(summary) = link.summary.as_deref().filter(|s| !s.is_empty()) {
            println!("   {}", snippet(summary, 120));
        }
        println!();
    }

    Ok(())
}

async fn run_delete(config: &Config, args: Vec<String>) -> anyhow::Result<()> {
    let Some(url) = args.first() else {
        anyhow::bail!("usage: linkstash delete <url>");
    };

    let repository = Repository::new(&config.db_path).await?;
    let Some(link) = repository.get_link_by_url(url).await? else {
        anyhow::bail!("link not found: {}", url);
    };
    repository.delete_link(link.id).await?;
    println!("Deleted: [{}] {}", link.id, url);

    Ok(())
}

fn snippet(s: &str, n: usize) -> String {
    if s.len() <= n {
        return s.to_string();
    }
    let mut cut = n.saturating_sub(3);
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &s[..cut])
}
