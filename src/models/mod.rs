use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reading status of a stored link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinkStatus {
    #[default]
    ReadLater,
    Remember,
    Archived,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::ReadLater => "read_later",
            LinkStatus::Remember => "remember",
            LinkStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read_later" => Some(LinkStatus::ReadLater),
            "remember" => Some(LinkStatus::Remember),
            "archived" => Some(LinkStatus::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub status: LinkStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub summarized_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewLink {
    pub url: String,
    pub title: Option<String>,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub status: LinkStatus,
}

#[derive(Debug, Clone)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub completed: bool,
}

#[derive(Debug, Clone)]
pub struct Activity {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

// gpt-4o-mini published rates, USD per token.
const INPUT_TOKEN_COST: f64 = 0.15 / 1_000_000.0;
const OUTPUT_TOKEN_COST: f64 = 0.60 / 1_000_000.0;

/// LLM token consumption, accumulated across summarize + suggest calls.
/// The derived cost is informational only and never gates the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    pub fn is_zero(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }

    pub fn cost_usd(&self) -> f64 {
        f64::from(self.input_tokens) * INPUT_TOKEN_COST
            + f64::from(self.output_tokens) * OUTPUT_TOKEN_COST
    }
}
