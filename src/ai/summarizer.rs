use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::TokenUsage;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const OPENAI_MODEL: &str = "gpt-4o-mini";

/// Input longer than this is cut before submission to stay inside the
/// provider's context budget.
const MAX_INPUT_CHARS: usize = 8000;

const DEFAULT_CATEGORY: &str = "General";
const DEFAULT_TAG: &str = "uncategorized";

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

pub struct Summarizer {
    client: Client,
    api_key: String,
}

impl Summarizer {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");
        Self { client, api_key }
    }

    /// Generates a 2-3 sentence summary of the page text.
    pub async fn summarize(&self, title: &str, text: &str) -> Result<(String, TokenUsage)> {
        let prompt = format!(
            "Please provide a concise summary (2-3 sentences) of the following web page:\n\nTitle: {}\n\nContent:\n{}",
            title,
            clip_input(text)
        );

        let (content, usage) = self
            .complete(
                "You are a helpful assistant that summarizes web content concisely.",
                prompt,
                200,
            )
            .await?;

        Ok((content.trim().to_string(), usage))
    }

    /// Asks for one category and 3-5 tags in the fixed
    /// "Category: ...\nTags: ..." template and parses the reply.
    pub async fn suggest_metadata(
        &self,
        title: &str,
        text: &str,
    ) -> Result<(String, Vec<String>, TokenUsage)> {
        let prompt = format!(
            "Based on the following web page, suggest exactly one category and 3-5 tags.\n\
             Respond in exactly this format:\n\
             Category: <category>\n\
             Tags: <tag1>, <tag2>, <tag3>\n\n\
             Title: {}\n\nContent:\n{}",
            title,
            clip_input(text)
        );

        let (content, usage) = self
            .complete(
                "You are a helpful assistant that categorizes web content.",
                prompt,
                100,
            )
            .await?;

        let (category, tags) = parse_metadata_response(&content);
        Ok((category, tags, usage))
    }

    async fn complete(
        &self,
        system: &str,
        prompt: String,
        max_tokens: u32,
    ) -> Result<(String, TokenUsage)> {
        let request = ChatRequest {
            model: OPENAI_MODEL.to_string(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt,
                },
            ],
            max_tokens,
            temperature: 0.7,
        };

        let response = self
            .client
            .post(OPENAI_API_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(AppError::OpenAi(format!("API error: {}", error_text)));
        }

        let chat_response: ChatResponse = response.json().await?;

        let usage = TokenUsage {
            input_tokens: chat_response.usage.prompt_tokens,
            output_tokens: chat_response.usage.completion_tokens,
        };

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AppError::OpenAi("empty completion".to_string()))?;

        Ok((content, usage))
    }
}

fn clip_input(text: &str) -> String {
    if text.len() <= MAX_INPUT_CHARS {
        return text.to_string();
    }
    let mut cut = MAX_INPUT_CHARS;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}

/// Line-oriented parser for the "Category: ...\nTags: a, b, c" template.
/// The grammar is deliberately rigid: anything unparseable falls back to the
/// documented defaults instead of guessing.
pub fn parse_metadata_response(response: &str) -> (String, Vec<String>) {
    let mut category = String::new();
    let mut tags: Vec<String> = Vec::new();

    for line in response.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Category:") {
            category = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("Tags:") {
            tags = rest
                .split(',')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
        }
    }

    if category.is_empty() {
        category = DEFAULT_CATEGORY.to_string();
    }
    if tags.is_empty() {
        tags = vec![DEFAULT_TAG.to_string()];
    }

    (category, tags)
}
