mod ollama;
mod openai;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::time::Duration;

pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Lazily produced fragments of generated text
pub type TextStream = BoxStream<'static, LlmResult<String>>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Response parsing failed: {0}")]
    ParseError(String),
}

/// A single completion request
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Instructions for the model
    pub system: String,
    /// The user-facing prompt text
    pub prompt: String,
    /// Maximum response length in tokens (provider-dependent)
    pub max_tokens: Option<u32>,
    /// Timeout for the request
    pub timeout: Duration,
}

/// Response from an LLM provider
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    /// The generated text
    pub text: String,
    /// Model name used
    pub model: String,
    /// Latency in milliseconds
    pub latency_ms: u64,
}

/// Trait that all LLM providers must implement
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a complete response for the given request
    async fn generate(&self, request: GenerateRequest) -> LlmResult<GenerateResponse>;

    /// Generate a response as a stream of fragments.
    /// Providers without native streaming yield the whole text at once.
    async fn generate_stream(&self, request: GenerateRequest) -> LlmResult<TextStream> {
        let response = self.generate(request).await?;
        Ok(stream::once(async move { Ok(response.text) }).boxed())
    }

    /// Get the name of this provider
    fn name(&self) -> &str;
}

/// Produces the question for a new round
#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    /// Each call is independent; the caller concatenates the whole stream.
    ///
    /// Fallback between providers only covers opening the stream. Once
    /// fragments flow, an error inside the stream ends the question and the
    /// caller sees it as a failed generation.
    async fn generate_question(
        &self,
        theme: &str,
        previous_questions: &[String],
    ) -> LlmResult<TextStream>;
}

/// Scores how close a guess came to the original answer
#[async_trait]
pub trait GuessJudge: Send + Sync {
    /// Returns the judge's raw verdict; callers extract the 1-10 score
    async fn rate_guess(
        &self,
        original_answer: &str,
        guess: &str,
        question: &str,
    ) -> LlmResult<String>;
}

/// Manager for multiple LLM providers, tried in order until one succeeds
pub struct LlmManager {
    pub providers: Vec<Box<dyn LlmProvider>>,
    max_tokens: u32,
    question_timeout: Duration,
    judge_timeout: Duration,
}

impl LlmManager {
    /// Create a new LLM manager with the given providers
    pub fn new(providers: Vec<Box<dyn LlmProvider>>, config: &LlmConfig) -> Self {
        Self {
            providers,
            max_tokens: config.default_max_tokens,
            question_timeout: config.question_timeout,
            judge_timeout: config.judge_timeout,
        }
    }

    fn no_providers() -> LlmError {
        LlmError::ConfigError(
            "No LLM providers configured. Set OPENAI_API_KEY or OLLAMA_BASE_URL".to_string(),
        )
    }
}

#[async_trait]
impl QuestionGenerator for LlmManager {
    async fn generate_question(
        &self,
        theme: &str,
        previous_questions: &[String],
    ) -> LlmResult<TextStream> {
        let request = GenerateRequest {
            system: QUESTION_SYSTEM_PROMPT.to_string(),
            prompt: question_prompt(theme, previous_questions),
            max_tokens: Some(self.max_tokens),
            timeout: self.question_timeout,
        };

        let mut last_error = Self::no_providers();
        // First provider that opens a stream owns the question
        for provider in &self.providers {
            match provider.generate_stream(request.clone()).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    tracing::warn!("Provider {} failed to generate question: {}", provider.name(), e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

#[async_trait]
impl GuessJudge for LlmManager {
    async fn rate_guess(
        &self,
        original_answer: &str,
        guess: &str,
        question: &str,
    ) -> LlmResult<String> {
        let request = GenerateRequest {
            system: JUDGE_SYSTEM_PROMPT.to_string(),
            prompt: judge_prompt(original_answer, guess, question),
            max_tokens: Some(5),
            timeout: self.judge_timeout,
        };

        let mut last_error = Self::no_providers();
        for provider in &self.providers {
            match provider.generate(request.clone()).await {
                Ok(response) => {
                    tracing::debug!(
                        "Judge {} ({}) answered in {}ms",
                        provider.name(),
                        response.model,
                        response.latency_ms
                    );
                    return Ok(response.text);
                }
                Err(e) => {
                    tracing::warn!("Provider {} failed to rate guess: {}", provider.name(), e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

/// Configuration for LLM providers
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// OpenAI API key
    pub openai_api_key: Option<String>,
    /// OpenAI model to use
    pub openai_model: String,
    /// Ollama base URL
    pub ollama_base_url: Option<String>,
    /// Ollama model to use
    pub ollama_model: String,
    /// Hard limit for a single judge call
    pub judge_timeout: Duration,
    /// Hard limit for producing a full question
    pub question_timeout: Duration,
    /// Default max tokens for generated questions
    pub default_max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            ollama_base_url: Some("http://localhost:11434".to_string()),
            ollama_model: "llama3.2".to_string(),
            judge_timeout: Duration::from_secs(30),
            question_timeout: Duration::from_secs(45),
            default_max_tokens: 150,
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn seconds_env(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .map(Duration::from_secs)
}

impl LlmConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let ollama_base_url = match std::env::var("OLLAMA_BASE_URL") {
            Ok(url) => {
                let trimmed = url.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Err(_) => defaults.ollama_base_url,
        };

        Self {
            openai_api_key: non_empty_env("OPENAI_API_KEY"),
            openai_model: non_empty_env("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            ollama_base_url,
            ollama_model: non_empty_env("OLLAMA_MODEL").unwrap_or(defaults.ollama_model),
            judge_timeout: seconds_env("JUDGE_TIMEOUT").unwrap_or(defaults.judge_timeout),
            question_timeout: seconds_env("QUESTION_TIMEOUT")
                .unwrap_or(defaults.question_timeout),
            default_max_tokens: std::env::var("LLM_MAX_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_max_tokens),
        }
    }

    /// Build an LlmManager with all configured providers
    pub fn build_manager(&self) -> LlmResult<LlmManager> {
        let mut providers: Vec<Box<dyn LlmProvider>> = Vec::new();

        // Add OpenAI if API key is available
        if let Some(api_key) = &self.openai_api_key {
            providers.push(Box::new(OpenAiProvider::new(
                api_key.clone(),
                self.openai_model.clone(),
            )));
        }

        // Add Ollama if base URL is available
        if let Some(base_url) = &self.ollama_base_url {
            providers.push(Box::new(OllamaProvider::new(
                base_url.clone(),
                self.ollama_model.clone(),
            )?));
        }

        if providers.is_empty() {
            return Err(LlmManager::no_providers());
        }

        Ok(LlmManager::new(providers, self))
    }
}

const QUESTION_SYSTEM_PROMPT: &str = "You write questions for a party game. \
    Players answer the question about themselves, then try to guess what another player answered. \
    Write exactly one short, open-ended, personal question that is fun to answer in a sentence or two. \
    Reply with the question only, no numbering, quotes or commentary.";

const JUDGE_SYSTEM_PROMPT: &str = "You judge a party game. \
    A player tried to guess what another player answered to a question. \
    Rate how close the guess is to the original answer in meaning, from 1 (completely different) to 10 (essentially the same). \
    Reply with the number only.";

fn question_prompt(theme: &str, previous_questions: &[String]) -> String {
    let mut prompt = format!("Theme: {}", theme.trim());
    if !previous_questions.is_empty() {
        prompt.push_str("\n\nDo not repeat or closely paraphrase any of these earlier questions:");
        for question in previous_questions {
            prompt.push_str("\n- ");
            prompt.push_str(question);
        }
    }
    prompt
}

fn judge_prompt(original_answer: &str, guess: &str, question: &str) -> String {
    format!(
        "Question: {}\nOriginal answer: {}\nGuess: {}\n\nRating (1-10):",
        question, original_answer, guess
    )
}
