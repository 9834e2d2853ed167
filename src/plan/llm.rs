//! The abstracted single-LLM-call capability, a direct copy of
//! `loom::llm::LlmClient`'s trait shape wrapping `async-openai`'s
//! chat-completion types. Used by the Plan Generator (classification) and
//! optionally by the Synthesis Engine (free-form reasoning).

use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client as OpenAiClient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    RequestFailed(String),
    #[error("llm response could not be parsed: {0}")]
    ParseFailed(String),
}

/// Extracted query entities, per spec.md §4.7 step 1.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedEntities {
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub vessel_name: Option<String>,
    pub fuel_types: Vec<String>,
    pub fuel_quantity: Option<f64>,
    pub departure_date: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_f64(&self) -> f64 {
        match self {
            Confidence::Low => 0.4,
            Confidence::Medium => 0.7,
            Confidence::High => 0.9,
        }
    }
}

/// The structured object the single classification LLM call returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResponse {
    pub query_type: String,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub secondary_intents: Vec<String>,
    #[serde(default)]
    pub extracted_entities: ExtractedEntities,
    #[serde(default)]
    pub proposed_workflow_id: Option<String>,
}

/// Everything the classification call is provided, per spec.md §4.7 step 1.
pub struct ClassificationRequest {
    pub query: String,
    pub known_query_types: Vec<String>,
    pub known_workflows: Vec<String>,
    pub known_capabilities: Vec<String>,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn classify(&self, request: ClassificationRequest) -> Result<ClassificationResponse, LlmError>;
    async fn generate_reasoning(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Production client: one chat-completion call per `classify`/
/// `generate_reasoning` invocation.
pub struct OpenAiLlmClient {
    client: OpenAiClient<async_openai::config::OpenAIConfig>,
    model: String,
}

impl OpenAiLlmClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: OpenAiClient::new(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiLlmClient {
    async fn classify(&self, request: ClassificationRequest) -> Result<ClassificationResponse, LlmError> {
        let system_prompt = format!(
            "Classify the bunker-planning query into one of these query types: {:?}. \
             Known workflows: {:?}. Known capabilities: {:?}. \
             Respond with a JSON object matching the ClassificationResponse schema.",
            request.known_query_types, request.known_workflows, request.known_capabilities
        );

        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()
                .map_err(|e| LlmError::RequestFailed(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.query)
                .build()
                .map_err(|e| LlmError::RequestFailed(e.to_string()))?
                .into(),
        ];

        let completion_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(completion_request)
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| LlmError::ParseFailed("empty completion".into()))?;

        serde_json::from_str(&content).map_err(|e| LlmError::ParseFailed(e.to_string()))
    }

    async fn generate_reasoning(&self, prompt: &str) -> Result<String, LlmError> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![ChatCompletionRequestUserMessageArgs::default()
            .content(prompt.to_string())
            .build()
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?
            .into()];

        let completion_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(completion_request)
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| LlmError::ParseFailed("empty completion".into()))
    }
}

/// Test double returning a fixed or queued response, never touching the
/// network — the `MockLlm`-equivalent `loom`'s test suite uses.
pub struct MockClassifier {
    responses: std::sync::Mutex<Vec<Result<ClassificationResponse, LlmError>>>,
    reasoning: String,
}

impl MockClassifier {
    pub fn with_responses(responses: Vec<Result<ClassificationResponse, LlmError>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
            reasoning: "Mock reasoning summary.".to_string(),
        }
    }

    pub fn always_failing() -> Self {
        Self::with_responses(vec![Err(LlmError::ParseFailed("mock always fails".into()))])
    }
}

#[async_trait]
impl LlmClient for MockClassifier {
    async fn classify(&self, _request: ClassificationRequest) -> Result<ClassificationResponse, LlmError> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(LlmError::ParseFailed("mock exhausted".into()));
        }
        responses.remove(0)
    }

    async fn generate_reasoning(&self, _prompt: &str) -> Result<String, LlmError> {
        Ok(self.reasoning.clone())
    }
}
