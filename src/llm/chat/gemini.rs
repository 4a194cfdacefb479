use async_trait::async_trait;
use serde::{ Deserialize, Serialize };
use log::{ debug, info };
use url::Url;

use super::{
    http_stream_generate,
    ChatService,
    ContentPart,
    FragmentStream,
    RemoteContent,
    RemoteConversation,
    ResponseFragment,
};
use crate::error::{ ChatError, ChatResult };
use crate::llm::ModelConfig;
use crate::models::chat::{ GroundingSource, Role };

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamRequest {
    contents: Vec<GeminiContent>,
    system_instruction: GeminiContent,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    google_search: GoogleSearch,
}

#[derive(Serialize, Clone)]
struct GoogleSearch {}

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    thinking_config: ThinkingConfig,
}

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

#[derive(Deserialize)]
struct GoogleChunk {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleCandidate {
    content: Option<GoogleContent>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Deserialize)]
struct GoogleContent {
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Deserialize)]
struct GooglePart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Deserialize)]
struct GroundingChunk {
    web: Option<WebSource>,
}

#[derive(Deserialize)]
struct WebSource {
    uri: Option<String>,
    title: Option<String>,
}

fn to_gemini_content(role: Role, parts: Vec<ContentPart>) -> GeminiContent {
    let parts = parts
        .into_iter()
        .map(|part| match part {
            ContentPart::Text(text) => GeminiPart::Text { text },
            ContentPart::InlineData { mime_type, data } =>
                GeminiPart::Inline {
                    inline_data: InlineData { mime_type, data },
                },
        })
        .collect();
    GeminiContent {
        role: Some(role.remote_name()),
        parts,
    }
}

/// Parses one line of the `alt=sse` response body.
fn parse_gemini_line(line: &str) -> Option<ResponseFragment> {
    let line = line.trim();
    let payload = line.strip_prefix("data:").map(str::trim).unwrap_or(line);
    if payload.is_empty() || !payload.starts_with('{') {
        return None;
    }

    let chunk = match serde_json::from_str::<GoogleChunk>(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!("Ignoring unparseable Gemini stream line: {}", e);
            return None;
        }
    };

    let candidate = chunk.candidates.into_iter().next()?;
    let text: String = candidate.content
        .map(|c| {
            c.parts
                .into_iter()
                .filter(|p| !p.thought)
                .filter_map(|p| p.text)
                .collect()
        })
        .unwrap_or_default();

    let citations = candidate.grounding_metadata
        .map(|meta| {
            meta.grounding_chunks
                .into_iter()
                .filter_map(|c| c.web)
                .filter_map(|web| match (web.title, web.uri) {
                    (Some(title), Some(uri)) if !title.is_empty() && !uri.is_empty() => {
                        Some(GroundingSource { title, uri })
                    }
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    Some(ResponseFragment {
        text: if text.is_empty() { None } else { Some(text) },
        citations,
    })
}

pub struct GeminiChatService {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    system_instruction: String,
}

impl GeminiChatService {
    pub fn new(api_key: String, base_url: String, system_instruction: String) -> ChatResult<Self> {
        if api_key.trim().is_empty() {
            return Err(
                ChatError::Configuration("CHAT_API_KEY is required for the Gemini service".to_string())
            );
        }
        Url::parse(&base_url).map_err(|e|
            ChatError::Configuration(format!("Invalid CHAT_BASE_URL '{}': {}", base_url, e))
        )?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            system_instruction,
        })
    }

    fn stream_url(&self, api_model: &str) -> ChatResult<Url> {
        let mut url = Url::parse(
            &format!(
                "{}/models/{}:streamGenerateContent",
                self.base_url.trim_end_matches('/'),
                api_model
            )
        ).map_err(|e| ChatError::Configuration(e.to_string()))?;
        url.query_pairs_mut().append_pair("alt", "sse");
        Ok(url)
    }
}

#[async_trait]
impl ChatService for GeminiChatService {
    async fn start_chat(
        &self,
        history: Vec<RemoteContent>,
        config: &'static ModelConfig
    ) -> ChatResult<Box<dyn RemoteConversation>> {
        info!(
            "GeminiChatService::start_chat() → model={} history_items={} grounding={} thinking_budget={:?}",
            config.api_model,
            history.len(),
            config.use_grounding,
            config.thinking_budget
        );

        let url = self.stream_url(config.api_model)?;
        let history = history
            .into_iter()
            .map(|c| to_gemini_content(c.role, c.parts))
            .collect();

        Ok(
            Box::new(GeminiConversation {
                client: self.client.clone(),
                url,
                api_key: self.api_key.clone(),
                system_instruction: self.system_instruction.clone(),
                config,
                history,
            })
        )
    }
}

pub struct GeminiConversation {
    client: reqwest::Client,
    url: Url,
    api_key: String,
    system_instruction: String,
    config: &'static ModelConfig,
    history: Vec<GeminiContent>,
}

impl GeminiConversation {
    fn build_request(&self, contents: Vec<GeminiContent>) -> GeminiStreamRequest {
        let tools = if self.config.use_grounding {
            vec![GeminiTool { google_search: GoogleSearch {} }]
        } else {
            Vec::new()
        };
        let generation_config = self.config.thinking_budget.map(|budget| GenerationConfig {
            thinking_config: ThinkingConfig { thinking_budget: budget },
        });

        GeminiStreamRequest {
            contents,
            system_instruction: GeminiContent {
                role: None,
                parts: vec![GeminiPart::Text { text: self.system_instruction.clone() }],
            },
            tools,
            generation_config,
        }
    }
}

#[async_trait]
impl RemoteConversation for GeminiConversation {
    async fn send_message_stream(&mut self, parts: Vec<ContentPart>) -> ChatResult<FragmentStream> {
        let user_content = to_gemini_content(Role::User, parts);
        let mut contents = self.history.clone();
        contents.push(user_content.clone());
        let payload = self.build_request(contents);

        info!(
            "GeminiConversation::send_message_stream() → model={} contents={}",
            self.config.api_model,
            payload.contents.len()
        );

        let headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("x-goog-api-key".to_string(), self.api_key.clone())
        ];

        let stream = http_stream_generate(
            self.client.clone(),
            self.url.to_string(),
            payload,
            parse_gemini_line,
            Some(headers)
        ).await?;

        self.history.push(user_content);
        Ok(stream)
    }

    fn commit_reply(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.history.push(GeminiContent {
            role: Some(Role::Assistant.remote_name()),
            parts: vec![GeminiPart::Text { text: text.to_string() }],
        });
    }
}
