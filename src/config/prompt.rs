use serde::Deserialize;
use std::fs;
use std::sync::Arc;
use log::info;

use crate::error::{ ChatError, ChatResult };

pub const DEFAULT_SYSTEM_INSTRUCTION: &str =
    "You are Cortex, an advanced AI assistant. You are helpful, harmless, and honest. Use markdown for formatting, such as headers (##), lists, and bold text. If the user provides a document, analyze its content.";
pub const DEFAULT_GREETING: &str = "Hello, I'm Cortex. How can I help you today?";
pub const DEFAULT_ATTACHMENT_INSTRUCTION: &str = "Analyze this attachment.";

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PromptConfig {
    pub system_instruction: String,
    pub greeting: String,
    /// Sent in place of the text when a submission only carries attachments.
    pub attachment_instruction: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            greeting: DEFAULT_GREETING.to_string(),
            attachment_instruction: DEFAULT_ATTACHMENT_INSTRUCTION.to_string(),
        }
    }
}

impl PromptConfig {
    fn validate(&self) -> ChatResult<()> {
        if self.system_instruction.trim().is_empty() {
            return Err(ChatError::Configuration("system_instruction must not be empty".to_string()));
        }
        if self.attachment_instruction.trim().is_empty() {
            return Err(
                ChatError::Configuration("attachment_instruction must not be empty".to_string())
            );
        }
        Ok(())
    }
}

pub fn load_prompts_from_str(json: &str) -> ChatResult<PromptConfig> {
    let config: PromptConfig = serde_json
        ::from_str(json)
        .map_err(|e| ChatError::Configuration(format!("Failed to parse prompts: {}", e)))?;
    config.validate()?;
    Ok(config)
}

/// Loads prompt texts from `path`, falling back to the built-in texts when no
/// path is configured. Keys missing from the file keep their defaults.
pub fn load_prompts(path: Option<&str>) -> ChatResult<Arc<PromptConfig>> {
    let Some(path) = path else {
        return Ok(Arc::new(PromptConfig::default()));
    };
    let file_content = fs
        ::read_to_string(path)
        .map_err(|e|
            ChatError::Configuration(format!("Failed to read prompts file '{}': {}", path, e))
        )?;
    let config = load_prompts_from_str(&file_content)?;
    info!("Loaded prompt overrides from: {}", path);
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_overrides_keep_defaults() {
        let config = load_prompts_from_str(r#"{"greeting":"Hi there"}"#).unwrap();
        assert_eq!(config.greeting, "Hi there");
        assert_eq!(config.system_instruction, DEFAULT_SYSTEM_INSTRUCTION);
        assert_eq!(config.attachment_instruction, DEFAULT_ATTACHMENT_INSTRUCTION);
    }

    #[test]
    fn rejects_blank_attachment_instruction() {
        let err = load_prompts_from_str(r#"{"attachment_instruction":"  "}"#).unwrap_err();
        assert!(matches!(err, ChatError::Configuration(_)));
    }

    #[test]
    fn no_path_means_defaults() {
        assert_eq!(*load_prompts(None).unwrap(), PromptConfig::default());
    }

    #[test]
    fn missing_file_is_reported() {
        assert!(load_prompts(Some("/definitely/not/here.json")).is_err());
    }
}
