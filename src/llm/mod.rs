pub mod chat;
use serde::{ Deserialize, Serialize };
use std::str::FromStr;
use std::fmt;

/// Thinking budget granted to the reasoning variant.
pub const REASONING_THINKING_BUDGET: u32 = 16384;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelId {
    Flash,
    Reasoning,
    Research,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseModelIdError {
    message: String,
}

impl fmt::Display for ParseModelIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseModelIdError {}

impl FromStr for ModelId {
    type Err = ParseModelIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "flash" => Ok(ModelId::Flash),
            "reasoning" => Ok(ModelId::Reasoning),
            "research" => Ok(ModelId::Research),
            _ =>
                Err(ParseModelIdError {
                    message: format!("Invalid model id: '{}'", s),
                }),
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelId::Flash => "flash",
            ModelId::Reasoning => "reasoning",
            ModelId::Research => "research",
        };
        write!(f, "{}", name)
    }
}

impl ModelId {
    pub fn config(self) -> &'static ModelConfig {
        match self {
            ModelId::Flash => &MODELS[0],
            ModelId::Reasoning => &MODELS[1],
            ModelId::Research => &MODELS[2],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelConfig {
    pub id: ModelId,
    pub name: &'static str,
    pub description: &'static str,
    pub api_model: &'static str,
    pub use_grounding: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,
}

pub static MODELS: [ModelConfig; 3] = [
    ModelConfig {
        id: ModelId::Flash,
        name: "Flash",
        description: "Fast & efficient",
        api_model: "gemini-2.5-flash",
        use_grounding: false,
        thinking_budget: None,
    },
    ModelConfig {
        id: ModelId::Reasoning,
        name: "Reasoning",
        description: "High intelligence",
        api_model: "gemini-3-pro-preview",
        use_grounding: false,
        thinking_budget: Some(REASONING_THINKING_BUDGET),
    },
    ModelConfig {
        id: ModelId::Research,
        name: "Research",
        description: "Web grounded",
        api_model: "gemini-2.5-flash",
        use_grounding: true,
        thinking_budget: None,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_model_ids_case_insensitively() {
        assert_eq!("Flash".parse::<ModelId>(), Ok(ModelId::Flash));
        assert_eq!(" research ".parse::<ModelId>(), Ok(ModelId::Research));
        assert!("gpt".parse::<ModelId>().is_err());
    }

    #[test]
    fn catalogue_is_indexed_by_id() {
        for model in &MODELS {
            assert_eq!(model.id.config(), model);
        }
        assert_eq!(ModelId::Reasoning.config().thinking_budget, Some(16384));
        assert!(ModelId::Research.config().use_grounding);
        assert!(ModelId::Flash.config().thinking_budget.is_none());
    }
}
