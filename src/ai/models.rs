//! Static model and provider catalog

use serde::{Deserialize, Serialize};

pub const CHAT_COMPLETIONS_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const LOCAL_INFERENCE_ENDPOINT: &str = "http://localhost:11434/api/chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProviderKind {
    /// Hosted chat-completions API, bearer credential
    ChatCompletions,
    /// Local inference server, no credential
    LocalInference,
}

impl ProviderKind {
    pub fn requires_credential(self) -> bool {
        matches!(self, ProviderKind::ChatCompletions)
    }

    pub fn default_endpoint(self) -> &'static str {
        match self {
            ProviderKind::ChatCompletions => CHAT_COMPLETIONS_ENDPOINT,
            ProviderKind::LocalInference => LOCAL_INFERENCE_ENDPOINT,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ProviderKind::ChatCompletions => "OpenAI (Cloud)",
            ProviderKind::LocalInference => "Ollama (Local - Free)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AiModel {
    #[serde(rename = "gpt-4o")]
    Gpt4o,
    #[default]
    #[serde(rename = "gpt-4o-mini")]
    Gpt4oMini,
    #[serde(rename = "gpt-4-turbo")]
    Gpt4Turbo,
    #[serde(rename = "gpt-3.5-turbo")]
    Gpt35Turbo,
    #[serde(rename = "deepseek-coder:6.7b")]
    DeepseekCoder,
    #[serde(rename = "dolphin-mistral:7b-v2.8")]
    DolphinMistral,
    #[serde(rename = "tinyllama:latest")]
    TinyLlama,
}

impl AiModel {
    pub const ALL: [AiModel; 7] = [
        AiModel::Gpt4o,
        AiModel::Gpt4oMini,
        AiModel::Gpt4Turbo,
        AiModel::Gpt35Turbo,
        AiModel::DeepseekCoder,
        AiModel::DolphinMistral,
        AiModel::TinyLlama,
    ];

    /// Model id as sent on the wire
    pub fn id(self) -> &'static str {
        match self {
            AiModel::Gpt4o => "gpt-4o",
            AiModel::Gpt4oMini => "gpt-4o-mini",
            AiModel::Gpt4Turbo => "gpt-4-turbo",
            AiModel::Gpt35Turbo => "gpt-3.5-turbo",
            AiModel::DeepseekCoder => "deepseek-coder:6.7b",
            AiModel::DolphinMistral => "dolphin-mistral:7b-v2.8",
            AiModel::TinyLlama => "tinyllama:latest",
        }
    }

    pub fn provider(self) -> ProviderKind {
        match self {
            AiModel::Gpt4o | AiModel::Gpt4oMini | AiModel::Gpt4Turbo | AiModel::Gpt35Turbo => {
                ProviderKind::ChatCompletions
            }
            AiModel::DeepseekCoder | AiModel::DolphinMistral | AiModel::TinyLlama => {
                ProviderKind::LocalInference
            }
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            AiModel::Gpt4o => "GPT-4o (Most Capable)",
            AiModel::Gpt4oMini => "GPT-4o Mini (Fast & Cheap)",
            AiModel::Gpt4Turbo => "GPT-4 Turbo (Balanced)",
            AiModel::Gpt35Turbo => "GPT-3.5 Turbo (Legacy)",
            AiModel::DeepseekCoder => "DeepSeek Coder 6.7B (Free, Local)",
            AiModel::DolphinMistral => "Dolphin Mistral 7B (Free, Local)",
            AiModel::TinyLlama => "TinyLlama 1.1B (Fast, Free)",
        }
    }

    /// USD per 1K prompt tokens
    pub fn cost_per_1k_input(self) -> f64 {
        match self {
            AiModel::Gpt4o => 0.005,
            AiModel::Gpt4oMini => 0.00015,
            AiModel::Gpt4Turbo => 0.01,
            AiModel::Gpt35Turbo => 0.0005,
            AiModel::DeepseekCoder | AiModel::DolphinMistral | AiModel::TinyLlama => 0.0,
        }
    }

    /// USD per 1K completion tokens
    pub fn cost_per_1k_output(self) -> f64 {
        match self {
            AiModel::Gpt4o => 0.015,
            AiModel::Gpt4oMini => 0.0006,
            AiModel::Gpt4Turbo => 0.03,
            AiModel::Gpt35Turbo => 0.0015,
            AiModel::DeepseekCoder | AiModel::DolphinMistral | AiModel::TinyLlama => 0.0,
        }
    }

    pub fn max_context_length(self) -> u32 {
        match self {
            AiModel::Gpt4o | AiModel::Gpt4oMini | AiModel::Gpt4Turbo => 128_000,
            AiModel::Gpt35Turbo => 16_385,
            AiModel::DeepseekCoder => 16_384,
            AiModel::DolphinMistral => 8_192,
            AiModel::TinyLlama => 2_048,
        }
    }

    pub fn cost(self, input_tokens: u64, output_tokens: u64) -> f64 {
        input_tokens as f64 / 1000.0 * self.cost_per_1k_input()
            + output_tokens as f64 / 1000.0 * self.cost_per_1k_output()
    }
}
