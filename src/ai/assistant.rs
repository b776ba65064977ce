//! Terminal assistant built on `AiClient`

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::client::AiClient;
use super::error::AiError;
use super::provider::{Message, Role};

const LAST_OUTPUT_PREFIX: usize = 200;

/// What the user is looking at when asking for help
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandContext {
    pub current_directory: String,
    pub os_info: String,
    pub server_name: String,
    #[serde(default)]
    pub last_command: Option<String>,
    #[serde(default)]
    pub last_output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSuggestion {
    pub command: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorExplanation {
    pub explanation: String,
    pub possible_causes: Vec<String>,
    pub suggested_fixes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

pub struct Assistant {
    client: Arc<AiClient>,
}

impl Assistant {
    pub fn new(client: Arc<AiClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<AiClient> {
        &self.client
    }

    async fn ask(
        &self,
        system: &str,
        prompt: String,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, AiError> {
        let messages = [Message::system(system), Message::user(prompt)];
        self.client
            .send_request(&messages, max_tokens, temperature)
            .await
    }

    /// Suggest next commands. Empty when AI is disabled or the reply is unusable.
    pub async fn suggest_commands(
        &self,
        ctx: &CommandContext,
    ) -> Result<Vec<CommandSuggestion>, AiError> {
        if !self.client.is_enabled() {
            return Ok(Vec::new());
        }

        let last_output: Option<String> = ctx
            .last_output
            .as_deref()
            .map(|o| o.chars().take(LAST_OUTPUT_PREFIX).collect());
        let prompt = format!(
            "You are a helpful SSH terminal assistant. Based on the following context, \
             suggest 3-5 useful bash commands the user might want to run next.\n\n\
             Current Directory: {}\n\
             Operating System: {}\n\
             Last Command: {}\n\
             Last Output: {}\n\n\
             Respond with ONLY a JSON array of objects with \"command\" and \"description\" \
             fields. Example:\n\
             [{{\"command\": \"ls -la\", \"description\": \"List all files with details\"}}]",
            ctx.current_directory,
            ctx.os_info,
            ctx.last_command.as_deref().unwrap_or("none"),
            last_output.as_deref().unwrap_or("none"),
        );

        let reply = self
            .ask(
                "You are a Unix command expert. Respond only with valid JSON.",
                prompt,
                200,
                0.3,
            )
            .await?;

        Ok(parse_suggestions(&reply))
    }

    pub async fn explain_error(
        &self,
        error: &str,
        command: &str,
        ctx: &CommandContext,
    ) -> Result<ErrorExplanation, AiError> {
        if !self.client.is_enabled() {
            return Ok(ErrorExplanation {
                explanation: "AI assistance disabled".to_string(),
                possible_causes: Vec::new(),
                suggested_fixes: Vec::new(),
            });
        }

        let prompt = format!(
            "A user ran this command and got an error:\n\n\
             Command: {}\n\
             Error: {}\n\
             Directory: {}\n\
             OS: {}\n\n\
             Explain what went wrong in simple terms and suggest fixes. Respond with JSON:\n\
             {{\n  \"explanation\": \"Brief explanation\",\n  \
             \"possibleCauses\": [\"cause1\", \"cause2\"],\n  \
             \"suggestedFixes\": [\"fix1\", \"fix2\"]\n}}",
            command, error, ctx.current_directory, ctx.os_info,
        );

        let reply = self
            .ask(
                "You are a helpful system administrator explaining errors to users.",
                prompt,
                300,
                0.4,
            )
            .await?;

        serde_json::from_str(strip_fences(&reply).trim())
            .map_err(|e| AiError::InvalidResponse(e.to_string()))
    }

    pub async fn natural_language_to_command(
        &self,
        input: &str,
        ctx: &CommandContext,
    ) -> Result<String, AiError> {
        if !self.client.is_enabled() {
            return Err(AiError::NoCredential);
        }

        let prompt = format!(
            "Convert this natural language request to a bash command:\n\n\
             Request: {}\n\
             Current Directory: {}\n\
             OS: {}\n\n\
             Respond with ONLY the bash command, no explanation or quotes.",
            input, ctx.current_directory, ctx.os_info,
        );

        let reply = self
            .ask(
                "You are a Unix shell expert. Respond only with valid bash commands.",
                prompt,
                100,
                0.2,
            )
            .await?;

        Ok(strip_fences(&reply).trim().to_string())
    }

    pub async fn chat(
        &self,
        message: &str,
        ctx: &CommandContext,
        history: &[ChatMessage],
    ) -> Result<String, AiError> {
        if !self.client.is_enabled() {
            return Err(AiError::NoCredential);
        }

        let system = format!(
            "You are a helpful SSH terminal assistant. The user is currently:\n\
             - Directory: {}\n\
             - OS: {}\n\
             - Server: {}\n\n\
             Help them with command questions, system administration, and troubleshooting.",
            ctx.current_directory, ctx.os_info, ctx.server_name,
        );

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system));
        messages.extend(history.iter().map(|m| Message {
            role: m.role,
            content: m.content.clone(),
        }));
        messages.push(Message::user(message));

        debug!("Chat request with {} history messages", history.len());
        self.client.send_request(&messages, 500, 0.7).await
    }
}

/// Offline command template for a keyword (case-insensitive)
pub fn quick_command(keyword: &str) -> Option<&'static str> {
    let command = match keyword.trim().to_lowercase().as_str() {
        "network" => "ip addr show",
        "wifi" => "iwconfig",
        "disk" => "df -h",
        "memory" => "free -h",
        "cpu" => "top -bn1 | head -20",
        "processes" => "ps aux | head -20",
        "users" => "who",
        "ports" => "netstat -tuln",
        "logs" => "tail -f /var/log/syslog",
        "docker" => "docker ps -a",
        _ => return None,
    };
    Some(command)
}

/// Remove markdown code fences around a reply
fn strip_fences(text: &str) -> String {
    text.replace("```bash", "")
        .replace("```json", "")
        .replace("```", "")
}

fn parse_suggestions(reply: &str) -> Vec<CommandSuggestion> {
    match serde_json::from_str::<Vec<CommandSuggestion>>(strip_fences(reply).trim()) {
        Ok(suggestions) => suggestions,
        Err(e) => {
            debug!("Discarding unparseable suggestions: {}", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::client::tests::{client_with, ScriptedTransport};
    use crate::config::keychain::MemorySecretStore;
    use crate::config::settings::AiSettings;
    use serde_json::json;

    fn ctx() -> CommandContext {
        CommandContext {
            current_directory: "/var/log".into(),
            os_info: "Ubuntu 22.04".into(),
            server_name: "web-1".into(),
            last_command: Some("ls".into()),
            last_output: Some("x".repeat(500)),
        }
    }

    fn assistant() -> (Assistant, Arc<ScriptedTransport>) {
        let (client, transport) = client_with(AiSettings::default());
        (Assistant::new(Arc::new(client)), transport)
    }

    #[tokio::test]
    async fn test_suggest_commands() {
        let (assistant, transport) = assistant();
        transport.push_completion(
            r#"[{"command": "tail -n 50 syslog", "description": "Recent log lines"}]"#,
        );

        let suggestions = assistant.suggest_commands(&ctx()).await.unwrap();
        assert_eq!(
            suggestions,
            vec![CommandSuggestion {
                command: "tail -n 50 syslog".into(),
                description: "Recent log lines".into(),
            }]
        );

        let sent = transport.last();
        assert_eq!(sent.body["max_tokens"], 200);
        assert_eq!(sent.body["messages"][0]["role"], "system");
        let prompt = sent.body["messages"][1]["content"].as_str().unwrap();
        assert!(prompt.contains("Current Directory: /var/log"));
        assert!(prompt.contains(&format!("Last Output: {}\n", "x".repeat(200))));
        assert!(!prompt.contains(&"x".repeat(201)));
    }

    #[tokio::test]
    async fn test_unparseable_suggestions_are_empty() {
        let (assistant, transport) = assistant();
        transport.push_completion("Sure! Try running ls.");
        assert!(assistant.suggest_commands(&ctx()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_explain_error() {
        let (assistant, transport) = assistant();
        transport.push_completion(
            &json!({
                "explanation": "No such file",
                "possibleCauses": ["typo"],
                "suggestedFixes": ["check the path"]
            })
            .to_string(),
        );
        let explanation = assistant
            .explain_error("No such file or directory", "cat foo", &ctx())
            .await
            .unwrap();
        assert_eq!(explanation.possible_causes, vec!["typo".to_string()]);
        assert_eq!(transport.last().body["max_tokens"], 300);

        transport.push_completion("not json");
        assert!(matches!(
            assistant.explain_error("e", "c", &ctx()).await,
            Err(AiError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_natural_language_strips_fences() {
        let (assistant, transport) = assistant();
        transport.push_completion("```bash\ndu -sh *\n```\n");
        let command = assistant
            .natural_language_to_command("folder sizes", &ctx())
            .await
            .unwrap();
        assert_eq!(command, "du -sh *");
    }

    #[tokio::test]
    async fn test_chat_includes_context_and_history() {
        let (assistant, transport) = assistant();
        transport.push_completion("Use journalctl.");

        let history = vec![
            ChatMessage::new(Role::User, "how do I read logs?"),
            ChatMessage::new(Role::Assistant, "Which service?"),
        ];
        let reply = assistant.chat("nginx", &ctx(), &history).await.unwrap();
        assert_eq!(reply, "Use journalctl.");

        let body = transport.last().body;
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert!(messages[0]["content"]
            .as_str()
            .unwrap()
            .contains("- Server: web-1"));
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[3]["content"], "nginx");
        assert_eq!(body["max_tokens"], 500);
    }

    #[tokio::test]
    async fn test_disabled_assistant() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = AiClient::new(
            AiSettings::default(),
            Arc::new(MemorySecretStore::new()),
            transport.clone(),
        )
        .unwrap();
        let assistant = Assistant::new(Arc::new(client));

        assert!(assistant.suggest_commands(&ctx()).await.unwrap().is_empty());
        assert_eq!(
            assistant.explain_error("e", "c", &ctx()).await.unwrap().explanation,
            "AI assistance disabled"
        );
        assert!(matches!(
            assistant.chat("hi", &ctx(), &[]).await,
            Err(AiError::NoCredential)
        ));
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn test_quick_command() {
        assert_eq!(quick_command("disk"), Some("df -h"));
        assert_eq!(quick_command("Docker"), Some("docker ps -a"));
        assert_eq!(quick_command("weather"), None);
    }
}
