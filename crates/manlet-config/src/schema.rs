use serde::{Deserialize, Serialize};

/// Instruction handed to the agent at the start of every autonomous cycle.
pub const DEFAULT_DIRECTIVE: &str = "\
Be creative and do something interesting on the Solana blockchain. \
Don't wait for further input. Pick one action and execute it now, \
choosing whatever best shows off who you are and what you can do.";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agent: AgentConfig,
    pub wallet: WalletConfig,
    pub bridge: BridgeConfig,
    pub art: ArtConfig,
    pub autonomy: AutonomyConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Display name used as the sender of assistant messages.
    pub name: String,
    pub provider: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u64,
    /// Upper bound on model <> tool round trips within one cycle.
    pub max_tool_iterations: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "Manlet".into(),
            provider: "openai".into(),
            model: "gpt-4o".into(),
            temperature: 0.7,
            max_tokens: 4096,
            max_tool_iterations: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct WalletConfig {
    /// Public address of the agent's wallet. Falls back to WALLET_ADDRESS.
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    /// Interpreter that runs the generated action fragments.
    pub program: String,
    /// Arguments placed before the fragment path (e.g. `["tsx"]` for `npx tsx`).
    pub program_args: Vec<String>,
    /// Module exporting the actions, relative paths resolve against the cwd.
    pub actions_module: String,
    /// Where fragments are written. Defaults to `<tmp>/manlet`.
    pub scratch_dir: Option<String>,
    /// Per-call timeout in seconds, 0 disables it.
    pub timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            program: "node".into(),
            program_args: Vec::new(),
            actions_module: "./actions.mjs".into(),
            scratch_dir: None,
            timeout_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArtConfig {
    /// Falls back to OPENAI_API_KEY.
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub size: String,
    pub quality: String,
}

impl Default for ArtConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://api.openai.com/v1".into(),
            model: "dall-e-3".into(),
            size: "1024x1024".into(),
            quality: "standard".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutonomyConfig {
    pub directive: String,
    pub interval_secs: u64,
    /// Consecutive failed cycles tolerated before the loop gives up.
    pub max_consecutive_failures: u32,
    /// Base delay after a failed cycle, doubled per consecutive failure.
    pub backoff_secs: u64,
    /// Number of trailing history messages sent to the model, 0 sends all.
    pub history_window: usize,
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        Self {
            directive: DEFAULT_DIRECTIVE.into(),
            interval_secs: 10,
            max_consecutive_failures: 5,
            backoff_secs: 5,
            history_window: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    pub openai: Option<ProviderConfig>,
    pub anthropic: Option<ProviderConfig>,
    pub ollama: Option<ProviderConfig>,
    pub openrouter: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let cfg: Config = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(cfg.agent.name, "Manlet");
        assert_eq!(cfg.bridge.program, "node");
        assert_eq!(cfg.autonomy.interval_secs, 10);
        assert_eq!(cfg.autonomy.directive, DEFAULT_DIRECTIVE);
        assert_eq!(cfg.art.model, "dall-e-3");
    }

    #[test]
    fn camel_case_fields_parsed() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "bridge": {
                "program": "npx",
                "programArgs": ["tsx"],
                "actionsModule": "./actions.ts",
                "timeoutSecs": 90
            },
            "autonomy": {
                "intervalSecs": 30,
                "maxConsecutiveFailures": 2,
                "historyWindow": 40
            }
        }))
        .unwrap();
        assert_eq!(cfg.bridge.program_args, vec!["tsx".to_string()]);
        assert_eq!(cfg.bridge.actions_module, "./actions.ts");
        assert_eq!(cfg.bridge.timeout_secs, 90);
        assert_eq!(cfg.autonomy.interval_secs, 30);
        assert_eq!(cfg.autonomy.max_consecutive_failures, 2);
        assert_eq!(cfg.autonomy.history_window, 40);
        // untouched fields keep their defaults
        assert_eq!(cfg.autonomy.backoff_secs, 5);
    }

    #[test]
    fn provider_sections_optional() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "providers": { "anthropic": { "apiKey": "sk-test" } }
        }))
        .unwrap();
        assert!(cfg.providers.openai.is_none());
        assert_eq!(
            cfg.providers
                .anthropic
                .as_ref()
                .and_then(|p| p.api_key.as_deref()),
            Some("sk-test")
        );
    }
}
