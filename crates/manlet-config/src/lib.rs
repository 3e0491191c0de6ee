pub mod loader;
pub mod schema;

pub use loader::{find_config_path, load_config, resolve_path, save_config};
pub use schema::{
    AgentConfig, ArtConfig, AutonomyConfig, BridgeConfig, Config, ProviderConfig, ProvidersConfig,
    WalletConfig, DEFAULT_DIRECTIVE,
};
