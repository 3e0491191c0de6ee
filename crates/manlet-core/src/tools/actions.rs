//! Exposes each facade operation to the model as a tool.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use super::{Tool, ToolRegistry};
use crate::facade::ActionFacade;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionKind {
    CreateToken,
    TransferAsset,
    GetBalance,
    RequestFaucet,
    GenerateArt,
    DeployNft,
    MintNft,
}

impl ActionKind {
    const ALL: [ActionKind; 7] = [
        ActionKind::CreateToken,
        ActionKind::TransferAsset,
        ActionKind::GetBalance,
        ActionKind::RequestFaucet,
        ActionKind::GenerateArt,
        ActionKind::DeployNft,
        ActionKind::MintNft,
    ];

    fn name(self) -> &'static str {
        match self {
            ActionKind::CreateToken => "create_token",
            ActionKind::TransferAsset => "transfer_asset",
            ActionKind::GetBalance => "get_balance",
            ActionKind::RequestFaucet => "request_sol_from_faucet",
            ActionKind::GenerateArt => "generate_art",
            ActionKind::DeployNft => "deploy_nft",
            ActionKind::MintNft => "mint_nft",
        }
    }

    fn description(self) -> &'static str {
        match self {
            ActionKind::CreateToken => {
                "Create a new SPL token with the given name and symbol and mint its \
                 initial supply to your wallet."
            }
            ActionKind::TransferAsset => {
                "Transfer an amount of a token (identified by its mint address) to a \
                 destination wallet address."
            }
            ActionKind::GetBalance => "Get the balance of a token account.",
            ActionKind::RequestFaucet => {
                "Request devnet SOL from the faucet. Use this whenever you need funds."
            }
            ActionKind::GenerateArt => {
                "Generate an image from a text prompt and return a link to it."
            }
            ActionKind::DeployNft => "Deploy a new NFT collection.",
            ActionKind::MintNft => "Mint an NFT from a collection to an owner address.",
        }
    }

    fn schema(self) -> Value {
        let (properties, required) = match self {
            ActionKind::CreateToken => (
                json!({
                    "name": {"type": "string", "minLength": 1, "description": "Token name"},
                    "symbol": {"type": "string", "minLength": 1, "description": "Ticker symbol"},
                    "initial_supply": {
                        "type": "integer",
                        "minimum": 0,
                        "description": "Supply to mint, in base units"
                    }
                }),
                json!(["name", "symbol", "initial_supply"]),
            ),
            ActionKind::TransferAsset => (
                json!({
                    "amount": {
                        "type": ["number", "string"],
                        "description": "Amount to send, as a decimal number"
                    },
                    "asset_id": {"type": "string", "description": "Token mint address"},
                    "destination_address": {"type": "string", "description": "Recipient wallet"}
                }),
                json!(["amount", "asset_id", "destination_address"]),
            ),
            ActionKind::GetBalance => (
                json!({
                    "asset_id": {"type": "string", "description": "Token account address"}
                }),
                json!(["asset_id"]),
            ),
            ActionKind::RequestFaucet => (json!({}), json!([])),
            ActionKind::GenerateArt => (
                json!({
                    "prompt": {"type": "string", "minLength": 1, "description": "What to draw"}
                }),
                json!(["prompt"]),
            ),
            ActionKind::DeployNft => (
                json!({
                    "name": {"type": "string", "minLength": 1},
                    "symbol": {"type": "string"},
                    "base_uri": {"type": "string", "description": "Metadata URI"}
                }),
                json!(["name", "symbol", "base_uri"]),
            ),
            ActionKind::MintNft => (
                json!({
                    "contract_address": {"type": "string", "description": "Collection address"},
                    "mint_to": {"type": "string", "description": "Owner of the new NFT"}
                }),
                json!(["contract_address", "mint_to"]),
            ),
        };
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// A single facade operation in tool form.
struct FacadeTool {
    kind: ActionKind,
    facade: Arc<ActionFacade>,
}

#[async_trait]
impl Tool for FacadeTool {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn description(&self) -> &str {
        self.kind.description()
    }

    fn parameters_schema(&self) -> Value {
        self.kind.schema()
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let facade = &self.facade;
        let text = match self.kind {
            ActionKind::CreateToken => {
                let supply = params["initial_supply"]
                    .as_u64()
                    .ok_or_else(|| anyhow!("initial_supply must be a non-negative integer"))?;
                facade
                    .create_token(str_param(&params, "name")?, str_param(&params, "symbol")?, supply)
                    .await
            }
            ActionKind::TransferAsset => {
                facade
                    .transfer_asset(
                        parse_amount(&params["amount"])?,
                        str_param(&params, "asset_id")?,
                        str_param(&params, "destination_address")?,
                    )
                    .await
            }
            ActionKind::GetBalance => facade.get_balance(str_param(&params, "asset_id")?).await,
            ActionKind::RequestFaucet => facade.request_faucet().await,
            ActionKind::GenerateArt => facade.generate_art(str_param(&params, "prompt")?).await,
            ActionKind::DeployNft => {
                facade
                    .deploy_nft(
                        str_param(&params, "name")?,
                        str_param(&params, "symbol")?,
                        str_param(&params, "base_uri")?,
                    )
                    .await
            }
            ActionKind::MintNft => {
                facade
                    .mint_nft(
                        str_param(&params, "contract_address")?,
                        str_param(&params, "mint_to")?,
                    )
                    .await
            }
        };
        Ok(text)
    }
}

fn str_param<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("missing required parameter: {key}"))
}

/// Parse an amount exactly from its JSON text, so `0.1` becomes the decimal
/// 0.1 rather than the float nearest to it.
fn parse_amount(value: &Value) -> Result<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return Err(anyhow!("amount must be a number")),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| anyhow!("invalid amount '{text}': {e}"))
}

/// Build the catalog of every supported action.
pub fn action_catalog(facade: Arc<ActionFacade>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for kind in ActionKind::ALL {
        registry.register(Box::new(FacadeTool {
            kind,
            facade: facade.clone(),
        }));
    }
    registry
}
