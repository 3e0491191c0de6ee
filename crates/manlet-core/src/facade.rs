//! Typed wrappers around the supported actions.
//!
//! Every operation returns a plain status string, success or not, because the
//! model consumes tool results as text. Outcomes stay typed
//! (`Result<Value, ActionError>`) until the final rendering step.

use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::art::ImageGenerator;
use crate::bridge::{ActionDispatch, ActionRequest, BridgeError};

/// Names exported by the external actions module.
pub mod action_names {
    pub const CREATE_TOKEN: &str = "createToken";
    pub const TRANSFER_ASSET: &str = "transferAsset";
    pub const GET_BALANCE: &str = "getBalance";
    pub const DEPLOY_NFT: &str = "deployNFT";
    pub const MINT_NFT: &str = "mintNFT";
    pub const REQUEST_FAUCET: &str = "requestSolFromFaucet";
}

use action_names::*;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{0}")]
    Failed(String),
    #[error("amount {0} cannot be represented as a float")]
    Amount(Decimal),
    #[error(transparent)]
    Request(#[from] BridgeError),
}

pub struct ActionFacade {
    bridge: Arc<dyn ActionDispatch>,
    artist: Arc<dyn ImageGenerator>,
}

impl ActionFacade {
    pub fn new(bridge: Arc<dyn ActionDispatch>, artist: Arc<dyn ImageGenerator>) -> Self {
        Self { bridge, artist }
    }

    async fn call(&self, action: &str, params: Map<String, Value>) -> Result<Value, ActionError> {
        let request = ActionRequest::new(action, params)?;
        self.bridge
            .dispatch(&request)
            .await
            .into_result()
            .map_err(ActionError::Failed)
    }

    pub async fn create_token(&self, name: &str, symbol: &str, initial_supply: u64) -> String {
        let mut params = Map::new();
        params.insert("name".into(), name.into());
        params.insert("symbol".into(), symbol.into());
        params.insert("initialSupply".into(), initial_supply.into());
        render(
            "Token created",
            "creating token",
            self.call(CREATE_TOKEN, params).await,
        )
    }

    pub async fn transfer_asset(
        &self,
        amount: Decimal,
        asset_id: &str,
        destination_address: &str,
    ) -> String {
        let result = match amount_to_float(amount) {
            Ok(amount) => {
                let mut params = Map::new();
                params.insert("amount".into(), amount.into());
                params.insert("assetId".into(), asset_id.into());
                params.insert("destinationAddress".into(), destination_address.into());
                self.call(TRANSFER_ASSET, params).await
            }
            Err(e) => Err(e),
        };
        render("Asset transferred", "transferring asset", result)
    }

    pub async fn get_balance(&self, asset_id: &str) -> String {
        let mut params = Map::new();
        params.insert("assetId".into(), asset_id.into());
        render(
            "Balance",
            "getting balance",
            self.call(GET_BALANCE, params).await,
        )
    }

    pub async fn deploy_nft(&self, name: &str, symbol: &str, base_uri: &str) -> String {
        let mut params = Map::new();
        params.insert("name".into(), name.into());
        params.insert("symbol".into(), symbol.into());
        params.insert("baseUri".into(), base_uri.into());
        render(
            "NFT contract deployed",
            "deploying NFT contract",
            self.call(DEPLOY_NFT, params).await,
        )
    }

    pub async fn mint_nft(&self, contract_address: &str, mint_to: &str) -> String {
        let mut params = Map::new();
        params.insert("contractAddress".into(), contract_address.into());
        params.insert("mintTo".into(), mint_to.into());
        render("NFT minted", "minting NFT", self.call(MINT_NFT, params).await)
    }

    pub async fn request_faucet(&self) -> String {
        render(
            "Faucet request completed",
            "requesting from faucet",
            self.call(REQUEST_FAUCET, Map::new()).await,
        )
    }

    /// Goes straight to the image generator, not through the bridge.
    pub async fn generate_art(&self, prompt: &str) -> String {
        match self.artist.generate(prompt).await {
            Ok(url) => format!("Generated artwork available at: {url}"),
            Err(e) => format!("Error generating artwork: {e}"),
        }
    }
}

/// Convert an exact decimal amount to the bridge's float representation.
///
/// This loses precision: most decimal fractions (0.1, 0.3, ...) have no
/// exact binary form and arrive at the action as the nearest `f64`.
pub fn amount_to_float(amount: Decimal) -> Result<f64, ActionError> {
    amount
        .to_f64()
        .filter(|f| f.is_finite())
        .ok_or(ActionError::Amount(amount))
}

fn render(confirmation: &str, activity: &str, result: Result<Value, ActionError>) -> String {
    match result {
        Ok(payload) => format!("{confirmation}: {}", describe(&payload)),
        Err(e) => format!("Error {activity}: {e}"),
    }
}

fn describe(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        Value::Null => "(no data)".into(),
        other => other.to_string(),
    }
}
