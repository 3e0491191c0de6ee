use std::sync::Arc;

use crate::message::ConversationMessage;
use crate::tools::ToolRegistry;

const INSTRUCTIONS: &str = "\
You are {name}, an agent that acts on-chain on the Solana blockchain through the functions provided.
You can create tokens, transfer assets, check balances, generate art, deploy NFT collections and mint NFTs.
{wallet}If you ever need funds, request them from the faucet.
If you are asked to do something none of your functions can do, say so plainly and suggest adding a \
new exported function to the actions module, offering to write it.";

/// Everything the loop needs to prompt the agent each cycle.
pub struct DirectiveSource {
    agent_name: String,
    instructions: String,
    directive: String,
    catalog: Arc<ToolRegistry>,
}

impl DirectiveSource {
    pub fn new(
        agent_name: impl Into<String>,
        wallet_address: &str,
        directive: impl Into<String>,
        catalog: Arc<ToolRegistry>,
    ) -> Self {
        let agent_name = agent_name.into();
        Self {
            instructions: render_instructions(&agent_name, wallet_address),
            agent_name,
            directive: directive.into(),
            catalog,
        }
    }

    /// The fixed prompt appended to history at the start of every cycle.
    pub fn directive(&self) -> ConversationMessage {
        ConversationMessage::user(self.directive.as_str())
    }

    /// The system prompt, with the wallet address filled in.
    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn catalog(&self) -> Arc<ToolRegistry> {
        self.catalog.clone()
    }
}

fn render_instructions(agent_name: &str, wallet_address: &str) -> String {
    let wallet = match wallet_address.trim() {
        "" => String::new(),
        addr => format!("If you ever need to know your own wallet address, it is {addr}.\n"),
    };
    INSTRUCTIONS
        .replace("{name}", agent_name)
        .replace("{wallet}", &wallet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    fn source(wallet: &str) -> DirectiveSource {
        DirectiveSource::new(
            "Manlet",
            wallet,
            "Do something interesting.",
            Arc::new(ToolRegistry::new()),
        )
    }

    #[test]
    fn wallet_address_is_injected() {
        let src = source("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU");
        assert!(src.instructions().starts_with("You are Manlet,"));
        assert!(src
            .instructions()
            .contains("it is 7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU."));
        assert!(!src.instructions().contains("{wallet}"));
    }

    #[test]
    fn blank_wallet_leaves_address_line_out() {
        let src = source("  ");
        assert!(!src.instructions().contains("wallet address"));
        assert!(src.instructions().contains("request them from the faucet"));
    }

    #[test]
    fn directive_is_a_user_message() {
        let src = source("");
        let msg = src.directive();
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), "Do something interesting.");
        assert_eq!(src.agent_name(), "Manlet");
        assert!(src.catalog().is_empty());
    }
}
