use crate::{error::KeypomError, primitives::AccountId, Network};

/// Keypom contract deployed on mainnet.
pub const MAINNET_KEYPOM_CONTRACT: &str = "v2.keypom.near";
/// Keypom contract deployed on testnet.
pub const TESTNET_KEYPOM_CONTRACT: &str = "v2.keypom.testnet";

const MAINNET_RPC_URL: &str = "https://rpc.mainnet.near.org";
const TESTNET_RPC_URL: &str = "https://rpc.testnet.near.org";

/// Connection settings resolved for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// The network the session talks to.
    pub network: Network,
    /// The Keypom contract every drop operation is directed at.
    pub keypom_contract_id: AccountId,
    /// JSON-RPC endpoint used for view calls.
    pub rpc_url: String,
}

pub trait DefaultConfig {
    fn from_network(
        network: Network,
        keypom_contract_id: Option<String>,
        rpc_url: Option<String>,
    ) -> Result<Self, KeypomError>
    where
        Self: Sized;
}

impl DefaultConfig for NetworkConfig {
    fn from_network(
        network: Network,
        keypom_contract_id: Option<String>,
        rpc_url: Option<String>,
    ) -> Result<Self, KeypomError> {
        let (default_contract, default_rpc) = match network {
            Network::Mainnet => (MAINNET_KEYPOM_CONTRACT, MAINNET_RPC_URL),
            Network::Testnet => (TESTNET_KEYPOM_CONTRACT, TESTNET_RPC_URL),
        };

        let keypom_contract_id = keypom_contract_id
            .as_deref()
            .unwrap_or(default_contract)
            .parse()?;
        let rpc_url = rpc_url.unwrap_or_else(|| default_rpc.to_string());
        if !rpc_url.starts_with("http://") && !rpc_url.starts_with("https://") {
            return Err(KeypomError::invalid_input(
                "rpc_url",
                "must be an http(s) url",
            ));
        }

        Ok(Self {
            network,
            keypom_contract_id,
            rpc_url,
        })
    }
}
