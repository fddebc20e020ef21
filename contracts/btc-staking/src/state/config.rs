use cosmwasm_schema::cw_serde;
use cosmwasm_std::Decimal;

use cw_controllers::Admin;
use cw_storage_plus::Item;
use derivative::Derivative;

pub(crate) const CONFIG: Item<Config> = Item::new("config");
pub(crate) const PARAMS: Item<Params> = Item::new("params");
/// Storage for admin
pub(crate) const ADMIN: Admin = Admin::new("admin");

/// Bitcoin network the staking scripts and addresses are checked against
#[cw_serde]
#[derive(Copy)]
pub enum Network {
    Mainnet,
    Testnet,
    Signet,
    Regtest,
}

impl From<Network> for bitcoin::Network {
    fn from(network: Network) -> Self {
        match network {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Signet => bitcoin::Network::Signet,
            Network::Regtest => bitcoin::Network::Regtest,
        }
    }
}

/// Config is the instantiation-time configuration of the contract
#[cw_serde]
pub struct Config {
    pub denom: String,
}

/// Params define the governance-selectable BTC staking parameters
#[cw_serde]
#[derive(Derivative)]
#[derivative(Default)]
pub struct Params {
    /// `covenant_pks` is the list of public keys held by the covenant committee.
    /// Each PK follows encoding in BIP-340 spec on Bitcoin
    pub covenant_pks: Vec<String>,
    /// `covenant_quorum` is the minimum number of signatures needed for the covenant
    /// multi-signature
    pub covenant_quorum: u32,
    /// `btc_network` is the network the BTC staking protocol is running on
    #[derivative(Default(value = "Network::Regtest"))]
    pub btc_network: Network,
    /// `btc_confirmation_depth` is the number of BTC blocks a staking tx must be
    /// buried under the reported tip before the delegation can be created (`k`)
    #[derivative(Default(value = "10"))]
    pub btc_confirmation_depth: u64,
    /// `checkpoint_finalization_timeout` is the number of BTC blocks the staking
    /// time-lock must leave past the tip for the delegation to count (`w`)
    #[derivative(Default(value = "100"))]
    pub checkpoint_finalization_timeout: u64,
    /// `min_commission_rate` is the chain-wide minimum commission rate that a
    /// finality provider can charge their delegators
    pub min_commission_rate: Decimal,
    /// `min_unbonding_time_blocks` is the minimum time-lock of the unbonding output
    #[derivative(Default(value = "101"))]
    pub min_unbonding_time_blocks: u32,
    /// `max_active_finality_providers` is the maximum number of finality providers
    /// kept in the voting power distribution
    #[derivative(Default(value = "100"))]
    pub max_active_finality_providers: u32,
    /// `slashing_address` is the address that the slashed BTC goes to, in string
    /// format on Bitcoin
    pub slashing_address: String,
    /// `min_slashing_tx_fee_sat` is the minimum amount of tx fee (quantified in
    /// Satoshi) needed for the pre-signed slashing tx
    #[derivative(Default(value = "1000"))]
    pub min_slashing_tx_fee_sat: u64,
    /// `slashing_rate` determines the portion of the staked amount to be slashed,
    /// expressed as a decimal (e.g. 0.5 for 50%).
    #[derivative(Default(value = "String::from(\"0.1\")"))]
    pub slashing_rate: String,
}
