use cosmwasm_schema::cw_serde;
use cosmwasm_std::{StdResult, Storage};
use cw_storage_plus::{Item, Map};

use crate::state::staking::BTCDelegationStatus;

/// The voting power distribution at a processed BTC height.
/// Finality providers are sorted by descending power and capped to the
/// configured maximum; slashed and powerless providers are absent
#[cw_serde]
#[derive(Default)]
pub struct VotingPowerDistCache {
    pub total_voting_power: u64,
    pub finality_providers: Vec<FinalityProviderDistInfo>,
}

#[cw_serde]
pub struct FinalityProviderDistInfo {
    pub btc_pk_hex: String,
    pub total_voting_power: u64,
    pub btc_dels: Vec<BtcDelDistInfo>,
}

#[cw_serde]
pub struct BtcDelDistInfo {
    /// The (reversed) staking tx hash, in hex
    pub staking_tx_hash: String,
    pub voting_power: u64,
}

/// PowerDistUpdateEvent is a power-affecting event, queued under the BTC
/// height it takes effect at and drained when that height is processed
#[cw_serde]
pub enum PowerDistUpdateEvent {
    DelegationStateChange {
        staking_tx_hash: String,
        new_state: BTCDelegationStatus,
    },
    SlashedFp {
        fp_btc_pk_hex: String,
    },
}

/// Pending power distribution events by (BTC height, per-height index)
pub(crate) const EVENTS: Map<(u64, u64), PowerDistUpdateEvent> = Map::new("power_events");
/// Next event index per BTC height
pub(crate) const NEXT_EVENT_INDEX: Map<u64, u64> = Map::new("power_events__idx");
/// Last BTC height whose events have been folded into the cache
pub(crate) const LAST_PROCESSED_BTC_HEIGHT: Item<u64> = Item::new("last_processed_btc_height");

/// Voting power distribution caches by processed BTC height
pub(crate) const DIST_CACHE: Map<u64, VotingPowerDistCache> = Map::new("dist_cache");
/// Last BTC height with a persisted cache
pub(crate) const LAST_DIST_HEIGHT: Item<u64> = Item::new("last_dist_height");
/// Per-height voting power rows by (BTC height, fp BTC pk hex)
pub(crate) const POWERS: Map<(u64, &str), u64> = Map::new("fp_powers");

/// The BTC tip height reported by the last begin block
pub(crate) const BTC_TIP: Item<u64> = Item::new("btc_tip");
/// BTC tip heights by chain height
pub(crate) const BTC_HEIGHTS: Map<u64, u64> = Map::new("btc_heights");

/// Index of delegations by the first BTC height at which their time-lock no
/// longer counts, i.e. `end_height - w + 1`. Drained on begin block
pub(crate) const EXPIRY_INDEX: Map<(u64, &[u8]), ()> = Map::new("expiry_index");

/// record_event queues a power distribution event under the given BTC height
pub fn record_event(
    storage: &mut dyn Storage,
    btc_height: u64,
    event: &PowerDistUpdateEvent,
) -> StdResult<()> {
    let index = NEXT_EVENT_INDEX
        .may_load(storage, btc_height)?
        .unwrap_or_default();
    EVENTS.save(storage, (btc_height, index), event)?;
    NEXT_EVENT_INDEX.save(storage, btc_height, &(index + 1))
}
