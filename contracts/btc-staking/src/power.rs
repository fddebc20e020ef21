//! Voting power distribution: folds queued power events into a per-BTC-height
//! cache of finality provider powers, and expires delegations whose time-lock
//! window closes.

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use bitcoin::hashes::Hash;
use bitcoin::Txid;

use cosmwasm_std::{DepsMut, Env, Order, Response, StdResult, Storage};
use cw_storage_plus::Bound;

use crate::error::ContractError;
use crate::state::config::{Params, PARAMS};
use crate::state::distribution::{
    record_event, BtcDelDistInfo, FinalityProviderDistInfo, PowerDistUpdateEvent,
    VotingPowerDistCache, BTC_HEIGHTS, BTC_TIP, DIST_CACHE, EVENTS, EXPIRY_INDEX,
    LAST_DIST_HEIGHT, LAST_PROCESSED_BTC_HEIGHT, POWERS,
};
use crate::state::staking::{BTCDelegationStatus, ACTIVATED_HEIGHT, DELEGATIONS};

/// handle_begin_block records the reported BTC tip, expires delegations whose
/// remaining time-lock no longer counts, and recomputes the voting power
/// distribution at the reported height
pub fn handle_begin_block(
    deps: DepsMut,
    env: &Env,
    btc_height: u64,
) -> Result<Response, ContractError> {
    BTC_HEIGHTS.save(deps.storage, env.block.height, &btc_height)?;
    BTC_TIP.save(deps.storage, &btc_height)?;

    process_expired_delegations(deps.storage, btc_height)?;

    let params = PARAMS.load(deps.storage)?;
    update_power_dist(deps.storage, btc_height, env.block.height, &params)?;

    Ok(Response::new())
}

pub fn handle_end_block() -> Result<Response, ContractError> {
    Ok(Response::new())
}

/// process_expired_delegations drains the expiry index up to `btc_height`,
/// queueing an expiry event for each drained delegation
fn process_expired_delegations(
    storage: &mut dyn Storage,
    btc_height: u64,
) -> Result<(), ContractError> {
    let expired: Vec<(u64, Vec<u8>)> = EXPIRY_INDEX
        .range(storage, None, None, Order::Ascending)
        .take_while(|item| match item {
            Ok(((height, _), _)) => *height <= btc_height,
            Err(_) => true,
        })
        .map(|item| item.map(|((height, hash), _)| (height, hash)))
        .collect::<StdResult<_>>()?;

    for (height, hash) in expired {
        let txid = Txid::from_slice(&hash)
            .map_err(|e| ContractError::InvalidTxHash(e.to_string()))?;
        record_event(
            storage,
            btc_height,
            &PowerDistUpdateEvent::DelegationStateChange {
                staking_tx_hash: txid.to_string(),
                new_state: BTCDelegationStatus::Expired,
            },
        )?;
        EXPIRY_INDEX.remove(storage, (height, &hash));
    }

    Ok(())
}

/// update_power_dist folds all still-queued events up to `btc_height` into
/// the last cache and persists the result under `btc_height`. Events are
/// queued under the tip of the block that produced them, which the begin
/// blocker has already processed by the time they land, so the scan starts
/// from the bottom; consumed events are removed only after the new cache is
/// persisted, so a partial run can be replayed without double counting.
/// Re-runs for heights below the last processed one are no-ops
pub(crate) fn update_power_dist(
    storage: &mut dyn Storage,
    btc_height: u64,
    chain_height: u64,
    params: &Params,
) -> Result<(), ContractError> {
    let last_processed = LAST_PROCESSED_BTC_HEIGHT
        .may_load(storage)?
        .unwrap_or_default();
    if btc_height < last_processed {
        return Ok(());
    }

    let events: Vec<((u64, u64), PowerDistUpdateEvent)> = EVENTS
        .range(
            storage,
            None,
            Some(Bound::inclusive((btc_height, u64::MAX))),
            Order::Ascending,
        )
        .collect::<StdResult<_>>()?;

    let prev_cache = match LAST_DIST_HEIGHT.may_load(storage)? {
        Some(height) => DIST_CACHE
            .may_load(storage, height)?
            .unwrap_or_default(),
        None => VotingPowerDistCache::default(),
    };

    let new_cache = if events.is_empty() {
        // Nothing changed, carry the last distribution forward
        prev_cache
    } else {
        rebuild_cache(storage, &prev_cache, &events, params)?
    };

    DIST_CACHE.save(storage, btc_height, &new_cache)?;
    for fp in &new_cache.finality_providers {
        POWERS.save(storage, (btc_height, &fp.btc_pk_hex), &fp.total_voting_power)?;
    }
    LAST_DIST_HEIGHT.save(storage, &btc_height)?;

    if new_cache.total_voting_power > 0 && ACTIVATED_HEIGHT.may_load(storage)?.is_none() {
        ACTIVATED_HEIGHT.save(storage, &chain_height)?;
    }

    // The cache is durable, the events can now be dropped
    for (key, _) in &events {
        EVENTS.remove(storage, *key);
    }
    LAST_PROCESSED_BTC_HEIGHT.save(storage, &btc_height)?;

    Ok(())
}

fn rebuild_cache(
    storage: &dyn Storage,
    prev_cache: &VotingPowerDistCache,
    events: &[((u64, u64), PowerDistUpdateEvent)],
    params: &Params,
) -> Result<VotingPowerDistCache, ContractError> {
    // Newly activated delegations per finality provider, delegations that no
    // longer count, and providers slashed in this window
    let mut activated: BTreeMap<String, Vec<BtcDelDistInfo>> = BTreeMap::new();
    let mut unbonded: HashSet<String> = HashSet::new();
    let mut slashed: HashSet<String> = HashSet::new();

    for (_, event) in events {
        match event {
            PowerDistUpdateEvent::DelegationStateChange {
                staking_tx_hash,
                new_state,
            } => match new_state {
                BTCDelegationStatus::Active => {
                    let txid = Txid::from_str(staking_tx_hash)
                        .map_err(|e| ContractError::InvalidTxHash(e.to_string()))?;
                    let hash = txid.to_byte_array();
                    let del = DELEGATIONS.load(storage, &hash)?;
                    for fp_pk_hex in &del.fp_btc_pk_list {
                        activated.entry(fp_pk_hex.clone()).or_default().push(
                            BtcDelDistInfo {
                                staking_tx_hash: staking_tx_hash.clone(),
                                voting_power: del.total_sat,
                            },
                        );
                    }
                }
                BTCDelegationStatus::Unbonding
                | BTCDelegationStatus::Unbonded
                | BTCDelegationStatus::Expired => {
                    unbonded.insert(staking_tx_hash.clone());
                }
                BTCDelegationStatus::Pending => {}
            },
            PowerDistUpdateEvent::SlashedFp { fp_btc_pk_hex } => {
                slashed.insert(fp_btc_pk_hex.clone());
            }
        }
    }

    let mut fps: Vec<FinalityProviderDistInfo> = Vec::new();

    // Carry over existing providers in their previous order, dropping
    // delegations that stopped counting and folding in the new ones
    for fp in &prev_cache.finality_providers {
        if slashed.contains(&fp.btc_pk_hex) {
            continue;
        }
        let mut btc_dels: Vec<BtcDelDistInfo> = fp
            .btc_dels
            .iter()
            .filter(|del| !unbonded.contains(&del.staking_tx_hash))
            .cloned()
            .collect();
        if let Some(new_dels) = activated.remove(&fp.btc_pk_hex) {
            btc_dels.extend(
                new_dels
                    .into_iter()
                    .filter(|del| !unbonded.contains(&del.staking_tx_hash)),
            );
        }
        let total_voting_power = btc_dels.iter().map(|del| del.voting_power).sum();
        if total_voting_power > 0 {
            fps.push(FinalityProviderDistInfo {
                btc_pk_hex: fp.btc_pk_hex.clone(),
                total_voting_power,
                btc_dels,
            });
        }
    }

    // Providers entering the distribution for the first time
    for (fp_btc_pk_hex, new_dels) in activated {
        if slashed.contains(&fp_btc_pk_hex) {
            continue;
        }
        let btc_dels: Vec<BtcDelDistInfo> = new_dels
            .into_iter()
            .filter(|del| !unbonded.contains(&del.staking_tx_hash))
            .collect();
        let total_voting_power = btc_dels.iter().map(|del| del.voting_power).sum();
        if total_voting_power > 0 {
            fps.push(FinalityProviderDistInfo {
                btc_pk_hex: fp_btc_pk_hex,
                total_voting_power,
                btc_dels,
            });
        }
    }

    // Keep the top providers by power; the sort is stable so equal powers
    // retain their previous relative order
    fps.sort_by(|a, b| b.total_voting_power.cmp(&a.total_voting_power));
    fps.truncate(params.max_active_finality_providers as usize);
    let total_voting_power = fps.iter().map(|fp| fp.total_voting_power).sum();

    Ok(VotingPowerDistCache {
        total_voting_power,
        finality_providers: fps,
    })
}
