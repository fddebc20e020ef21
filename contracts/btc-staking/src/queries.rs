use bitcoin::hashes::Hash;
use bitcoin::Txid;

use cosmwasm_std::{Deps, Order, StdResult};
use cw_storage_plus::Bound;

use crate::error::ContractError;
use crate::msg::{
    ActivatedHeightResponse, BtcDelegationsResponse, DelegationStatusResponse,
    DelegationsByFpResponse, FinalityProvidersResponse, VotingPowerResponse,
};
use crate::staking::staking_tx_hash;
use crate::state::config::{Config, Params, CONFIG, PARAMS};
use crate::state::distribution::{
    VotingPowerDistCache, BTC_TIP, DIST_CACHE, LAST_DIST_HEIGHT, POWERS,
};
use crate::state::staking::{
    BtcDelegation, FinalityProvider, ACTIVATED_HEIGHT, DELEGATIONS, FPS, FP_DELEGATIONS,
    HASH_SIZE,
};

pub const MAX_LIMIT: u32 = 30;
pub const DEFAULT_LIMIT: u32 = 10;

pub fn config(deps: Deps) -> StdResult<Config> {
    CONFIG.load(deps.storage)
}

pub fn params(deps: Deps) -> StdResult<Params> {
    PARAMS.load(deps.storage)
}

pub fn finality_provider(
    deps: Deps,
    btc_pk_hex: String,
) -> Result<FinalityProvider, ContractError> {
    FPS.may_load(deps.storage, &btc_pk_hex)?
        .ok_or(ContractError::FinalityProviderNotFound(btc_pk_hex))
}

pub fn finality_providers(
    deps: Deps,
    start_after: Option<String>,
    limit: Option<u32>,
) -> StdResult<FinalityProvidersResponse> {
    let limit = limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT) as usize;
    let start_after = start_after.as_deref();
    let start = start_after.map(Bound::exclusive);
    let fps = FPS
        .range_raw(deps.storage, start, None, Order::Ascending)
        .take(limit)
        .map(|item| item.map(|(_, fp)| fp))
        .collect::<StdResult<Vec<FinalityProvider>>>()?;
    Ok(FinalityProvidersResponse { fps })
}

pub fn delegation(
    deps: Deps,
    staking_tx_hash_hex: String,
) -> Result<BtcDelegation, ContractError> {
    let hash = staking_tx_hash(&staking_tx_hash_hex)?;
    DELEGATIONS
        .may_load(deps.storage, &hash)?
        .ok_or(ContractError::DelegationNotFound(staking_tx_hash_hex))
}

pub fn delegations(
    deps: Deps,
    start_after: Option<String>,
    limit: Option<u32>,
) -> Result<BtcDelegationsResponse, ContractError> {
    let limit = limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT) as usize;
    let start: Option<[u8; HASH_SIZE]> = start_after
        .as_deref()
        .map(staking_tx_hash)
        .transpose()?;
    let start = start.as_ref().map(Bound::exclusive);
    let delegations = DELEGATIONS
        .range_raw(deps.storage, start, None, Order::Ascending)
        .take(limit)
        .map(|item| item.map(|(_, del)| del))
        .collect::<StdResult<Vec<BtcDelegation>>>()?;
    Ok(BtcDelegationsResponse { delegations })
}

pub fn delegations_by_fp(
    deps: Deps,
    btc_pk_hex: String,
) -> Result<DelegationsByFpResponse, ContractError> {
    let hashes = FP_DELEGATIONS
        .may_load(deps.storage, &btc_pk_hex)?
        .unwrap_or_default();
    let hashes = hashes
        .iter()
        .map(|hash| {
            Txid::from_slice(hash)
                .map(|txid| txid.to_string())
                .map_err(|e| ContractError::InvalidTxHash(e.to_string()))
        })
        .collect::<Result<_, _>>()?;
    Ok(DelegationsByFpResponse { hashes })
}

pub fn delegation_status(
    deps: Deps,
    staking_tx_hash_hex: String,
    btc_height: Option<u64>,
) -> Result<DelegationStatusResponse, ContractError> {
    let del = delegation(deps, staking_tx_hash_hex)?;
    let btc_height = match btc_height {
        Some(height) => height,
        None => BTC_TIP.may_load(deps.storage)?.unwrap_or_default(),
    };
    let params = PARAMS.load(deps.storage)?;
    let w = params.checkpoint_finalization_timeout;
    let quorum = params.covenant_quorum;
    Ok(DelegationStatusResponse {
        status: del.status(btc_height, w, quorum),
        voting_power: del.voting_power(btc_height, w, quorum),
        btc_height,
    })
}

pub fn voting_power(
    deps: Deps,
    fp_btc_pk_hex: String,
    height: Option<u64>,
) -> StdResult<VotingPowerResponse> {
    let btc_height = match height {
        Some(height) => height,
        None => LAST_DIST_HEIGHT.may_load(deps.storage)?.unwrap_or_default(),
    };
    let power = POWERS
        .may_load(deps.storage, (btc_height, &fp_btc_pk_hex))?
        .unwrap_or_default();
    Ok(VotingPowerResponse {
        fp_btc_pk_hex,
        btc_height,
        power,
    })
}

pub fn distribution_cache(deps: Deps, height: Option<u64>) -> StdResult<VotingPowerDistCache> {
    let btc_height = match height {
        Some(height) => height,
        None => LAST_DIST_HEIGHT.may_load(deps.storage)?.unwrap_or_default(),
    };
    Ok(DIST_CACHE
        .may_load(deps.storage, btc_height)?
        .unwrap_or_default())
}

pub fn activated_height(deps: Deps) -> StdResult<ActivatedHeightResponse> {
    Ok(ActivatedHeightResponse {
        height: ACTIVATED_HEIGHT.may_load(deps.storage)?.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use cosmwasm_std::testing::mock_dependencies;
    use cosmwasm_std::{Binary, Decimal};

    use crate::msg::{FinalityProviderDescription, ProofOfPossession};

    fn store_fp(storage: &mut dyn cosmwasm_std::Storage, btc_pk_hex: &str) {
        let fp = FinalityProvider {
            addr: "addr".to_string(),
            description: FinalityProviderDescription::default(),
            commission: Decimal::percent(5),
            btc_pk_hex: btc_pk_hex.to_string(),
            pop: ProofOfPossession {
                btc_sig_type: 0,
                btc_sig: Binary::default(),
                btc_sig_address: None,
            },
            slashed_height: 0,
        };
        FPS.save(storage, btc_pk_hex, &fp).unwrap();
    }

    #[test]
    fn test_finality_providers_pagination() {
        let mut deps = mock_dependencies();
        for i in 0..15u8 {
            store_fp(deps.as_mut().storage, &format!("fp_{i:02}"));
        }

        // default page size
        let res = finality_providers(deps.as_ref(), None, None).unwrap();
        assert_eq!(res.fps.len(), DEFAULT_LIMIT as usize);
        assert_eq!(res.fps[0].btc_pk_hex, "fp_00");

        // second page
        let last = res.fps.last().unwrap().btc_pk_hex.clone();
        let res = finality_providers(deps.as_ref(), Some(last), None).unwrap();
        assert_eq!(res.fps.len(), 5);
        assert_eq!(res.fps[0].btc_pk_hex, "fp_10");

        // limit is capped
        let res = finality_providers(deps.as_ref(), None, Some(100)).unwrap();
        assert_eq!(res.fps.len(), 15);
    }

    #[test]
    fn test_finality_provider_not_found() {
        let deps = mock_dependencies();
        let err = finality_provider(deps.as_ref(), "missing".to_string()).unwrap_err();
        assert_eq!(
            err,
            ContractError::FinalityProviderNotFound("missing".to_string())
        );
    }

    #[test]
    fn test_voting_power_defaults() {
        let mut deps = mock_dependencies();

        // no processed height yet
        let res = voting_power(deps.as_ref(), "fp_a".to_string(), None).unwrap();
        assert_eq!(res.btc_height, 0);
        assert_eq!(res.power, 0);

        LAST_DIST_HEIGHT.save(deps.as_mut().storage, &42).unwrap();
        POWERS
            .save(deps.as_mut().storage, (42, "fp_a"), &100)
            .unwrap();
        let res = voting_power(deps.as_ref(), "fp_a".to_string(), None).unwrap();
        assert_eq!(res.btc_height, 42);
        assert_eq!(res.power, 100);

        // explicit height with no row
        let res = voting_power(deps.as_ref(), "fp_a".to_string(), Some(41)).unwrap();
        assert_eq!(res.power, 0);
    }

    #[test]
    fn test_activated_height_default() {
        let deps = mock_dependencies();
        assert_eq!(activated_height(deps.as_ref()).unwrap().height, 0);
    }
}
