#[cfg(not(feature = "library"))]
use cosmwasm_std::entry_point;
use cosmwasm_std::{
    to_json_binary, Deps, DepsMut, Empty, Env, MessageInfo, QueryResponse, Response, StdResult,
};
use cw2::set_contract_version;
use cw_utils::{maybe_addr, nonpayable};

use crate::error::ContractError;
use crate::msg::{ExecuteMsg, InstantiateMsg, QueryMsg, SudoMsg};
use crate::power::{handle_begin_block, handle_end_block};
use crate::queries;
use crate::staking::{
    handle_add_covenant_sigs, handle_create_delegation, handle_register_finality_provider,
    handle_request_unbonding, handle_selective_slashing_evidence,
};
use crate::state::config::{Config, ADMIN, CONFIG, PARAMS};

pub const CONTRACT_NAME: &str = env!("CARGO_PKG_NAME");
pub const CONTRACT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg_attr(not(feature = "library"), entry_point)]
pub fn instantiate(
    mut deps: DepsMut,
    _env: Env,
    info: MessageInfo,
    msg: InstantiateMsg,
) -> Result<Response, ContractError> {
    nonpayable(&info)?;
    let denom = deps.querier.query_bonded_denom()?;
    let config = Config { denom };
    CONFIG.save(deps.storage, &config)?;

    let api = deps.api;
    ADMIN.set(deps.branch(), maybe_addr(api, msg.admin.clone())?)?;

    let params = msg.params.unwrap_or_default();
    PARAMS.save(deps.storage, &params)?;

    set_contract_version(deps.storage, CONTRACT_NAME, CONTRACT_VERSION)?;
    Ok(Response::new().add_attribute("action", "instantiate"))
}

#[cfg_attr(not(feature = "library"), entry_point)]
pub fn execute(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    msg: ExecuteMsg,
) -> Result<Response, ContractError> {
    let api = deps.api;
    match msg {
        ExecuteMsg::UpdateAdmin { admin } => ADMIN
            .execute_update_admin(deps, info, maybe_addr(api, admin)?)
            .map_err(Into::into),
        ExecuteMsg::RegisterFinalityProvider { fp } => {
            handle_register_finality_provider(deps, fp)
        }
        ExecuteMsg::CreateDelegation { delegation } => {
            handle_create_delegation(deps, delegation)
        }
        ExecuteMsg::AddCovenantSignatures {
            staking_tx_hash,
            cov_pk_hex,
            slashing_sigs,
            unbonding_sig,
            unbonding_slashing_sigs,
        } => handle_add_covenant_sigs(
            deps,
            &staking_tx_hash,
            cov_pk_hex,
            slashing_sigs,
            unbonding_sig,
            unbonding_slashing_sigs,
        ),
        ExecuteMsg::RequestUnbonding {
            staking_tx_hash,
            unbonding_tx_sig,
        } => handle_request_unbonding(deps, &staking_tx_hash, unbonding_tx_sig),
        ExecuteMsg::SubmitSelectiveSlashingEvidence {
            staking_tx_hash,
            recovered_fp_btc_sk_hex,
        } => handle_selective_slashing_evidence(
            deps,
            &env,
            &staking_tx_hash,
            &recovered_fp_btc_sk_hex,
        ),
    }
}

#[cfg_attr(not(feature = "library"), entry_point)]
pub fn sudo(deps: DepsMut, env: Env, msg: SudoMsg) -> Result<Response, ContractError> {
    match msg {
        SudoMsg::BeginBlock { btc_height } => handle_begin_block(deps, &env, btc_height),
        SudoMsg::EndBlock {} => handle_end_block(),
    }
}

#[cfg_attr(not(feature = "library"), entry_point)]
pub fn query(deps: Deps, _env: Env, msg: QueryMsg) -> Result<QueryResponse, ContractError> {
    match msg {
        QueryMsg::Config {} => Ok(to_json_binary(&queries::config(deps)?)?),
        QueryMsg::Params {} => Ok(to_json_binary(&queries::params(deps)?)?),
        QueryMsg::Admin {} => to_json_binary(&ADMIN.query_admin(deps)?).map_err(Into::into),
        QueryMsg::FinalityProvider { btc_pk_hex } => Ok(to_json_binary(
            &queries::finality_provider(deps, btc_pk_hex)?,
        )?),
        QueryMsg::FinalityProviders { start_after, limit } => Ok(to_json_binary(
            &queries::finality_providers(deps, start_after, limit)?,
        )?),
        QueryMsg::Delegation {
            staking_tx_hash_hex,
        } => Ok(to_json_binary(&queries::delegation(
            deps,
            staking_tx_hash_hex,
        )?)?),
        QueryMsg::Delegations { start_after, limit } => Ok(to_json_binary(
            &queries::delegations(deps, start_after, limit)?,
        )?),
        QueryMsg::DelegationsByFp { btc_pk_hex } => Ok(to_json_binary(
            &queries::delegations_by_fp(deps, btc_pk_hex)?,
        )?),
        QueryMsg::DelegationStatus {
            staking_tx_hash_hex,
            btc_height,
        } => Ok(to_json_binary(&queries::delegation_status(
            deps,
            staking_tx_hash_hex,
            btc_height,
        )?)?),
        QueryMsg::VotingPower {
            fp_btc_pk_hex,
            height,
        } => Ok(to_json_binary(&queries::voting_power(
            deps,
            fp_btc_pk_hex,
            height,
        )?)?),
        QueryMsg::DistributionCache { height } => Ok(to_json_binary(
            &queries::distribution_cache(deps, height)?,
        )?),
        QueryMsg::ActivatedHeight {} => Ok(to_json_binary(&queries::activated_height(deps)?)?),
    }
}

#[cfg_attr(not(feature = "library"), entry_point)]
pub fn migrate(_deps: DepsMut, _env: Env, _msg: Empty) -> StdResult<Response> {
    Ok(Response::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    use cosmwasm_std::testing::{message_info, mock_dependencies, mock_env};
    use cosmwasm_std::from_json;
    use cw_controllers::AdminResponse;

    const CREATOR: &str = "creator";
    const INIT_ADMIN: &str = "initial_admin";
    const NEW_ADMIN: &str = "new_admin";

    #[test]
    fn instantiate_without_admin() {
        let mut deps = mock_dependencies();

        let msg = InstantiateMsg {
            params: None,
            admin: None,
        };

        let info = message_info(&deps.api.addr_make(CREATOR), &[]);

        let res = instantiate(deps.as_mut(), mock_env(), info, msg).unwrap();
        assert_eq!(0, res.messages.len());

        // no admin was set
        let res = ADMIN.query_admin(deps.as_ref()).unwrap();
        assert_eq!(None, res.admin);

        // default params are in place
        let params = queries::params(deps.as_ref()).unwrap();
        assert_eq!(params, crate::state::config::Params::default());
    }

    #[test]
    fn instantiate_with_admin() {
        let mut deps = mock_dependencies();
        let init_admin = deps.api.addr_make(INIT_ADMIN);

        let msg = InstantiateMsg {
            params: None,
            admin: Some(init_admin.to_string()),
        };

        let info = message_info(&deps.api.addr_make(CREATOR), &[]);

        let res = instantiate(deps.as_mut(), mock_env(), info, msg).unwrap();
        assert_eq!(0, res.messages.len());

        ADMIN.assert_admin(deps.as_ref(), &init_admin).unwrap();

        // ensure the admin is queryable as well
        let res = query(deps.as_ref(), mock_env(), QueryMsg::Admin {}).unwrap();
        let admin: AdminResponse = from_json(res).unwrap();
        assert_eq!(admin.admin.unwrap(), init_admin.as_str())
    }

    #[test]
    fn test_update_admin() {
        let mut deps = mock_dependencies();
        let init_admin = deps.api.addr_make(INIT_ADMIN);
        let new_admin = deps.api.addr_make(NEW_ADMIN);

        let instantiate_msg = InstantiateMsg {
            params: None,
            admin: Some(init_admin.to_string()),
        };

        let info = message_info(&deps.api.addr_make(CREATOR), &[]);

        instantiate(deps.as_mut(), mock_env(), info.clone(), instantiate_msg).unwrap();
        ADMIN.assert_admin(deps.as_ref(), &init_admin).unwrap();

        let update_admin_msg = ExecuteMsg::UpdateAdmin {
            admin: Some(new_admin.to_string()),
        };

        // a non-admin cannot update the admin
        let non_admin_info = message_info(&deps.api.addr_make("non_admin"), &[]);
        let err = execute(
            deps.as_mut(),
            mock_env(),
            non_admin_info,
            update_admin_msg.clone(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ContractError::Admin(cw_controllers::AdminError::NotAdmin {})
        );

        let admin_info = message_info(&init_admin, &[]);
        let res = execute(deps.as_mut(), mock_env(), admin_info, update_admin_msg).unwrap();
        assert_eq!(0, res.messages.len());

        ADMIN.assert_admin(deps.as_ref(), &new_admin).unwrap();
    }

    #[test]
    fn test_begin_block_records_tip() {
        let mut deps = mock_dependencies();
        let msg = InstantiateMsg {
            params: None,
            admin: None,
        };
        let info = message_info(&deps.api.addr_make(CREATOR), &[]);
        instantiate(deps.as_mut(), mock_env(), info, msg).unwrap();

        sudo(
            deps.as_mut(),
            mock_env(),
            SudoMsg::BeginBlock { btc_height: 500 },
        )
        .unwrap();

        // no voting power yet, so the protocol is not activated
        let res = query(deps.as_ref(), mock_env(), QueryMsg::ActivatedHeight {}).unwrap();
        let activated: crate::msg::ActivatedHeightResponse = from_json(res).unwrap();
        assert_eq!(activated.height, 0);

        sudo(deps.as_mut(), mock_env(), SudoMsg::EndBlock {}).unwrap();
    }
}
