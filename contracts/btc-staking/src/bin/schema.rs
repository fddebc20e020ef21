use cosmwasm_schema::write_api;
use cosmwasm_std::Empty;

use btc_staking::msg::{ExecuteMsg, InstantiateMsg, QueryMsg};

fn main() {
    write_api! {
        instantiate: InstantiateMsg,
        query: QueryMsg,
        execute: ExecuteMsg,
        migrate: Empty,
    }
}
