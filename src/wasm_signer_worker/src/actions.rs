use crate::types::*;
use serde::{Deserialize, Serialize};

// === ACTION PARAMETERS ===
// Wire-level action shapes as the wallet host sends them: amounts and keys
// as strings, validated here before becoming borsh-ready `NearAction`s.

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ActionParams {
    CreateAccount,
    DeployContract {
        code: Vec<u8>,
    },
    FunctionCall {
        method_name: String,
        /// JSON string of arguments
        args: String,
        gas: String,
        deposit: String,
    },
    Transfer {
        amount: String,
    },
    Stake {
        stake: String,
        public_key: String,
    },
    AddKey {
        public_key: String,
        /// JSON string of the access key
        access_key: String,
    },
    DeleteKey {
        public_key: String,
    },
    DeleteAccount {
        beneficiary_id: String,
    },
}

impl ActionParams {
    /// Validate the params and convert into a concrete `NearAction`.
    pub fn to_action(&self) -> Result<NearAction, String> {
        match self {
            ActionParams::CreateAccount => Ok(NearAction::CreateAccount),

            ActionParams::DeployContract { code } => {
                if code.is_empty() {
                    return Err("Contract code cannot be empty".to_string());
                }
                Ok(NearAction::DeployContract { code: code.clone() })
            }

            ActionParams::FunctionCall {
                method_name,
                args,
                gas,
                deposit,
            } => {
                if method_name.is_empty() {
                    return Err("Method name cannot be empty".to_string());
                }

                let gas_amount = gas
                    .parse::<Gas>()
                    .map_err(|_| "Invalid gas amount".to_string())?;
                let deposit_amount = deposit
                    .parse::<Balance>()
                    .map_err(|_| "Invalid deposit amount".to_string())?;

                Ok(NearAction::FunctionCall(Box::new(FunctionCallAction {
                    method_name: method_name.clone(),
                    args: args.as_bytes().to_vec(),
                    gas: gas_amount,
                    deposit: deposit_amount,
                })))
            }

            ActionParams::Transfer { amount } => {
                if amount.is_empty() {
                    return Err("Transfer amount cannot be empty".to_string());
                }
                let deposit = amount
                    .parse::<Balance>()
                    .map_err(|_| "Invalid transfer amount".to_string())?;
                Ok(NearAction::Transfer { deposit })
            }

            ActionParams::Stake { stake, public_key } => {
                if stake.is_empty() {
                    return Err("Stake amount cannot be empty".to_string());
                }
                let stake_amount = stake
                    .parse::<Balance>()
                    .map_err(|_| "Invalid stake amount".to_string())?;
                let public_key = PublicKey::from_near_format(public_key)?;

                Ok(NearAction::Stake {
                    stake: stake_amount,
                    public_key,
                })
            }

            ActionParams::AddKey {
                public_key,
                access_key,
            } => {
                let public_key = PublicKey::from_near_format(public_key)?;
                let access_key: AccessKey = serde_json::from_str(access_key)
                    .map_err(|e| format!("Invalid access key JSON: {}", e))?;

                Ok(NearAction::AddKey {
                    public_key,
                    access_key,
                })
            }

            ActionParams::DeleteKey { public_key } => {
                let public_key = PublicKey::from_near_format(public_key)?;
                Ok(NearAction::DeleteKey { public_key })
            }

            ActionParams::DeleteAccount { beneficiary_id } => {
                let beneficiary_id: AccountId = beneficiary_id.parse()?;
                Ok(NearAction::DeleteAccount { beneficiary_id })
            }
        }
    }
}

/// Validate and build all actions for one transaction, in input order.
pub fn build_actions_from_params(action_params: &[ActionParams]) -> Result<Vec<NearAction>, String> {
    let mut actions = Vec::with_capacity(action_params.len());
    for (i, params) in action_params.iter().enumerate() {
        let action = params
            .to_action()
            .map_err(|e| format!("Action {}: {}", i, e))?;
        actions.push(action);
    }
    Ok(actions)
}
