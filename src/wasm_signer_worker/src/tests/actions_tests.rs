use crate::actions::{build_actions_from_params, ActionParams};
use crate::types::NearAction;

#[test]
fn transfer_requires_parseable_amount() {
    let ok = ActionParams::Transfer {
        amount: "1000000000000000000000000".to_string(),
    };
    assert!(matches!(
        ok.to_action().unwrap(),
        NearAction::Transfer { deposit } if deposit == 1_000_000_000_000_000_000_000_000
    ));

    let empty = ActionParams::Transfer {
        amount: String::new(),
    };
    assert!(empty.to_action().is_err());

    let junk = ActionParams::Transfer {
        amount: "one near".to_string(),
    };
    assert!(junk.to_action().is_err());
}

#[test]
fn function_call_requires_method_name() {
    let missing = ActionParams::FunctionCall {
        method_name: String::new(),
        args: "{}".to_string(),
        gas: "30000000000000".to_string(),
        deposit: "0".to_string(),
    };
    assert!(missing.to_action().is_err());

    let ok = ActionParams::FunctionCall {
        method_name: "set_greeting".to_string(),
        args: r#"{"greeting":"hello"}"#.to_string(),
        gas: "30000000000000".to_string(),
        deposit: "0".to_string(),
    };
    match ok.to_action().unwrap() {
        NearAction::FunctionCall(fc) => {
            assert_eq!(fc.method_name, "set_greeting");
            assert_eq!(fc.gas, 30_000_000_000_000);
            assert_eq!(fc.args, br#"{"greeting":"hello"}"#.to_vec());
        }
        other => panic!("unexpected action: {:?}", other),
    }
}

#[test]
fn add_key_parses_near_style_access_key_json() {
    let full_access = ActionParams::AddKey {
        public_key: format!("ed25519:{}", bs58::encode([1u8; 32]).into_string()),
        access_key: r#"{"nonce":0,"permission":{"FullAccess":{}}}"#.to_string(),
    };
    assert!(matches!(
        full_access.to_action().unwrap(),
        NearAction::AddKey { .. }
    ));

    let function_call = ActionParams::AddKey {
        public_key: format!("ed25519:{}", bs58::encode([2u8; 32]).into_string()),
        access_key: r#"{"nonce":0,"permission":{"FunctionCall":{"allowance":"250000000000000000000000","receiverId":"app.testnet","methodNames":["set_greeting"]}}}"#.to_string(),
    };
    assert!(function_call.to_action().is_ok());
}

#[test]
fn public_keys_must_be_ed25519_prefixed() {
    let bad = ActionParams::DeleteKey {
        public_key: "secp256k1:abcdef".to_string(),
    };
    assert!(bad.to_action().is_err());

    let wrong_len = ActionParams::DeleteKey {
        public_key: format!("ed25519:{}", bs58::encode([3u8; 16]).into_string()),
    };
    assert!(wrong_len.to_action().is_err());
}

#[test]
fn batch_build_reports_failing_action_index() {
    let params = vec![
        ActionParams::Transfer {
            amount: "1".to_string(),
        },
        ActionParams::Transfer {
            amount: "bogus".to_string(),
        },
    ];
    let err = build_actions_from_params(&params).unwrap_err();
    assert!(err.starts_with("Action 1:"), "unexpected error: {}", err);
}

#[test]
fn action_params_wire_format_uses_type_tag() {
    let json = r#"{"type":"Transfer","amount":"5"}"#;
    let parsed: ActionParams = serde_json::from_str(json).unwrap();
    assert_eq!(
        parsed,
        ActionParams::Transfer {
            amount: "5".to_string()
        }
    );
}
