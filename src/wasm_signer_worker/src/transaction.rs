use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256};

use crate::types::*;

/// Build a transaction with multiple actions.
pub fn build_transaction_with_actions(
    signer_account_id: &str,
    receiver_account_id: &str,
    nonce: u64,
    block_hash_bytes: &[u8],
    private_key: &SigningKey,
    actions: Vec<NearAction>,
) -> Result<Transaction, String> {
    let signer_id: AccountId = signer_account_id
        .parse()
        .map_err(|e| format!("Invalid signer account: {}", e))?;
    let receiver_id: AccountId = receiver_account_id
        .parse()
        .map_err(|e| format!("Invalid receiver account: {}", e))?;

    if block_hash_bytes.len() != 32 {
        return Err("Block hash must be 32 bytes".to_string());
    }
    let mut block_hash_array = [0u8; 32];
    block_hash_array.copy_from_slice(block_hash_bytes);
    let block_hash = CryptoHash::from_bytes(block_hash_array);

    let public_key = PublicKey::from_ed25519_bytes(&private_key.verifying_key().to_bytes());

    Ok(Transaction {
        signer_id,
        public_key,
        nonce,
        receiver_id,
        block_hash,
        actions,
    })
}

/// Sign an already-built transaction and return the borsh-serialized
/// `SignedTransaction` bytes.
pub fn sign_transaction(
    transaction: Transaction,
    private_key: &SigningKey,
) -> Result<Vec<u8>, String> {
    let (transaction_hash, _size) = transaction.get_hash_and_size();

    let signature_bytes = private_key.sign(&transaction_hash.0);
    let signature = Signature::from_ed25519_bytes(&signature_bytes.to_bytes());

    let signed_transaction = SignedTransaction::new(signature, transaction);

    borsh::to_vec(&signed_transaction)
        .map_err(|e| format!("Signed transaction serialization failed: {}", e))
}

/// SHA-256 of the signed transaction bytes, base58-encoded the way NEAR
/// explorers present transaction ids.
pub fn calculate_transaction_hash(signed_tx_bytes: &[u8]) -> String {
    let digest = Sha256::digest(signed_tx_bytes);
    bs58::encode(digest).into_string()
}
