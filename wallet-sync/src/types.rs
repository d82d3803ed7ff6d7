//! Payload shapes exchanged with wallet collaborators.
//!
//! These are plain data. Amounts are in atoms (see [`crate::units`]).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Direction of a transaction relative to the wallet.
///
/// Serialized as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Direction {
    Sent = 0,
    Received = 1,
    Transferred = 2,
}

impl From<Direction> for i32 {
    fn from(direction: Direction) -> Self {
        direction as i32
    }
}

impl TryFrom<i32> for Direction {
    type Error = InvalidDirection;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Direction::Sent),
            1 => Ok(Direction::Received),
            2 => Ok(Direction::Transferred),
            other => Err(InvalidDirection(other)),
        }
    }
}

/// An integer that is not a [`Direction`] code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidDirection(pub i32);

impl fmt::Display for InvalidDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid transaction direction {}", self.0)
    }
}

/// A wallet transaction as reported to listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    /// Serialized transaction bytes.
    #[serde(rename = "transaction")]
    pub raw: Vec<u8>,
    pub fee: i64,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub tx_type: String,
    pub amount: i64,
    pub status: String,
    pub height: i32,
    pub direction: Direction,
    pub debits: Vec<TransactionDebit>,
    pub credits: Vec<TransactionCredit>,
}

impl Transaction {
    /// Whether the transaction has been mined.
    pub fn is_confirmed(&self) -> bool {
        self.height > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDebit {
    pub index: i32,
    pub previous_account: i32,
    pub previous_amount: i64,
    pub account_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionCredit {
    pub index: i32,
    pub account: i32,
    pub internal: bool,
    pub amount: i64,
    pub address: String,
}

/// Wallet balance breakdown, all in atoms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub total: i64,
    pub spendable: i64,
    pub immature_reward: i64,
    pub immature_stake_generation: i64,
    pub locked_by_tickets: i64,
    pub voting_authority: i64,
    pub unconfirmed: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub number: i32,
    pub name: String,
    pub balance: Balance,
    pub total_balance: i64,
    pub external_key_count: i32,
    pub internal_key_count: i32,
    pub imported_key_count: i32,
}

/// Account listing together with the chain tip it was taken at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accounts {
    pub accounts: Vec<Account>,
    pub current_block_hash: Vec<u8>,
    pub current_block_height: i32,
}

impl Accounts {
    pub fn count(&self) -> usize {
        self.accounts.len()
    }
}

/// Transaction built but not yet signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub unsigned_transaction: Vec<u8>,
    pub estimated_signed_size: usize,
    /// Index of the change output, if there is one.
    pub change_index: Option<usize>,
    pub total_output_amount: i64,
    pub total_previous_output_amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedTransaction {
    pub hash: String,
    #[serde(rename = "type")]
    pub tx_type: String,
    pub version: i32,
    pub lock_time: i32,
    pub expiry: i32,
    pub inputs: Vec<DecodedInput>,
    pub outputs: Vec<DecodedOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedInput {
    pub previous_transaction_hash: String,
    pub previous_transaction_index: i32,
    pub sequence: i32,
    pub amount_in: i64,
    pub block_height: i32,
    pub block_index: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedOutput {
    pub index: i32,
    pub value: i64,
    pub version: i32,
    pub addresses: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_transaction() -> Transaction {
        Transaction {
            hash: "ab".repeat(32),
            raw: vec![1, 0, 0, 0],
            fee: 2_530,
            timestamp: 1_700_000_000,
            tx_type: "Regular".to_string(),
            amount: 150_000_000,
            status: "Pending".to_string(),
            height: -1,
            direction: Direction::Received,
            debits: vec![],
            credits: vec![TransactionCredit {
                index: 0,
                account: 0,
                internal: false,
                amount: 150_000_000,
                address: "TsfDLrRkk9ciUuwfp2b8PawwnukYD7yAjGd".to_string(),
            }],
        }
    }

    #[test]
    fn test_direction_codes() {
        assert_eq!(i32::from(Direction::Sent), 0);
        assert_eq!(i32::from(Direction::Received), 1);
        assert_eq!(i32::from(Direction::Transferred), 2);
        assert_eq!(Direction::try_from(3), Err(InvalidDirection(3)));
    }

    #[test]
    fn test_direction_serializes_as_integer() {
        let json = serde_json::to_value(sample_transaction()).unwrap();
        assert_eq!(json["direction"], 1);
        assert_eq!(json["type"], "Regular");

        let bad = json.to_string().replace("\"direction\":1", "\"direction\":7");
        assert!(serde_json::from_str::<Transaction>(&bad).is_err());
    }

    #[test]
    fn test_unconfirmed_transaction() {
        let mut tx = sample_transaction();
        assert!(!tx.is_confirmed());
        tx.height = 812_000;
        assert!(tx.is_confirmed());
    }
}
