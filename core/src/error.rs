use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid decimal: {0}")]
    Decimal(#[from] rust_decimal::Error),

    #[error("Invalid wallet address '{address}'")]
    InvalidAddress { address: String },

    #[error("Product '{product_id}' is not configured")]
    UnknownProduct { product_id: String },

    #[error("Position {position_id} not found")]
    PositionNotFound { position_id: i64 },

    #[error("Position {position_id} cannot move from {from} to {to}")]
    InvalidTransition {
        position_id: i64,
        from: String,
        to: String,
    },

    #[error("Insufficient balance for {wallet}: required {required}, available {available}")]
    InsufficientBalance {
        wallet: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("Invalid amount {amount}: {reason}")]
    InvalidAmount { amount: Decimal, reason: String },

    #[error("Wallet {wallet} is banned")]
    WalletBanned { wallet: String },

    #[error("Referral binding rejected for {member}: {reason}")]
    ReferralRejected { member: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
