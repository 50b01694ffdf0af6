use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::runtime::Recipient;

/// Requests understood by a wallet service
#[derive(Debug, Clone)]
pub enum WalletCommand {
    DebitFunds {
        amount: Decimal,
        user_id: String,
        correlation_id: String,
        reply_to: Recipient<WalletReply>,
    },
    CreditFunds {
        amount: Decimal,
        user_id: String,
        correlation_id: String,
        reply_to: Recipient<WalletReply>,
    },
}

impl WalletCommand {
    pub fn correlation_id(&self) -> &str {
        match self {
            WalletCommand::DebitFunds { correlation_id, .. }
            | WalletCommand::CreditFunds { correlation_id, .. } => correlation_id,
        }
    }

    pub fn amount(&self) -> Decimal {
        match self {
            WalletCommand::DebitFunds { amount, .. } | WalletCommand::CreditFunds { amount, .. } => {
                *amount
            }
        }
    }

    pub fn is_debit(&self) -> bool {
        matches!(self, WalletCommand::DebitFunds { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WalletReply {
    DebitCompleted {
        correlation_id: String,
        at: DateTime<Utc>,
    },
    DebitFailed {
        correlation_id: String,
        reason: String,
    },
    CreditCompleted {
        correlation_id: String,
        at: DateTime<Utc>,
    },
    CreditFailed {
        correlation_id: String,
        reason: String,
    },
}

impl WalletReply {
    pub fn correlation_id(&self) -> &str {
        match self {
            WalletReply::DebitCompleted { correlation_id, .. }
            | WalletReply::DebitFailed { correlation_id, .. }
            | WalletReply::CreditCompleted { correlation_id, .. }
            | WalletReply::CreditFailed { correlation_id, .. } => correlation_id,
        }
    }

    pub fn debit_completed(correlation_id: impl Into<String>) -> Self {
        WalletReply::DebitCompleted {
            correlation_id: correlation_id.into(),
            at: Utc::now(),
        }
    }

    pub fn credit_completed(correlation_id: impl Into<String>) -> Self {
        WalletReply::CreditCompleted {
            correlation_id: correlation_id.into(),
            at: Utc::now(),
        }
    }
}
