//! In-process wallet service
//!
//! Answers every debit and credit after an optional delay. Failures are
//! injected per operation, either for everyone or for a list of users.

use chrono::Utc;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

use crate::contracts::{WalletCommand, WalletReply};
use crate::runtime::{EntityRef, Mailbox};

/// Which requests of one kind are failed
#[derive(Debug, Clone, Default)]
pub enum FailRule {
    #[default]
    Never,
    Always,
    Users(HashSet<String>),
}

impl FailRule {
    pub fn users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let users: HashSet<String> = users.into_iter().map(Into::into).collect();
        if users.is_empty() {
            FailRule::Never
        } else {
            FailRule::Users(users)
        }
    }

    pub fn applies_to(&self, user_id: &str) -> bool {
        match self {
            FailRule::Never => false,
            FailRule::Always => true,
            FailRule::Users(users) => users.contains(user_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedWallet {
    name: String,
    latency: Duration,
    fail_debits: FailRule,
    fail_credits: FailRule,
}

impl SimulatedWallet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latency: Duration::ZERO,
            fail_debits: FailRule::Never,
            fail_credits: FailRule::Never,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn fail_debits(mut self, rule: FailRule) -> Self {
        self.fail_debits = rule;
        self
    }

    pub fn fail_credits(mut self, rule: FailRule) -> Self {
        self.fail_credits = rule;
        self
    }

    fn answer(&self, cmd: &WalletCommand) -> WalletReply {
        let correlation_id = cmd.correlation_id().to_string();
        match cmd {
            WalletCommand::DebitFunds { user_id, .. } => {
                if self.fail_debits.applies_to(user_id) {
                    WalletReply::DebitFailed {
                        correlation_id,
                        reason: format!("{}: debit declined for {}", self.name, user_id),
                    }
                } else {
                    WalletReply::DebitCompleted {
                        correlation_id,
                        at: Utc::now(),
                    }
                }
            }
            WalletCommand::CreditFunds { user_id, .. } => {
                if self.fail_credits.applies_to(user_id) {
                    WalletReply::CreditFailed {
                        correlation_id,
                        reason: format!("{}: credit declined for {}", self.name, user_id),
                    }
                } else {
                    WalletReply::CreditCompleted {
                        correlation_id,
                        at: Utc::now(),
                    }
                }
            }
        }
    }

    /// Start serving requests; the task ends when every handle is dropped
    pub fn spawn(self) -> EntityRef<WalletCommand> {
        let (handle, mailbox) = EntityRef::channel("Wallet", &self.name);
        tokio::spawn(self.run(mailbox));
        handle
    }

    async fn run(self, mut mailbox: Mailbox<WalletCommand>) {
        info!(wallet = %self.name, "Simulated wallet started");
        while let Some(cmd) = mailbox.recv().await {
            let reply = self.answer(&cmd);
            debug!(
                wallet = %self.name,
                debit = cmd.is_debit(),
                amount = %cmd.amount(),
                correlation_id = %cmd.correlation_id(),
                reply = ?reply,
                "Wallet request"
            );
            let reply_to = match cmd {
                WalletCommand::DebitFunds { reply_to, .. }
                | WalletCommand::CreditFunds { reply_to, .. } => reply_to,
            };

            let delay = super::jittered(self.latency);
            if delay.is_zero() {
                reply_to.tell(reply);
            } else {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    reply_to.tell(reply);
                });
            }
        }
        info!(wallet = %self.name, "Simulated wallet stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Recipient;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    fn debit(user_id: &str, tx: &mpsc::UnboundedSender<WalletReply>) -> WalletCommand {
        WalletCommand::DebitFunds {
            amount: dec!(10),
            user_id: user_id.to_string(),
            correlation_id: format!("{}:DEBITING_SOURCE", user_id),
            reply_to: Recipient::from_channel(tx.clone()),
        }
    }

    #[test]
    fn test_fail_rule() {
        assert!(!FailRule::Never.applies_to("u-1"));
        assert!(FailRule::Always.applies_to("u-1"));
        let rule = FailRule::users(["u-2"]);
        assert!(rule.applies_to("u-2"));
        assert!(!rule.applies_to("u-1"));
        assert!(matches!(FailRule::users(Vec::<String>::new()), FailRule::Never));
    }

    #[tokio::test]
    async fn test_debit_declined_for_listed_user() {
        let wallet = SimulatedWallet::new("source")
            .fail_debits(FailRule::users(["broke"]))
            .spawn();
        let (tx, mut rx) = mpsc::unbounded_channel();

        wallet.tell(debit("u-1", &tx));
        assert_eq!(
            rx.recv().await.unwrap().correlation_id(),
            "u-1:DEBITING_SOURCE"
        );
        assert!(matches!(rx.try_recv(), Err(_)));

        wallet.tell(debit("broke", &tx));
        match rx.recv().await.unwrap() {
            WalletReply::DebitFailed { reason, .. } => assert!(reason.contains("broke")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_latency_delays_reply() {
        let wallet = SimulatedWallet::new("exchange")
            .with_latency(Duration::from_millis(40))
            .spawn();
        let (tx, mut rx) = mpsc::unbounded_channel();

        wallet.tell(debit("u-1", &tx));
        assert!(rx.try_recv().is_err());
        let reply = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(reply, WalletReply::DebitCompleted { .. }));
    }
}
