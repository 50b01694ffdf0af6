//! In-process exchange gateway
//!
//! Accepts every order unless its symbol is on the reject list, then pushes
//! fills into the order entity according to the configured fill mode.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{FillMode, SimulatorConfig};
use crate::contracts::{GatewayCommand, GatewayReply};
use crate::domain::OrderRequest;
use crate::order::OrderCommand;
use crate::runtime::{EntityRef, EntityResolver, Mailbox, Recipient};

pub struct SimulatedGateway {
    orders: Arc<dyn EntityResolver<OrderCommand>>,
    latency: Duration,
    fill_mode: FillMode,
    rejected_symbols: HashSet<String>,
}

impl SimulatedGateway {
    pub fn new(orders: Arc<dyn EntityResolver<OrderCommand>>) -> Self {
        Self {
            orders,
            latency: Duration::ZERO,
            fill_mode: FillMode::Full,
            rejected_symbols: HashSet::new(),
        }
    }

    pub fn from_config(orders: Arc<dyn EntityResolver<OrderCommand>>, config: &SimulatorConfig) -> Self {
        Self::new(orders)
            .with_latency(Duration::from_millis(config.gateway_latency_ms))
            .with_fill_mode(config.fill_mode)
            .reject_symbols(config.rejected_symbols.iter().cloned())
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_fill_mode(mut self, fill_mode: FillMode) -> Self {
        self.fill_mode = fill_mode;
        self
    }

    pub fn reject_symbols<I: IntoIterator<Item = String>>(mut self, symbols: I) -> Self {
        self.rejected_symbols
            .extend(symbols.into_iter().map(|s| s.to_uppercase()));
        self
    }

    /// Fill quantities pushed after acceptance
    fn fills_for(&self, quantity: Decimal) -> Vec<Decimal> {
        match self.fill_mode {
            FillMode::Full => vec![quantity],
            FillMode::Split => {
                let first = (quantity / dec!(2)).round_dp(8);
                if first.is_zero() || first == quantity {
                    vec![quantity]
                } else {
                    vec![first, quantity - first]
                }
            }
            FillMode::None => Vec::new(),
        }
    }

    pub fn spawn(self) -> EntityRef<GatewayCommand> {
        let (handle, mailbox) = EntityRef::channel("Gateway", "simulated");
        tokio::spawn(self.run(mailbox));
        handle
    }

    async fn run(self, mut mailbox: Mailbox<GatewayCommand>) {
        info!(fill_mode = ?self.fill_mode, "Simulated gateway started");
        while let Some(cmd) = mailbox.recv().await {
            match cmd {
                GatewayCommand::SendOrder {
                    order_id,
                    request,
                    reply_to,
                } => self.send_order(order_id, request, reply_to),
                GatewayCommand::CancelOrder { order_id, reason } => {
                    info!(%order_id, %reason, "Cancelling order");
                    match self.orders.resolve(&order_id) {
                        Ok(order) => {
                            order.tell(OrderCommand::Cancelled { reason });
                        }
                        Err(e) => warn!(%order_id, error = %e, "Cannot route cancellation"),
                    }
                }
            }
        }
        info!("Simulated gateway stopped");
    }

    fn send_order(&self, order_id: String, request: OrderRequest, reply_to: Recipient<GatewayReply>) {
        let delay = super::jittered(self.latency);

        if self.rejected_symbols.contains(&request.symbol.to_uppercase()) {
            debug!(%order_id, symbol = %request.symbol, "Rejecting order");
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                reply_to.tell(GatewayReply::OrderRejected {
                    order_id,
                    reason: format!("Symbol {} is not tradable", request.symbol),
                });
            });
            return;
        }

        let fills = self.fills_for(request.quantity);
        let orders = self.orders.clone();
        let latency = self.latency;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            reply_to.tell(GatewayReply::OrderAccepted {
                order_id: order_id.clone(),
                at: Utc::now(),
            });

            for fill_qty in fills {
                tokio::time::sleep(super::jittered(latency)).await;
                let order = match orders.resolve(&order_id) {
                    Ok(order) => order,
                    Err(e) => {
                        warn!(%order_id, error = %e, "Cannot route fill");
                        return;
                    }
                };
                debug!(%order_id, %fill_qty, "Pushing fill");
                order.tell(OrderCommand::FillUpdate {
                    fill_qty,
                    at: Utc::now(),
                });
            }
        });
    }
}
