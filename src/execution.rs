//! Order execution seam: a simulated sink and the live Binance venue, picked
//! once at startup.

use async_trait::async_trait;

use crate::binance_api::{BinanceClient, OrderFill, VenueError};
use crate::types::OrderSide;

#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    Simulated { side: OrderSide, price: f64 },
    Filled(OrderFill),
}

#[async_trait]
pub trait OrderExecutor: Send + Sync {
    /// Send a market order. `price` is the decision price, used for logging and
    /// by the simulated sink.
    async fn execute(&self, side: OrderSide, price: f64) -> Result<Execution, VenueError>;

    fn mode(&self) -> &'static str;
}

/// Paper mode: every order "succeeds" at the decision price.
#[derive(Debug, Default, Clone)]
pub struct SimulatedExecutor;

#[async_trait]
impl OrderExecutor for SimulatedExecutor {
    async fn execute(&self, side: OrderSide, price: f64) -> Result<Execution, VenueError> {
        log::info!("[SIMULATED] {} @ {:.2}", side.as_str(), price);
        Ok(Execution::Simulated { side, price })
    }

    fn mode(&self) -> &'static str {
        "simulated"
    }
}

pub struct LiveExecutor {
    client: BinanceClient,
    symbol: String,
    quantity: f64,
}

impl LiveExecutor {
    pub fn new(client: BinanceClient, symbol: &str, quantity: f64) -> Self {
        LiveExecutor { client, symbol: symbol.to_string(), quantity }
    }
}

#[async_trait]
impl OrderExecutor for LiveExecutor {
    async fn execute(&self, side: OrderSide, price: f64) -> Result<Execution, VenueError> {
        log::debug!("Sending {} {} qty={} (signal price {:.2})", side.as_str(), self.symbol, self.quantity, price);
        let fill = self.client.place_market_order(side, &self.symbol, self.quantity).await?;
        Ok(Execution::Filled(fill))
    }

    fn mode(&self) -> &'static str {
        "live"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_always_succeeds() {
        let exec = SimulatedExecutor;
        let out = exec.execute(OrderSide::Buy, 101.5).await.unwrap();
        assert_eq!(out, Execution::Simulated { side: OrderSide::Buy, price: 101.5 });
        assert_eq!(exec.mode(), "simulated");
    }
}
