//! relayer service fee and total withdrawal fee

use std::sync::Arc;

use async_trait::async_trait;
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use tracing::{debug, warn};

use crate::client::{CallRequest, ChainReader};
use crate::error::{MixerError, Result};
use crate::units::parse_units;

/// gas used when the node refuses to estimate the withdrawal call
pub const WITHDRAW_GAS_FALLBACK: u64 = 550_000;

/// `percent` of `amount`, in base units; the percent is truncated to four decimals
pub fn relayer_fee(percent: f64, amount: &str, decimals: u32) -> Result<BigUint> {
    let amount = parse_units(amount, decimals)?;
    let basis = (percent * 10_000.0).floor();
    let basis = basis
        .to_u64()
        .filter(|_| basis.is_finite() && basis >= 0.0)
        .ok_or_else(|| MixerError::Relayer(format!("invalid service fee {}", percent)))?;
    Ok(amount * BigUint::from(basis) / BigUint::from(1_000_000u32))
}

/// inputs for pricing one relayed withdrawal
#[derive(Debug, Clone)]
pub struct FeeQuote<'a> {
    /// withdrawal call with provisional proof
    pub tx: &'a CallRequest,
    pub relayer_fee_percent: f64,
    pub currency: &'a str,
    pub amount: &'a str,
    pub decimals: u32,
    /// native base units bought for the recipient
    pub refund: &'a BigUint,
    pub is_native: bool,
    /// price of one token in native base units, token pools only
    pub token_price: Option<BigUint>,
    /// configured gas for the pool, used when estimation fails
    pub gas_limit: Option<u64>,
}

#[async_trait]
pub trait FeeOracle: Send + Sync {
    /// service fee plus submission cost, in the pool's base units
    async fn withdrawal_fee(&self, quote: &FeeQuote<'_>) -> Result<BigUint>;
}

/// prices gas from the node and converts it with the relayer's token prices
pub struct GasFeeOracle {
    chain: Arc<dyn ChainReader>,
}

impl GasFeeOracle {
    pub fn new(chain: Arc<dyn ChainReader>) -> Self {
        Self { chain }
    }

    async fn gas(&self, quote: &FeeQuote<'_>) -> BigUint {
        match self.chain.estimate_gas(quote.tx).await {
            Ok(gas) if !gas.is_zero() => gas,
            Ok(_) | Err(_) => {
                let fallback = quote.gas_limit.unwrap_or(WITHDRAW_GAS_FALLBACK);
                warn!("gas estimation failed, using {}", fallback);
                BigUint::from(fallback)
            }
        }
    }
}

#[async_trait]
impl FeeOracle for GasFeeOracle {
    async fn withdrawal_fee(&self, quote: &FeeQuote<'_>) -> Result<BigUint> {
        let gas_price = self.chain.gas_price().await?;
        let gas = self.gas(quote).await;
        let native_cost = gas_price * gas;

        let submission = if quote.is_native {
            native_cost
        } else {
            let price = quote
                .token_price
                .as_ref()
                .filter(|p| !p.is_zero())
                .ok_or_else(|| MixerError::Relayer(format!("relayer has no price for {}", quote.currency)))?;
            (native_cost + quote.refund) * BigUint::from(10u32).pow(quote.decimals) / price
        };

        let service = relayer_fee(quote.relayer_fee_percent, quote.amount, quote.decimals)?;
        debug!("submission cost {}, service fee {}", submission, service);
        Ok(submission + service)
    }
}
