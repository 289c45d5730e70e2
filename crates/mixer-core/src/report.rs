//! compliance report: where a note's deposit came from and where it went

use std::fmt;

use num_bigint::BigUint;
use tracing::warn;

use crate::error::{MixerError, Result};
use crate::events::{DepositEvent, WithdrawalEvent};
use crate::note::Note;
use crate::pool;
use crate::session::Session;
use crate::sync::SyncEngine;
use crate::units::{format_units, parse_units};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositReport {
    pub tx_hash: String,
    pub timestamp: u64,
    pub commitment: String,
    pub leaf_index: u32,
    /// sender of the deposit transaction
    pub from: String,
    pub spent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalReport {
    pub tx_hash: String,
    pub timestamp: u64,
    pub to: String,
    pub nullifier_hash: String,
    pub fee: BigUint,
    /// amount received net of fee
    pub amount: BigUint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplianceReport {
    pub currency: String,
    pub decimals: u32,
    pub deposit: DepositReport,
    pub withdrawal: Option<WithdrawalReport>,
}

pub async fn compliance(session: &Session, engine: &SyncEngine, note: &Note) -> Result<ComplianceReport> {
    let pool = &session.pool;
    let chain = session.chain.as_ref();

    let deposits = engine.sync::<DepositEvent>(&session.deposits_target()).await?;
    let event = pool::find_deposit(&deposits, &note.deposit.commitment)
        .ok_or_else(|| MixerError::DepositNotFound(note.deposit.commitment_hex()))?;

    let timestamp = match event.timestamp {
        Some(ts) => ts,
        None => chain.block_timestamp(event.block_number).await?,
    };
    let from = match chain.transaction_receipt(&event.transaction_hash).await? {
        Some(receipt) => receipt.from,
        None => {
            warn!("no receipt for deposit {}", event.transaction_hash);
            String::new()
        }
    };
    let spent = pool::is_spent(chain, &pool.address, &note.deposit.nullifier_hash).await?;

    let deposit = DepositReport {
        tx_hash: event.transaction_hash.clone(),
        timestamp,
        commitment: note.deposit.commitment_hex(),
        leaf_index: event.leaf_index,
        from,
        spent,
    };

    let withdrawal = if spent {
        let withdrawals = engine.sync::<WithdrawalEvent>(&session.withdrawals_target()).await?;
        let nullifier = note.deposit.nullifier_hex();
        match withdrawals
            .iter()
            .find(|w| w.nullifier_hash.eq_ignore_ascii_case(&nullifier))
        {
            Some(w) => {
                let fee = w.fee_units()?;
                let gross = parse_units(&pool.amount, pool.decimals)?;
                let amount = if gross > fee { gross - &fee } else { BigUint::default() };
                Some(WithdrawalReport {
                    tx_hash: w.transaction_hash.clone(),
                    timestamp: chain.block_timestamp(w.block_number).await?,
                    to: w.to.clone(),
                    nullifier_hash: w.nullifier_hash.clone(),
                    fee,
                    amount,
                })
            }
            None => {
                warn!("note is spent but its withdrawal is not cached");
                None
            }
        }
    } else {
        None
    };

    Ok(ComplianceReport {
        currency: pool.symbol.clone(),
        decimals: pool.decimals,
        deposit,
        withdrawal,
    })
}

impl fmt::Display for ComplianceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.deposit;
        writeln!(f, "deposit")?;
        writeln!(f, "  transaction  {}", d.tx_hash)?;
        writeln!(f, "  timestamp    {}", d.timestamp)?;
        writeln!(f, "  from         {}", d.from)?;
        writeln!(f, "  commitment   {}", d.commitment)?;
        writeln!(f, "  leaf index   {}", d.leaf_index)?;
        writeln!(f, "  spent        {}", d.spent)?;

        match &self.withdrawal {
            Some(w) => {
                writeln!(f, "withdrawal")?;
                writeln!(f, "  transaction  {}", w.tx_hash)?;
                writeln!(f, "  timestamp    {}", w.timestamp)?;
                writeln!(f, "  to           {}", w.to)?;
                writeln!(f, "  nullifier    {}", w.nullifier_hash)?;
                writeln!(
                    f,
                    "  amount       {} {}",
                    format_units(&w.amount, self.decimals, 12),
                    self.currency
                )?;
                write!(
                    f,
                    "  fee          {} {}",
                    format_units(&w.fee, self.decimals, 12),
                    self.currency
                )
            }
            None => write!(f, "withdrawal   none"),
        }
    }
}
