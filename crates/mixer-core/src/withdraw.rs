//! withdrawal orchestration
//!
//! ```text
//! ComputingEstimate -> ComputingFinalProof -> Submitting
//!     -> DirectSent
//!     -> RelayedPending -> RelayedConfirmed | RelayedFailed
//! ```
//!
//! Every pre-flight check runs before the prover is first invoked. The direct
//! path skips the estimate state.

use std::sync::Arc;
use std::time::Duration;

use num_bigint::BigUint;
use num_traits::Zero;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::abi::{self, ZERO_ADDRESS};
use crate::client::{CallRequest, Receipt, TransactionSigner};
use crate::error::{MixerError, Result};
use crate::events::{DepositEvent, WithdrawalEvent};
use crate::fees::{self, FeeOracle, FeeQuote};
use crate::note::Note;
use crate::pool;
use crate::prover::{Prover, WithdrawalProofPlan};
use crate::relayer::{
    relayer_origin, select, FeeBounds, JobState, RelayerApi, RelayerDirectory, RelayerStatus,
    WithdrawalRequest,
};
use crate::session::{AnonymityCheck, Session};
use crate::sync::SyncEngine;
use crate::units::{format_units, parse_units};

/// deposits that must follow ours before a withdrawal is considered safe
pub const ANONYMITY_MIN_FOLLOWERS: u32 = 10;

pub const ANONYMITY_PROMPT: &str = "Continue withdrawal with risks to anonymity? [y/N]";
pub const RELAYED_PROMPT: &str = "Confirm withdrawal through relayer? [y/N]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawalState {
    Preparing,
    ComputingEstimate,
    ComputingFinalProof,
    Submitting,
    DirectSent { tx_hash: String },
    RelayedPending { job_id: String },
    RelayedConfirmed { tx_hash: String },
    RelayedFailed { reason: String },
}

/// yes/no hook for risky steps
pub trait Confirmation: Send + Sync {
    fn confirm(&self, prompt: &str) -> bool;
}

/// answers yes to everything
pub struct AutoConfirm;

impl Confirmation for AutoConfirm {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

/// only "y" and "yes", any case, count as consent
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

#[derive(Debug, Clone)]
pub struct WithdrawRequest {
    pub note: Note,
    pub recipient: String,
    /// native coin bought for the recipient, decimal; token pools only
    pub refund: String,
    /// relayer url; discovered when absent
    pub relayer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawalOutcome {
    Direct { tx_hash: String, block: u64 },
    /// local mode: the call was prepared and not sent
    Prepared { tx: CallRequest },
    Relayed { job_id: String, tx_hash: String, block: u64, fee: BigUint },
}

pub struct WithdrawalCoordinator {
    session: Arc<Session>,
    engine: SyncEngine,
    prover: Arc<dyn Prover>,
    fee_oracle: Arc<dyn FeeOracle>,
    relayer_api: Arc<dyn RelayerApi>,
    directory: Option<Arc<RelayerDirectory>>,
    signer: Option<Arc<dyn TransactionSigner>>,
    confirmation: Arc<dyn Confirmation>,
    cancel: CancellationToken,
    state: watch::Sender<WithdrawalState>,
}

impl WithdrawalCoordinator {
    pub fn new(
        session: Arc<Session>,
        engine: SyncEngine,
        prover: Arc<dyn Prover>,
        fee_oracle: Arc<dyn FeeOracle>,
        relayer_api: Arc<dyn RelayerApi>,
    ) -> Self {
        let (state, _) = watch::channel(WithdrawalState::Preparing);
        Self {
            session,
            engine,
            prover,
            fee_oracle,
            relayer_api,
            directory: None,
            signer: None,
            confirmation: Arc::new(AutoConfirm),
            cancel: CancellationToken::new(),
            state,
        }
    }

    pub fn with_directory(mut self, directory: Arc<RelayerDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn TransactionSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_confirmation(mut self, confirmation: Arc<dyn Confirmation>) -> Self {
        self.confirmation = confirmation;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<WithdrawalState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> WithdrawalState {
        self.state.borrow().clone()
    }

    fn enter(&self, state: WithdrawalState) {
        debug!("withdrawal state {:?}", state);
        self.state.send_replace(state);
    }

    fn confirm(&self, prompt: &str) -> bool {
        !self.session.options.prompt_confirmation || self.confirmation.confirm(prompt)
    }

    pub async fn withdraw(&self, request: &WithdrawRequest) -> Result<WithdrawalOutcome> {
        let session = &self.session;
        let pool = &session.pool;
        let note = &request.note;

        self.check_note(note)?;
        let refund = self.parse_refund(&request.refund)?;
        if !abi::is_valid_address(&request.recipient) {
            return Err(MixerError::Validation("recipient address is not valid".into()));
        }
        let recipient = abi::parse_address(&request.recipient)?;

        let withdrawals = self
            .engine
            .sync::<WithdrawalEvent>(&session.withdrawals_target())
            .await?;
        let nullifier_hex = note.deposit.nullifier_hex();
        if let Some(w) = withdrawals
            .iter()
            .find(|w| w.nullifier_hash.eq_ignore_ascii_case(&nullifier_hex))
        {
            return Err(MixerError::AlreadyWithdrawn(w.transaction_hash.clone()));
        }

        let deposits_target = session.deposits_target();
        let cached = match session.options.anonymity_check {
            AnonymityCheck::Cached => Some(self.engine.store().load::<DepositEvent>(&deposits_target.key)),
            AnonymityCheck::Fresh => None,
        };
        let deposits = self.engine.sync::<DepositEvent>(&deposits_target).await?;
        self.check_anonymity(cached.as_deref().unwrap_or(deposits.as_slice()), note)?;

        let merkle = pool::merkle_proof(
            session.chain.as_ref(),
            &pool.address,
            pool.tree_hash,
            session.options.merkle_tree_height,
            &deposits,
            &note.deposit.commitment,
            &note.deposit.nullifier_hash,
        )
        .await?;

        let deposit = &note.deposit;
        match &self.signer {
            Some(signer) if !session.is_mainnet() => {
                let plan = WithdrawalProofPlan::new(
                    self.prover.clone(),
                    deposit.clone(),
                    merkle,
                    recipient,
                    ZERO_ADDRESS,
                    refund,
                );
                self.withdraw_direct(signer.as_ref(), &plan, &request.recipient).await
            }
            _ => {
                let (origin, status) = self.choose_relayer(request.relayer.as_deref()).await?;
                if !status.serves(session.chain_id) {
                    return Err(MixerError::Validation(format!(
                        "relayer {} serves a different network",
                        origin
                    )));
                }
                info!("relayer address {}", status.reward_account);
                let relayer = abi::parse_address(&status.reward_account)?;
                let plan = WithdrawalProofPlan::new(
                    self.prover.clone(),
                    deposit.clone(),
                    merkle,
                    recipient,
                    relayer,
                    refund,
                );
                self.withdraw_relayed(&plan, &origin, &status).await
            }
        }
    }

    fn check_note(&self, note: &Note) -> Result<()> {
        let pool = &self.session.pool;
        if note.pool.net_id != self.session.chain_id {
            return Err(MixerError::Validation(format!(
                "note is for network {}, connected to {}",
                note.pool.net_id, self.session.chain_id
            )));
        }
        if note.pool.currency != pool.currency || note.pool.amount != pool.amount {
            return Err(MixerError::Validation(format!(
                "note is for the {} {} pool, session is {} {}",
                note.pool.amount, note.pool.currency, pool.amount, pool.currency
            )));
        }
        Ok(())
    }

    fn parse_refund(&self, refund: &str) -> Result<BigUint> {
        let refund = refund.trim();
        let value = if refund.is_empty() {
            BigUint::zero()
        } else {
            parse_units(refund, 18)?
        };
        if self.session.pool.is_native() && !value.is_zero() {
            return Err(MixerError::Validation(
                "refund must be 0 for native coin withdrawals".into(),
            ));
        }
        Ok(value)
    }

    fn check_anonymity(&self, deposits: &[DepositEvent], note: &Note) -> Result<()> {
        let (Some(ours), Some(last)) = (
            pool::find_deposit(deposits, &note.deposit.commitment),
            deposits.last(),
        ) else {
            return Ok(());
        };

        let followers = i64::from(last.leaf_index) - i64::from(ours.leaf_index);
        if followers < i64::from(ANONYMITY_MIN_FOLLOWERS)
            && deposits.len() > ANONYMITY_MIN_FOLLOWERS as usize
        {
            warn!(
                "only {} deposits after leaf {}, withdrawing now weakens anonymity",
                followers.max(0),
                ours.leaf_index
            );
            if !self.confirm(ANONYMITY_PROMPT) {
                return Err(MixerError::Aborted("declined anonymity warning".into()));
            }
        }
        Ok(())
    }

    async fn withdraw_direct(
        &self,
        signer: &dyn TransactionSigner,
        plan: &WithdrawalProofPlan,
        recipient: &str,
    ) -> Result<WithdrawalOutcome> {
        let session = &self.session;
        let pool = &session.pool;

        if !signer.address().eq_ignore_ascii_case(recipient) {
            return Err(MixerError::Validation(
                "recipient must be the signing account for direct withdrawals".into(),
            ));
        }
        if session.chain.get_balance(signer.address()).await?.is_zero() {
            return Err(MixerError::Validation(
                "signing account has 0 balance, withdraw through a relayer first".into(),
            ));
        }

        self.enter(WithdrawalState::ComputingFinalProof);
        let proof = plan.finalize(&BigUint::zero()).await?;
        let tx = CallRequest {
            from: Some(signer.address().to_string()),
            to: pool.proxy.clone(),
            data: abi::encode_proxy_withdraw(&pool.address, &proof.proof, &proof.args)?,
            value: parse_word_uint(&proof.args[5])?,
        };

        if !session.options.submit_transactions {
            info!("local mode, prepared withdrawal to {} ({} bytes of calldata)", tx.to, tx.data.len());
            return Ok(WithdrawalOutcome::Prepared { tx });
        }

        self.enter(WithdrawalState::Submitting);
        info!("submitting withdrawal transaction");
        let tx_hash = signer.send_transaction(&tx).await?;
        self.enter(WithdrawalState::DirectSent {
            tx_hash: tx_hash.clone(),
        });
        self.explorer_hint(&tx_hash);

        let receipt = self.wait_for_receipt(&tx_hash).await?;
        let block = receipt.mined_block().unwrap_or_default();
        info!("transaction mined in block {}", block);
        Ok(WithdrawalOutcome::Direct { tx_hash, block })
    }

    /// supplied url via `/status`, or the weighted lottery over live relayers
    async fn choose_relayer(&self, url: Option<&str>) -> Result<(String, RelayerStatus)> {
        if let Some(url) = url {
            let origin = relayer_origin(url)?;
            let status = self
                .relayer_api
                .status(&origin)
                .await
                .map_err(|e| MixerError::Relayer(format!("cannot get relayer status: {}", e)))?;
            return Ok((origin, status));
        }

        let directory = self.directory.as_ref().ok_or(MixerError::NoEligibleRelayer)?;
        let records = directory.available().await?;
        let bounds = FeeBounds::for_network(self.session.chain_id);
        let picked = select(&records, bounds, &mut rand::thread_rng())
            .ok_or(MixerError::NoEligibleRelayer)?;
        info!("selected relayer {}", picked.origin());
        Ok((picked.origin(), picked.status.clone()))
    }

    async fn withdraw_relayed(
        &self,
        plan: &WithdrawalProofPlan,
        origin: &str,
        status: &RelayerStatus,
    ) -> Result<WithdrawalOutcome> {
        let session = &self.session;
        let pool = &session.pool;

        self.enter(WithdrawalState::ComputingEstimate);
        let service_fee = fees::relayer_fee(status.service_fee, &pool.amount, pool.decimals)?;
        let estimate = plan.estimate(&service_fee).await?;
        let refund = parse_word_uint(&estimate.args[5])?;
        let tx = CallRequest {
            from: None,
            to: pool.proxy.clone(),
            data: abi::encode_proxy_withdraw(&pool.address, &estimate.proof, &estimate.args)?,
            value: refund.clone(),
        };

        let total_fee = self
            .fee_oracle
            .withdrawal_fee(&FeeQuote {
                tx: &tx,
                relayer_fee_percent: status.service_fee,
                currency: &pool.currency,
                amount: &pool.amount,
                decimals: pool.decimals,
                refund: &refund,
                is_native: pool.is_native(),
                token_price: status.price_of(&pool.currency),
                gas_limit: pool.gas_limit,
            })
            .await?;

        let amount = parse_units(&pool.amount, pool.decimals)?;
        if total_fee > amount {
            return Err(MixerError::Validation(format!(
                "relayer fee {} exceeds the withdrawn amount",
                format_units(&total_fee, pool.decimals, 12)
            )));
        }

        self.enter(WithdrawalState::ComputingFinalProof);
        let proof = plan.finalize(&total_fee).await?;

        let symbol = pool.symbol.to_uppercase();
        info!("relayer fee {} {}", format_units(&service_fee, pool.decimals, 12), symbol);
        info!("total fees {} {}", format_units(&total_fee, pool.decimals, 12), symbol);
        info!(
            "amount to receive {} {}",
            format_units(&(amount - &total_fee), pool.decimals, 12),
            symbol
        );
        if !refund.is_zero() {
            info!("plus refund {}", format_units(&refund, 18, 12));
        }
        if !self.confirm(RELAYED_PROMPT) {
            return Err(MixerError::Aborted("declined relayed withdrawal".into()));
        }

        self.enter(WithdrawalState::Submitting);
        info!("sending withdrawal through relayer {}", origin);
        let job_id = self
            .relayer_api
            .submit_withdrawal(
                origin,
                &WithdrawalRequest {
                    contract: pool.address.clone(),
                    proof: proof.proof,
                    args: proof.args,
                },
            )
            .await?;
        self.enter(WithdrawalState::RelayedPending {
            job_id: job_id.clone(),
        });

        let tx_hash = match self.poll_job(origin, &job_id).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => {
                if let MixerError::RelayerJob(reason) = &e {
                    self.enter(WithdrawalState::RelayedFailed {
                        reason: reason.clone(),
                    });
                }
                return Err(e);
            }
        };
        self.explorer_hint(&tx_hash);

        let receipt = self.wait_for_receipt(&tx_hash).await?;
        let block = receipt.mined_block().unwrap_or_default();
        self.enter(WithdrawalState::RelayedConfirmed {
            tx_hash: tx_hash.clone(),
        });
        info!("transaction mined in block {}", block);
        Ok(WithdrawalOutcome::Relayed {
            job_id,
            tx_hash,
            block,
            fee: total_fee,
        })
    }

    /// poll until the job is terminal; returns the relayed tx hash
    async fn poll_job(&self, origin: &str, job_id: &str) -> Result<String> {
        let options = &self.session.options;
        let mut ticker = tokio::time::interval(options.job_poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let deadline = sleep_or_forever(options.job_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(MixerError::Aborted(format!("stopped polling job {}", job_id)));
                }
                _ = &mut deadline => {
                    return Err(MixerError::RelayerJob(format!("job {} did not finish in time", job_id)));
                }
                _ = ticker.tick() => {}
            }

            let job = match self.relayer_api.job(origin, job_id).await {
                Ok(job) => job,
                Err(e) => {
                    warn!("job {} status unavailable: {}", job_id, e);
                    continue;
                }
            };
            info!("job status {}, confirmations {}", job.status, job.confirmations);

            match job.state {
                JobState::Failed => {
                    let reason = job.failed_reason.unwrap_or_else(|| "no reason given".into());
                    return Err(MixerError::RelayerJob(reason));
                }
                JobState::Confirmed => {
                    return job.tx_hash.ok_or_else(|| {
                        MixerError::RelayerJob("confirmed job has no transaction hash".into())
                    });
                }
                _ => {}
            }
        }
    }

    pub async fn wait_for_receipt(&self, tx_hash: &str) -> Result<Receipt> {
        let options = &self.session.options;
        for attempt in 0..options.receipt_attempts {
            match self.session.chain.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) if receipt.mined_block().is_some() => return Ok(receipt),
                Ok(_) => debug!("receipt for {} not yet available ({})", tx_hash, attempt + 1),
                Err(e) => debug!("receipt query failed: {}", e),
            }
            tokio::time::sleep(options.receipt_delay).await;
        }
        Err(MixerError::Network(format!(
            "no receipt for {} after {} attempts",
            tx_hash, options.receipt_attempts
        )))
    }

    fn explorer_hint(&self, tx_hash: &str) {
        match &self.session.network.explorer {
            Some(explorer) => info!("view transaction at https://{}/tx/{}", explorer, tx_hash),
            None => info!("transaction {}", tx_hash),
        }
    }
}

async fn sleep_or_forever(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending::<()>().await,
    }
}

fn parse_word_uint(hex_word: &str) -> Result<BigUint> {
    Ok(BigUint::from_bytes_be(&abi::parse_word(hex_word)?))
}
