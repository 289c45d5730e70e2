//! mixer - withdrawal client for shielded pools
//!
//! Commands:
//! - parse-note / create-note: offline note handling
//! - sync-events: refresh the local event cache
//! - check-cache: rebuild the tree and ask the pool about its root
//! - list-relayers: discover, validate and probe registered relayers
//! - withdraw: direct or relayed withdrawal
//! - compliance: deposit and withdrawal details for a note

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mixer_core::abi;
use mixer_core::client::{ChainReader, GraphQuery, IndexerClient, NodeSigner, RpcClient};
use mixer_core::fees::GasFeeOracle;
use mixer_core::pool;
use mixer_core::prover::CommandProver;
use mixer_core::relayer::{AggregatorReader, RelayerClient, RelayerDirectory};
use mixer_core::report;
use mixer_core::session::registry_target;
use mixer_core::units::format_units;
use mixer_core::withdraw::is_affirmative;
use mixer_core::{
    AnonymityCheck, Confirmation, Deployments, Deposit, DepositEvent, EventStore, Note, Session, SessionOptions,
    SyncEngine, WithdrawRequest, WithdrawalCoordinator, WithdrawalEvent, WithdrawalOutcome, PRIMARY_CHAIN_ID,
};

#[derive(Parser)]
#[command(name = "mixer")]
#[command(about = "shielded-pool mixer withdrawal client", long_about = None)]
struct Cli {
    /// node json-rpc endpoint (default: first rpc of the network)
    #[arg(long, env = "MIXER_RPC", global = true)]
    rpc: Option<String>,

    /// mainnet node used for the relayer registry when --rpc is another chain
    #[arg(long, global = true)]
    relayer_rpc: Option<String>,

    /// read events from chain logs only, never from indexers
    #[arg(long, global = true)]
    only_rpc: bool,

    /// answer yes to every prompt
    #[arg(long, global = true)]
    no_confirmation: bool,

    /// prepare direct withdrawals without sending them
    #[arg(long, global = true)]
    local_mode: bool,

    /// event cache directory
    #[arg(long, default_value = "./cache", global = true)]
    cache_dir: PathBuf,

    /// deployment table overriding the built-in one
    #[arg(long, global = true)]
    deployments: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a note and print its fields
    ParseNote {
        note: String,
    },

    /// Generate a fresh deposit note and its invoice
    CreateNote {
        currency: String,
        amount: String,
        #[arg(long, default_value_t = PRIMARY_CHAIN_ID)]
        chain_id: u64,
        /// write backup files for the note and invoice
        #[arg(long)]
        backup: bool,
    },

    /// Bring the local event cache up to date
    SyncEvents {
        currency: String,
        amount: String,
        #[arg(long, value_enum, default_value_t = EventArg::Deposit)]
        kind: EventArg,
    },

    /// Rebuild the commitment tree from cache and check its root on chain
    CheckCache {
        currency: String,
        amount: String,
    },

    /// Show relayers that are eligible and currently reachable
    ListRelayers,

    /// Withdraw a note to a recipient
    Withdraw {
        note: String,
        recipient: String,
        /// native coin bought for the recipient (token pools only)
        #[arg(long, default_value = "0")]
        refund: String,
        /// relayer url; picked from the registry when absent
        #[arg(long, env = "MIXER_RELAYER")]
        relayer: Option<String>,
        /// node-managed account for direct withdrawals
        #[arg(long)]
        from: Option<String>,
        /// prover executable
        #[arg(long)]
        prover: PathBuf,
        /// extra arguments passed to the prover
        #[arg(long = "prover-arg")]
        prover_args: Vec<String>,
        /// give up on the relayer job after this many seconds
        #[arg(long)]
        job_timeout: Option<u64>,
        /// warn about anonymity from the cache as it was before syncing
        #[arg(long)]
        cached_anonymity: bool,
    },

    /// Print the deposit and withdrawal behind a note
    Compliance {
        note: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum EventArg {
    Deposit,
    Withdrawal,
}

/// interactive prompt on stdin
struct StdinConfirmation;

impl Confirmation for StdinConfirmation {
    fn confirm(&self, prompt: &str) -> bool {
        print!("{} ", prompt);
        if io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        io::stdin().read_line(&mut answer).is_ok() && is_affirmative(&answer)
    }
}

struct App {
    deployments: Deployments,
    options: SessionOptions,
    rpc: Option<String>,
    relayer_rpc: Option<String>,
}

impl App {
    fn new(cli: &Cli) -> Result<Self> {
        let deployments = match &cli.deployments {
            Some(path) => Deployments::load(path)?,
            None => Deployments::builtin()?,
        };
        let options = SessionOptions {
            prompt_confirmation: !cli.no_confirmation,
            submit_transactions: !cli.local_mode,
            only_rpc: cli.only_rpc,
            cache_dir: cli.cache_dir.clone(),
            ..SessionOptions::default()
        }
        .with_env();
        Ok(Self {
            deployments,
            options,
            rpc: cli.rpc.clone(),
            relayer_rpc: cli.relayer_rpc.clone(),
        })
    }

    fn default_rpc(&self, chain_id: u64) -> Result<String> {
        self.deployments
            .network(chain_id)?
            .rpc
            .first()
            .cloned()
            .ok_or_else(|| anyhow!("no rpc configured for chain {}, pass --rpc", chain_id))
    }

    /// connect to --rpc, or the default rpc of `expected`; the node must serve `expected`
    async fn connect(&self, expected: Option<u64>) -> Result<(u64, RpcClient)> {
        let url = match &self.rpc {
            Some(url) => url.clone(),
            None => self.default_rpc(expected.unwrap_or(PRIMARY_CHAIN_ID))?,
        };
        let client = RpcClient::new(&url, self.options.request_timeout)?;
        let chain_id = client
            .chain_id()
            .await
            .with_context(|| format!("failed to connect to {}", url))?;
        info!("connected to {} (chain {})", url, chain_id);
        if let Some(expected) = expected {
            if expected != chain_id {
                bail!("note is for chain {} but the rpc serves chain {}", expected, chain_id);
            }
        }
        Ok((chain_id, client))
    }

    fn session(&self, chain_id: u64, currency: &str, amount: &str, chain: Arc<dyn ChainReader>) -> Result<Session> {
        Ok(Session::new(
            &self.deployments,
            chain_id,
            currency,
            amount,
            chain,
            self.options.clone(),
        )?)
    }

    fn indexers(&self, urls: &[String]) -> Result<Vec<Arc<dyn GraphQuery>>> {
        if self.options.only_rpc {
            return Ok(Vec::new());
        }
        urls.iter()
            .map(|url| -> Result<Arc<dyn GraphQuery>> {
                Ok(Arc::new(IndexerClient::new(url, self.options.request_timeout)?))
            })
            .collect()
    }

    fn engine(&self, chain: Arc<dyn ChainReader>, indexers: &[String]) -> Result<SyncEngine> {
        Ok(SyncEngine::new(EventStore::open(&self.options.cache_dir), chain)
            .with_indexers(self.indexers(indexers)?, self.options.request_timeout))
    }

    /// registry lives on mainnet, so other chains need a second connection
    fn directory(
        &self,
        chain_id: u64,
        chain: Arc<dyn ChainReader>,
        api: Arc<RelayerClient>,
    ) -> Result<RelayerDirectory> {
        let registry = &self.deployments.registry;
        let registry_chain: Arc<dyn ChainReader> = if chain_id == PRIMARY_CHAIN_ID {
            chain
        } else {
            let url = match &self.relayer_rpc {
                Some(url) => url.clone(),
                None => self.default_rpc(PRIMARY_CHAIN_ID)?,
            };
            Arc::new(RpcClient::new(&url, self.options.request_timeout)?)
        };

        Ok(RelayerDirectory::new(
            self.engine(registry_chain.clone(), &registry.indexers)?,
            registry_target(registry),
            Arc::new(AggregatorReader::new(registry_chain, &registry.aggregator)),
            api,
            registry.subdomains.clone(),
            self.deployments.subdomain_index(chain_id)?,
        )
        .with_probe_timeout(self.options.probe_timeout))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mixer=info,mixer_core=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let ctx = App::new(&cli)?;

    match cli.command {
        Commands::ParseNote { note } => parse_note(&note),
        Commands::CreateNote {
            currency,
            amount,
            chain_id,
            backup,
        } => create_note(&ctx, &currency, &amount, chain_id, backup),
        Commands::SyncEvents {
            currency,
            amount,
            kind,
        } => sync_events(&ctx, &currency, &amount, kind).await,
        Commands::CheckCache { currency, amount } => check_cache(&ctx, &currency, &amount).await,
        Commands::ListRelayers => list_relayers(&ctx).await,
        Commands::Withdraw {
            note,
            recipient,
            refund,
            relayer,
            from,
            prover,
            prover_args,
            job_timeout,
            cached_anonymity,
        } => {
            let mut ctx = ctx;
            ctx.options.job_timeout = job_timeout.map(Duration::from_secs);
            if cached_anonymity {
                ctx.options.anonymity_check = AnonymityCheck::Cached;
            }
            let request = WithdrawRequest {
                note: Note::parse(&note)?,
                recipient,
                refund,
                relayer,
            };
            withdraw(&ctx, request, from, CommandProver::new(prover, prover_args)).await
        }
        Commands::Compliance { note } => compliance(&ctx, &note).await,
    }
}

fn parse_note(note: &str) -> Result<()> {
    let note = Note::parse(note)?;
    println!("currency      {}", note.pool.currency);
    println!("amount        {}", note.pool.amount);
    println!("net id        {}", note.pool.net_id);
    println!("commitment    {}", note.deposit.commitment_hex());
    println!("nullifier     {}", note.deposit.nullifier_hex());
    println!("invoice       {}", note.invoice());
    Ok(())
}

fn create_note(ctx: &App, currency: &str, amount: &str, chain_id: u64, backup: bool) -> Result<()> {
    let pool = ctx.deployments.pool(chain_id, currency, amount)?;
    let note = Note::new(&pool.currency, &pool.amount, chain_id, Deposit::random()?);
    let invoice = note.invoice();

    println!("note          {}", note);
    println!("invoice       {}", invoice);
    println!("commitment    {}", note.deposit.commitment_hex());

    if backup {
        std::fs::write(note.backup_file_name(), note.to_string())
            .context("failed to write note backup")?;
        std::fs::write(invoice.backup_file_name(), invoice.to_string())
            .context("failed to write invoice backup")?;
        info!("backed up to {} and {}", note.backup_file_name(), invoice.backup_file_name());
    }
    Ok(())
}

async fn sync_events(ctx: &App, currency: &str, amount: &str, kind: EventArg) -> Result<()> {
    let (chain_id, client) = ctx.connect(None).await?;
    let chain: Arc<dyn ChainReader> = Arc::new(client);
    let session = ctx.session(chain_id, currency, amount, chain.clone())?;
    let engine = ctx.engine(chain, &session.network.indexers)?;

    match kind {
        EventArg::Deposit => {
            let events = engine.sync::<DepositEvent>(&session.deposits_target()).await?;
            println!(
                "{} deposits cached, last block {}",
                events.len(),
                events.last().map_or(0, |e| e.block_number)
            );
        }
        EventArg::Withdrawal => {
            let events = engine.sync::<WithdrawalEvent>(&session.withdrawals_target()).await?;
            println!(
                "{} withdrawals cached, last block {}",
                events.len(),
                events.last().map_or(0, |e| e.block_number)
            );
        }
    }
    Ok(())
}

async fn check_cache(ctx: &App, currency: &str, amount: &str) -> Result<()> {
    let (chain_id, client) = ctx.connect(None).await?;
    let chain: Arc<dyn ChainReader> = Arc::new(client);
    let session = ctx.session(chain_id, currency, amount, chain.clone())?;
    let engine = ctx.engine(chain.clone(), &session.network.indexers)?;

    let deposits = engine.sync::<DepositEvent>(&session.deposits_target()).await?;
    let check = pool::check_cache(
        chain.as_ref(),
        &session.pool.address,
        session.pool.tree_hash,
        session.options.merkle_tree_height,
        &deposits,
    )
    .await?;

    println!("leaves        {}", check.leaves);
    println!("root          {}", abi::word_hex(&check.root));
    if check.known {
        println!("cache is valid");
        Ok(())
    } else {
        bail!("cache root is unknown to the pool, delete {} and resync", ctx.options.cache_dir.display())
    }
}

async fn list_relayers(ctx: &App) -> Result<()> {
    let (chain_id, client) = ctx.connect(None).await?;
    let api = Arc::new(RelayerClient::new(ctx.options.probe_timeout)?);
    let directory = ctx.directory(chain_id, Arc::new(client), api)?;

    let records = directory.available().await?;
    if records.is_empty() {
        warn!("no relayers available for chain {}", chain_id);
    }
    for r in &records {
        println!(
            "{:<40} fee {:>6}%  stake {}",
            r.hostname(),
            r.service_fee(),
            format_units(r.stake_balance(), 18, 2)
        );
    }
    Ok(())
}

async fn withdraw(ctx: &App, request: WithdrawRequest, from: Option<String>, prover: CommandProver) -> Result<()> {
    let note = &request.note;
    let (chain_id, client) = ctx.connect(Some(note.pool.net_id)).await?;
    let chain: Arc<dyn ChainReader> = Arc::new(client.clone());
    let session = ctx.session(chain_id, &note.pool.currency, &note.pool.amount, chain.clone())?;
    let engine = ctx.engine(chain.clone(), &session.network.indexers)?;

    let api = Arc::new(RelayerClient::new(ctx.options.request_timeout)?);
    let mut coordinator = WithdrawalCoordinator::new(
        Arc::new(session),
        engine,
        Arc::new(prover),
        Arc::new(GasFeeOracle::new(chain.clone())),
        api.clone(),
    );
    if request.relayer.is_none() {
        coordinator = coordinator.with_directory(Arc::new(ctx.directory(chain_id, chain, api)?));
    }
    if let Some(from) = from {
        coordinator = coordinator.with_signer(Arc::new(NodeSigner::new(client, &from)?));
    }
    if ctx.options.prompt_confirmation {
        coordinator = coordinator.with_confirmation(Arc::new(StdinConfirmation));
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping");
            on_interrupt.cancel();
        }
    });
    let coordinator = coordinator.with_cancellation(cancel);

    match coordinator.withdraw(&request).await? {
        WithdrawalOutcome::Direct { tx_hash, block } => {
            println!("withdrawn in {} (block {})", tx_hash, block);
        }
        WithdrawalOutcome::Prepared { tx } => {
            println!("to            {}", tx.to);
            println!("value         {}", tx.value);
            println!("data          0x{}", hex::encode(&tx.data));
        }
        WithdrawalOutcome::Relayed {
            job_id,
            tx_hash,
            block,
            fee,
        } => {
            println!("job {} relayed in {} (block {}), fee {}", job_id, tx_hash, block, fee);
        }
    }
    Ok(())
}

async fn compliance(ctx: &App, note: &str) -> Result<()> {
    let note = Note::parse(note)?;
    let (chain_id, client) = ctx.connect(Some(note.pool.net_id)).await?;
    let chain: Arc<dyn ChainReader> = Arc::new(client);
    let session = ctx.session(chain_id, &note.pool.currency, &note.pool.amount, chain.clone())?;
    let engine = ctx.engine(chain, &session.network.indexers)?;

    let report = report::compliance(&session, &engine, &note).await?;
    println!("{}", report);
    Ok(())
}
