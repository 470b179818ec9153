//! laundeth - operator cli for the shielded pool
//!
//! Commands:
//! - init: write a pool config
//! - note: create a deposit note
//! - fund: mint local ledger funds
//! - deposit: admit a note's commitment
//! - publish: publish the current root
//! - witness: emit `compute-witness` arguments for a note
//! - withdraw: redeem a zokrates proof
//! - status / reconcile: operator views
//! - demo: full lifecycle in memory with the development engine

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use laundeth_pool::{
    Address, Amount, CircuitInput, Commitment, DepositNote, DigestVerifier, MemoryLedger, Nullifier,
    PoolConfig, ProofBundle, ProofVerifier, ProtocolVersion, PublicInputs, Root, ShieldedPool, Storage,
    VerificationKey,
};
use tracing::{info, warn};

mod ledger;
mod zokrates;

use crate::ledger::SledLedger;
use crate::zokrates::ZokratesVerifier;

#[derive(Parser, Debug)]
#[command(name = "laundeth")]
#[command(about = "fixed-denomination shielded pool", long_about = None)]
struct Cli {
    /// pool config file
    #[arg(long, env = "LAUNDETH_CONFIG", default_value = "laundeth.toml")]
    config: PathBuf,

    /// override the pool database path from the config
    #[arg(long, env = "LAUNDETH_DB")]
    db_path: Option<PathBuf>,

    /// local ledger database
    #[arg(long, env = "LAUNDETH_LEDGER_DB", default_value = "./laundeth-ledger.db")]
    ledger_db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a config file
    Init {
        /// Address allowed to publish roots
        #[arg(long)]
        publisher: Address,
        /// Merkle depth, must match the circuit
        #[arg(long, default_value_t = laundeth_pool::config::DEFAULT_TREE_DEPTH)]
        depth: u8,
        /// Denomination in base units
        #[arg(long)]
        denomination: Option<u128>,
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Create a random deposit note
    Note {
        /// Where to write the note
        #[arg(short, long, default_value = "note.json")]
        output: PathBuf,
    },

    /// Mint local ledger funds
    Fund {
        #[arg(long)]
        account: Address,
        /// Amount in base units
        #[arg(long)]
        amount: u128,
    },

    /// Deposit one denomination
    Deposit {
        /// Paying account
        #[arg(long)]
        from: Address,
        /// Note file to deposit
        #[arg(long, conflicts_with = "commitment")]
        note: Option<PathBuf>,
        /// Raw commitment, if the note lives elsewhere
        #[arg(long)]
        commitment: Option<Commitment>,
    },

    /// Publish a root
    Publish {
        #[arg(long)]
        publisher: Address,
        /// Root to publish; defaults to the current root
        #[arg(long)]
        root: Option<Root>,
    },

    /// Write witness arguments for a note
    Witness {
        #[arg(long, default_value = "note.json")]
        note: PathBuf,
        /// Published root to prove against; defaults to the latest
        #[arg(long)]
        root: Option<Root>,
        /// Argument file for `zokrates compute-witness -a`
        #[arg(short, long, default_value = "input.txt")]
        output: PathBuf,
    },

    /// Redeem a proof
    Withdraw {
        /// Recipient account
        #[arg(long)]
        to: Address,
        /// zokrates proof.json
        #[arg(long, default_value = "proof.json")]
        proof: PathBuf,
        /// zokrates verification key
        #[arg(long, default_value = "verification.key")]
        vk: PathBuf,
        /// zokrates binary
        #[arg(long, env = "ZOKRATES_BIN", default_value = "zokrates")]
        zokrates: PathBuf,
    },

    /// Show pool state
    Status,

    /// List unresolved payments, or mark one as settled
    Reconcile {
        /// Nullifier hash of the settled withdrawal
        #[arg(long)]
        nullifier: Option<Nullifier>,
    },

    /// Run deposit, publish and withdraw in memory
    Demo {
        /// Number of deposits
        #[arg(long, default_value_t = 3)]
        deposits: u8,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "laundeth=info,laundeth_pool=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            publisher,
            depth,
            denomination,
            force,
        } => cmd_init(&cli.config, publisher, depth, denomination, force),
        Commands::Note { ref output } => cmd_note(output),
        Commands::Fund { account, amount } => {
            let ledger = SledLedger::open(&cli.ledger_db).context("failed to open ledger")?;
            let balance = ledger.mint(&account, Amount::new(amount))?;
            println!("{} now holds {}", account, balance);
            Ok(())
        }
        Commands::Demo { deposits } => cmd_demo(deposits).await,
        ref command => {
            let config = load_config(&cli.config, cli.db_path.as_deref())?;
            let ledger = Arc::new(SledLedger::open(&cli.ledger_db).context("failed to open ledger")?);
            run(command, config, ledger).await
        }
    }
}

/// commands that operate on the persistent pool
async fn run(command: &Commands, config: PoolConfig, ledger: Arc<SledLedger>) -> Result<()> {
    match command {
        Commands::Withdraw {
            to,
            proof,
            vk,
            zokrates,
        } => {
            let vk = VerificationKey(
                std::fs::read(vk).with_context(|| format!("failed to read verification key: {}", vk.display()))?,
            );
            let json = std::fs::read_to_string(proof)
                .with_context(|| format!("failed to read proof: {}", proof.display()))?;
            let bundle = ProofBundle::from_zokrates_json(&json, config.protocol)?;

            let pool = open_pool(config, vk, ZokratesVerifier::new(zokrates), ledger)?;
            match pool.withdraw(*to, &bundle).await {
                Ok(record) => {
                    println!("paid {} to {}", record.amount, record.recipient);
                    println!("nullifier: {}", record.nullifier);
                    Ok(())
                }
                Err(e) => {
                    if let Some(record) = e.unresolved_record() {
                        warn!(
                            nullifier = %record.nullifier,
                            "withdrawal accepted but not paid; run `laundeth reconcile` after settling"
                        );
                    }
                    Err(e.into())
                }
            }
        }
        other => {
            // no proof checks outside withdraw
            let pool = open_pool(config, VerificationKey::default(), DigestVerifier, ledger)?;
            run_offline(other, &pool).await
        }
    }
}

async fn run_offline<V: ProofVerifier>(command: &Commands, pool: &ShieldedPool<V, SledLedger>) -> Result<()> {
    match command {
        Commands::Deposit {
            from,
            note,
            commitment,
        } => {
            let commitment = match (note, commitment) {
                (Some(path), _) => read_note(path)?.commitment(),
                (None, Some(commitment)) => *commitment,
                (None, None) => bail!("either --note or --commitment is required"),
            };
            match pool.deposit(*from, commitment).await {
                Ok(index) => println!("deposited {} at leaf {}", commitment, index),
                Err(e) if e.is_benign() => println!("already deposited: {}", commitment),
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Publish { publisher, root } => {
            let entry = match root {
                Some(root) => pool.publish(*root, *publisher)?,
                None => pool.publish_root(*publisher)?,
            };
            println!("root #{}: {} ({} leaves)", entry.seq, entry.root, entry.leaf_count);
        }
        Commands::Witness { note, root, output } => {
            let note = read_note(note)?;
            let root = match root {
                Some(root) => *root,
                None => pool.latest_root().ok_or_else(|| anyhow!("no root published yet"))?,
            };
            let witness = pool.membership_witness(&note.commitment(), &root)?;
            let input = CircuitInput::new(&note, &witness)?;
            std::fs::write(output, input.to_lines().join("\n") + "\n")
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!("wrote {} arguments to {}", input.to_args().len(), output.display());
            println!("leaf {} under root {}", witness.leaf_index, witness.root);
        }
        Commands::Status => {
            let status = pool.status()?;
            println!("leaves:      {}/{}", status.leaf_count, status.capacity);
            println!("current:     {}", status.current_root);
            match status.latest {
                Some(entry) => println!("published:   #{} {} ({} leaves)", entry.seq, entry.root, entry.leaf_count),
                None => println!("published:   none"),
            }
            println!("roots:       {}", status.published);
            println!("spent:       {}", status.spent);
            println!("unresolved:  {}", status.unresolved);
        }
        Commands::Reconcile { nullifier } => match nullifier {
            Some(nullifier) => {
                let record = pool.mark_reconciled(nullifier)?;
                println!("reconciled {} ({} to {})", nullifier, record.amount, record.recipient);
            }
            None => {
                let unresolved = pool.unresolved_payments()?;
                if unresolved.is_empty() {
                    println!("no unresolved payments");
                }
                for (record, reason) in unresolved {
                    println!("{} {} to {}: {}", record.nullifier, record.amount, record.recipient, reason);
                }
            }
        },
        other => bail!("unexpected command {:?}", other),
    }
    pool.flush()?;
    Ok(())
}

fn open_pool<V: ProofVerifier>(
    config: PoolConfig,
    vk: VerificationKey,
    verifier: V,
    ledger: Arc<SledLedger>,
) -> Result<ShieldedPool<V, SledLedger>> {
    let storage = Storage::open(&config.db_path)
        .with_context(|| format!("failed to open pool database: {}", config.db_path.display()))?;
    Ok(ShieldedPool::open(config, storage, vk, verifier, ledger)?)
}

fn load_config(path: &Path, db_override: Option<&Path>) -> Result<PoolConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {} (run `laundeth init`)", path.display()))?;
    let mut config: PoolConfig =
        toml::from_str(&contents).with_context(|| format!("failed to parse config file: {}", path.display()))?;
    if let Some(db_path) = db_override {
        config.db_path = db_path.to_path_buf();
    }
    config.validate()?;
    Ok(config)
}

fn cmd_init(path: &Path, publisher: Address, depth: u8, denomination: Option<u128>, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} exists, pass --force to overwrite", path.display());
    }
    let mut config = PoolConfig::new(publisher);
    config.tree_depth = depth;
    if let Some(denomination) = denomination {
        config.denomination = Amount::new(denomination);
    }
    config.validate()?;

    std::fs::write(path, toml::to_string_pretty(&config)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("wrote config to {}", path.display());
    Ok(())
}

fn cmd_note(output: &Path) -> Result<()> {
    if output.exists() {
        bail!("{} exists, refusing to overwrite a note", output.display());
    }
    let note = DepositNote::random(&mut rand::rngs::OsRng);
    std::fs::write(output, serde_json::to_string_pretty(&note)?)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("commitment: {}", note.commitment());
    println!("note written to {} (keep it private)", output.display());
    Ok(())
}

fn read_note(path: &Path) -> Result<DepositNote> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read note: {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("failed to parse note: {}", path.display()))
}

/// deposit, publish and withdraw against a throwaway pool
async fn cmd_demo(deposits: u8) -> Result<()> {
    let operator = Address([0xaa; 20]);
    let depositor = Address([0x01; 20]);
    let recipient = Address([0x02; 20]);

    let mut config = PoolConfig::new(operator);
    config.tree_depth = 8;
    let vk = VerificationKey(b"laundeth-demo".to_vec());
    let ledger = Arc::new(MemoryLedger::new());
    ledger.fund(depositor, Amount::new(u128::from(deposits.max(1)) * config.denomination.0));

    let pool = ShieldedPool::open(config, Storage::temporary()?, vk.clone(), DigestVerifier, ledger.clone())?;

    let mut rng = rand::thread_rng();
    let notes: Vec<DepositNote> = (0..deposits.max(1)).map(|_| DepositNote::random(&mut rng)).collect();
    for note in &notes {
        let index = pool.deposit(depositor, note.commitment()).await?;
        info!(index = index.0, "demo deposit");
    }
    let entry = pool.publish_root(operator)?;

    let note = &notes[0];
    let witness = pool.membership_witness(&note.commitment(), &entry.root)?;
    let input = CircuitInput::new(note, &witness)?;
    info!(args = input.to_args().len(), "circuit input ready");

    let inputs = PublicInputs::for_statement(ProtocolVersion::V1, &witness.root, &note.nullifier_hash());
    let bundle = ProofBundle::new(DigestVerifier::prove(&inputs, &vk), inputs);
    let record = pool.withdraw(recipient, &bundle).await?;
    println!("withdrew {} to {} via root #{}", record.amount, record.recipient, record.root_seq);

    match pool.withdraw(recipient, &bundle).await {
        Err(e) => println!("replay refused: {}", e),
        Ok(_) => bail!("replay was accepted"),
    }

    let status = pool.status()?;
    println!(
        "leaves {}, roots {}, spent {}, recipient balance {}",
        status.leaf_count,
        status.published,
        status.spent,
        ledger.balance(&recipient)
    );
    Ok(())
}
