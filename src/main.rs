//! Spinledger console
//!
//! Thin front end over the wager engine and the in-memory store.

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use spinledger::errors::WagerError;
use spinledger::games::{theoretical_rtp, RandomSource, SeededRandomSource, ThreadRandomSource};
use spinledger::{logging, ConfigLoader, EngineConfig, MemoryStore, WagerOrchestrator};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "spinledger")]
#[command(about = "Three-reel wager engine console", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Seed for reproducible reels (overrides config)
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Print results as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play a number of rounds against a fresh account
    Play {
        #[arg(long, default_value = "100")]
        balance: Decimal,

        #[arg(long, default_value = "10")]
        wager: Decimal,

        #[arg(long, default_value = "10")]
        rounds: u32,
    },
    /// Run many spins and compare the observed return with the theoretical one
    Simulate {
        #[arg(long, default_value = "100000")]
        spins: u32,

        #[arg(long, default_value = "1")]
        wager: Decimal,
    },
    /// Print the theoretical return to player
    Rtp,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;
    if let Some(seed) = args.seed {
        config.game.rng_seed = Some(seed);
    }
    if matches!(args.command, Command::Simulate { .. }) && config.logging.filter.is_none() {
        config.logging.filter = Some("spinledger=warn".to_string());
    }
    logging::init(&config.logging).map_err(|e| e.to_string())?;

    let source: Arc<dyn RandomSource> = match config.game.rng_seed {
        Some(seed) => Arc::new(SeededRandomSource::new(seed)),
        None => Arc::new(ThreadRandomSource),
    };

    match args.command {
        Command::Play { balance, wager, rounds } => {
            play(&config, source, balance, wager, rounds, args.json).await?
        }
        Command::Simulate { spins, wager } => {
            simulate(&config, source, spins, wager, args.json).await?
        }
        Command::Rtp => {
            let rtp = theoretical_rtp();
            if args.json {
                println!("{}", serde_json::json!({ "rtp": rtp }));
            } else {
                println!("Theoretical RTP: {}%", (rtp * Decimal::ONE_HUNDRED).round_dp(4));
            }
        }
    }

    Ok(())
}

async fn play(
    config: &EngineConfig,
    source: Arc<dyn RandomSource>,
    balance: Decimal,
    wager: Decimal,
    rounds: u32,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = MemoryStore::new();
    let account = store.accounts.open_account(Decimal::ZERO);
    let orchestrator = WagerOrchestrator::in_memory(&store, source, config);
    if balance > Decimal::ZERO {
        orchestrator.deposit(account, balance).await?;
    }

    for round in 1..=rounds {
        match orchestrator.place_wager(account, wager).await {
            Ok(result) => {
                if json {
                    println!("{}", serde_json::to_string(&result)?);
                } else {
                    let (a, b, c) = result.symbols;
                    let verdict = if result.is_win {
                        format!("WIN {}", result.payout_amount)
                    } else {
                        "no win".to_string()
                    };
                    println!(
                        "#{:<4} [{} {} {}]  {:<12} balance {}",
                        round, a, b, c, verdict, result.balance
                    );
                }
            }
            Err(WagerError::InsufficientFunds { balance, .. }) => {
                println!("Out of funds after {} rounds (balance {})", round - 1, balance);
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    if !json {
        println!("Final balance: {}", orchestrator.balance(account).await?);
    }
    Ok(())
}

async fn simulate(
    config: &EngineConfig,
    source: Arc<dyn RandomSource>,
    spins: u32,
    wager: Decimal,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = MemoryStore::new();
    let bankroll = wager
        .checked_mul(Decimal::from(spins))
        .ok_or("wager times spins is too large")?;
    let account = store.accounts.open_account(bankroll);
    let orchestrator = WagerOrchestrator::in_memory(&store, source, config);

    let mut staked = Decimal::ZERO;
    let mut returned = Decimal::ZERO;
    let mut wins = 0u32;
    let mut symbol_counts = [0u64; 10];

    for _ in 0..spins {
        let result = match orchestrator.place_wager(account, wager).await {
            Ok(result) => result,
            Err(WagerError::InsufficientFunds { .. }) => break,
            Err(e) => return Err(e.into()),
        };
        staked += wager;
        returned += result.payout_amount;
        if result.is_win {
            wins += 1;
        }
        let (a, b, c) = result.symbols;
        for symbol in [a, b, c] {
            symbol_counts[usize::from(symbol)] += 1;
        }
    }

    let observed = if staked.is_zero() { Decimal::ZERO } else { returned / staked };
    let expected = theoretical_rtp();
    let draws: u64 = symbol_counts.iter().sum();

    if json {
        println!(
            "{}",
            serde_json::json!({
                "spins": spins,
                "staked": staked,
                "returned": returned,
                "wins": wins,
                "observed_rtp": observed,
                "theoretical_rtp": expected,
                "symbol_counts": symbol_counts,
            })
        );
        return Ok(());
    }

    println!("Spins:            {}", spins);
    println!("Staked:           {}", staked);
    println!("Returned:         {}", returned);
    println!("Hit rate:         {:.2}%", f64::from(wins) * 100.0 / f64::from(spins.max(1)));
    println!("Observed RTP:     {}%", (observed * Decimal::ONE_HUNDRED).round_dp(3));
    println!("Theoretical RTP:  {}%", (expected * Decimal::ONE_HUNDRED).round_dp(3));
    println!("Symbol frequencies:");
    for (symbol, count) in symbol_counts.iter().enumerate() {
        let share = if draws == 0 { 0.0 } else { *count as f64 * 100.0 / draws as f64 };
        println!("  {}  {:>6.2}%", symbol, share);
    }
    Ok(())
}
