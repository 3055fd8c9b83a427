use std::collections::HashSet;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};

use aquamon_service::audit;
use aquamon_service::config::{AppConfig, DEFAULT_CONFIG_PATH};
use aquamon_service::identity::IdentityVerifier;
use aquamon_service::logging::{self, Component};
use aquamon_service::model::{Parameter, PoolReading};
use aquamon_service::monitor::{NotifyOutcome, ReadingMonitor};
use aquamon_service::pools::PoolService;
use aquamon_service::store::{PgStore, PoolStore};

#[derive(Parser, Debug)]
#[command(name = "aquamon", version, about = "Pool water-quality monitor")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record one reading, classify it and alert the owner if needed.
    ///
    /// Alert windows are kept in the database, so repeated runs honour the
    /// subscriber's notification mode.
    Ingest {
        #[arg(long)]
        pool: String,
        #[arg(long)]
        token: String,
        #[arg(long, value_parser = finite_f64)]
        ph: f64,
        #[arg(long, value_parser = finite_f64)]
        chlorine: f64,
        #[arg(long, value_parser = finite_f64)]
        temperature: f64,
    },
    /// Print the configured bands of a pool.
    Thresholds {
        #[arg(long)]
        pool: String,
        #[arg(long)]
        token: String,
    },
    /// Print the most recent readings of a pool, oldest first.
    History {
        #[arg(long)]
        pool: String,
        #[arg(long)]
        token: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Create a pool owned by the caller, with the default bands.
    CreatePool {
        #[arg(long)]
        name: String,
        #[arg(long)]
        token: String,
    },
    /// List the caller's pools.
    Pools {
        #[arg(long)]
        token: String,
    },
    /// Print recent audit entries for the caller and their pools.
    Audit {
        #[arg(long)]
        token: String,
        #[arg(long)]
        limit: Option<usize>,
    },
}

/// Parses a measurement, refusing `NaN` and infinities.
fn finite_f64(raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("{:?} is not a number", raw))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("{:?} is not a finite number", raw))
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    logging::init_logger(
        config.log_level()?,
        config.logging.file.as_deref(),
        config.logging.console_timestamps,
    )?;

    let database_url = config
        .database_url
        .clone()
        .ok_or("DATABASE_URL must be set (environment or .env)")?;
    let store = Arc::new(PgStore::connect_and_migrate(&database_url)?);
    let verifier = config.token_verifier();

    match cli.command {
        Command::Ingest {
            pool,
            token,
            ph,
            chlorine,
            temperature,
        } => {
            let monitor = ReadingMonitor::with_store_throttle(
                Arc::clone(&store),
                config.build_mailer()?,
                config.classification_policy()?,
            );
            let reading = PoolReading {
                ph,
                free_chlorine: chlorine,
                temperature_c: temperature,
                measured_at: Utc::now(),
            };
            let outcome = monitor.process_with_token(&verifier, &token, &pool, reading)?;

            println!("Pool {}: {}", outcome.pool_id, outcome.status);
            for eval in &outcome.evaluation.parameters {
                let band = eval
                    .band
                    .map(|b| b.to_string())
                    .unwrap_or_else(|| "no band".to_string());
                println!(
                    "  {:<14} {:>7.2} {:<4} [{}] {}",
                    eval.parameter,
                    eval.value,
                    eval.parameter.unit(),
                    band,
                    eval.classification
                );
            }
            match outcome.notification {
                NotifyOutcome::NotNeeded => {}
                NotifyOutcome::NoRecipient => println!("No subscriber to notify"),
                NotifyOutcome::Suppressed => println!("Alert suppressed by notification mode"),
                NotifyOutcome::Sent { recipient } => println!("Alert sent to {}", recipient),
                NotifyOutcome::DeliveryFailed { recipient, reason, .. } => {
                    println!("Alert to {} failed: {}", recipient, reason)
                }
            }
        }
        Command::Thresholds { pool, token } => {
            let subject = verifier.verify(&token)?;
            let service = PoolService::new(Arc::clone(&store), config.default_thresholds());
            match service.load_thresholds(&subject.subject_id, &pool)? {
                Some(record) => {
                    for parameter in Parameter::ALL {
                        println!(
                            "{:<14} {} {}",
                            parameter,
                            record.thresholds.band(parameter),
                            parameter.unit()
                        );
                    }
                    println!(
                        "version {} updated {}{}",
                        record.version,
                        record.updated_at.format("%Y-%m-%d %H:%M UTC"),
                        record
                            .modified_by
                            .map(|by| format!(" by {}", by))
                            .unwrap_or_default()
                    );
                }
                None => println!("No thresholds configured for pool {}", pool),
            }
        }
        Command::History { pool, token, limit } => {
            let subject = verifier.verify(&token)?;
            let service = PoolService::new(Arc::clone(&store), config.default_thresholds());
            let readings = service.history(&subject.subject_id, &pool, limit)?;
            if readings.is_empty() {
                println!("No readings recorded for pool {}", pool);
            }
            for r in readings {
                println!(
                    "{}  pH {:>5.2}  Cl {:>5.2} ppm  {:>5.1} °C",
                    r.measured_at.format("%Y-%m-%d %H:%M:%S"),
                    r.ph,
                    r.free_chlorine,
                    r.temperature_c
                );
            }
        }
        Command::CreatePool { name, token } => {
            let subject = verifier.verify(&token)?;
            let service = PoolService::new(Arc::clone(&store), config.default_thresholds());
            let pool = service.create_pool(&subject.subject_id, &name)?;
            logging::info(Component::System, Some(&pool.id), "Pool created from CLI");
            println!("{}", pool.id);
        }
        Command::Pools { token } => {
            let subject = verifier.verify(&token)?;
            let service = PoolService::new(Arc::clone(&store), config.default_thresholds());
            for pool in service.list_pools(&subject.subject_id)? {
                let last = store
                    .latest_reading(&pool.id)?
                    .map(|r| r.measured_at.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!("{}  {:<8}  last reading {}  {}", pool.id, pool.status, last, pool.name);
            }
        }
        Command::Audit { token, limit } => {
            let subject = verifier.verify(&token)?;
            let service = PoolService::new(Arc::clone(&store), config.default_thresholds());
            let owned: HashSet<String> = service
                .list_pools(&subject.subject_id)?
                .into_iter()
                .map(|p| p.id)
                .collect();
            let entries = audit::recent(&*store, limit)?;
            for entry in entries.iter().filter(|e| {
                e.user_id.as_deref() == Some(subject.subject_id.as_str())
                    || e.pool_id.as_ref().is_some_and(|id| owned.contains(id))
            }) {
                println!(
                    "{}  {:<10}  {:<22}  {}",
                    entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.module,
                    entry.action,
                    entry.detail
                );
            }
        }
    }

    Ok(())
}
