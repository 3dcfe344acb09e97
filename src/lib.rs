//! Evidence Store: task-scoped attribute container storage for forensic
//! extraction pipelines.
//!
//! Many worker processes parse evidence independently and each writes its
//! output (events, event data, warnings, reports) into its own task store.
//! A coordinator later folds every finished task store into one session
//! store, in chronological order, exactly once.
//!
//! # Task lifecycle
//!
//! - **unfinalized**: the worker is writing; the task lives only in its own keys
//! - **finalized**: the worker closed its writer; the task sits in the session's finalized set
//! - **merging**: a coordinator claimed it with one atomic finalized -> merging move
//! - **removed**: the merge finished and every key of the task is gone
//!
//! # Backends
//!
//! - Key-value task storage ([`storage::kv`]): hashes plus a sorted event
//!   index behind the [`storage::kv::KeyValueClient`] trait, shared by all
//!   workers through a SQLite database file or kept in memory.
//! - File storage ([`storage::sqlite`]): one SQLite file per session (and
//!   optionally per task), with a time-range aware event index.
//!
//! # Crate Structure
//!
//! - [`core`]: errors, configuration, identifiers, containers, serializer
//! - [`storage`]: store interface, facades, backends, merge and lifecycle

mod cli;
pub mod core;
pub mod storage;

use crate::cli::{Cli, Command, OutputFormat};
use crate::core::config::{CoordinatorConfig, StoreConfig, load_store_config};
use crate::core::containers::CONTAINER_TYPE_SESSION_START;
use crate::core::session::Session;
use crate::storage::facade::StorageWriter;
use crate::storage::kv::SqliteKvClient;
use crate::storage::lifecycle::TaskCoordinator;
use crate::storage::sqlite::SqliteStorageWriter;
use crate::storage::AttributeContainerStore;
use clap::Parser;
use serde_json::json;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub use crate::core::error::{StorageError, StorageResult};

/// Environment variable holding the log filter directive.
pub const LOG_ENV_VAR: &str = "EVIDENCE_STORE_LOG";

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));
    // A subscriber may already be installed when embedded; keep that one.
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .try_init();
}

fn connect(config: &StoreConfig) -> StorageResult<SqliteKvClient> {
    SqliteKvClient::connect(&config.connection)
}

fn coordinator(
    config: &StoreConfig,
    session: &str,
) -> StorageResult<TaskCoordinator<SqliteKvClient>> {
    Ok(TaskCoordinator::new(connect(config)?, session)?
        .with_config(&config.coordinator)
        .with_page_size(config.storage.page_size))
}

fn print_task_list(format: OutputFormat, label: &str, session: &str, tasks: &[String]) {
    match format {
        OutputFormat::Json => {
            println!("{}", json!({ "session": session, label: tasks }));
        }
        OutputFormat::Text => {
            if tasks.is_empty() {
                println!("No {} tasks in session {}", label, session);
            }
            for task in tasks {
                println!("{}", task);
            }
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = load_store_config(&cli.config)?;
    if let Some(database) = cli.database {
        config.connection.path = database;
    }

    match cli.command {
        Command::Scan { session } => {
            let tasks: Vec<String> = coordinator(&config, &session)?
                .scan_for_processed_tasks()?
                .into_iter()
                .collect();
            print_task_list(cli.format, "finalized", &session, &tasks);
        }
        Command::Status { session, task } => {
            let coordinator = coordinator(&config, &session)?;
            let states = match task {
                Some(task) => {
                    let state = coordinator.task_state(&task)?;
                    vec![(task, state)]
                }
                None => coordinator.task_states()?,
            };
            match cli.format {
                OutputFormat::Json => {
                    let tasks: Vec<_> = states
                        .iter()
                        .map(|(task, state)| json!({ "task": task, "state": state }))
                        .collect();
                    println!("{}", json!({ "session": session, "tasks": tasks }));
                }
                OutputFormat::Text => {
                    for (task, state) in &states {
                        println!("{:<28} {}", task, state);
                    }
                }
            }
        }
        Command::Merge {
            session,
            output,
            max_idle_polls,
        } => {
            let coordinator = coordinator(&config, &session)?;
            let mut writer = SqliteStorageWriter::for_session(&output, config.connection.timeout());
            writer.open()?;
            if !writer.store()?.has_containers(CONTAINER_TYPE_SESSION_START)? {
                writer.write_session_start(&Session::with_identifier(&session)?)?;
            }
            let merged = coordinator.merge_pending_tasks(&mut writer, max_idle_polls);
            writer.close()?;
            let merged = merged?;
            match cli.format {
                OutputFormat::Json => {
                    println!("{}", json!({ "session": session, "merged": merged }));
                }
                OutputFormat::Text => {
                    for task in &merged {
                        println!(
                            "{}: {} events, {} containers",
                            task.task_identifier,
                            task.summary.events,
                            task.summary.total()
                        );
                    }
                    println!("Merged {} task(s) into {}", merged.len(), output.display());
                }
            }
        }
        Command::Recover { session, task } => {
            let coordinator = coordinator(&config, &session)?;
            match task {
                Some(task) => {
                    coordinator.reset_merging_task(&task)?;
                    match cli.format {
                        OutputFormat::Json => {
                            println!("{}", json!({ "session": session, "reset": task }));
                        }
                        OutputFormat::Text => println!("Returned {} to the finalized set", task),
                    }
                }
                None => {
                    let tasks: Vec<String> =
                        coordinator.scan_for_merging_tasks()?.into_iter().collect();
                    print_task_list(cli.format, "merging", &session, &tasks);
                }
            }
        }
        Command::Sweep {
            session,
            max_age_secs,
        } => {
            let coordinator_config = CoordinatorConfig {
                stale_task_age_secs: max_age_secs.unwrap_or(config.coordinator.stale_task_age_secs),
                ..config.coordinator.clone()
            };
            let removed = coordinator(&config, &session)?
                .with_config(&coordinator_config)
                .sweep_stale_tasks()?;
            print_task_list(cli.format, "swept", &session, &removed);
        }
    }
    Ok(())
}
