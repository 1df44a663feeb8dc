//! Vellum administration shell
//!
//! Opens a repository on the configured backend and runs commands read
//! line by line from standard input.

use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tracing::{error, info};
use vellum::{CancelFlag, MemoryStorage, ObjectStore, Repository};

mod commands;
mod config;
mod error;

use commands::{Command, Session};
use config::{ShellConfig, StorageKind};
use error::{Result, ShellError};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    let config = ShellConfig::from_env()?;

    let default_filter = if config.debug {
        "vellum=debug,vellum_shell=debug"
    } else {
        "vellum=info,vellum_shell=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(
        storage = ?config.storage,
        actor = %config.actor,
        project = %config.project,
        "Starting vellum shell"
    );

    let repository = Repository::open(open_storage(&config).await?).await?;
    let mut session = Session::new(repository, &config.actor, &config.project)?;
    run(&mut session).await
}

async fn open_storage(config: &ShellConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.storage {
        StorageKind::Memory => Ok(Arc::new(MemoryStorage::new())),
        StorageKind::Fs => {
            let storage = vellum::FileStorage::new(&config.data_dir).await?;
            info!(path = %config.data_dir.display(), "Using directory storage");
            Ok(Arc::new(storage))
        }
        #[cfg(feature = "sqlite")]
        StorageKind::Sqlite => {
            let storage = vellum::SqliteStorage::new(&config.database_url).await?;
            info!(url = %config.database_url, "Using SQLite storage");
            Ok(Arc::new(storage))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageKind::Sqlite => Err(ShellError::Config(
            "SQLite storage requires the `sqlite` feature".to_string(),
        )),
    }
}

async fn run(session: &mut Session) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(session.prompt().as_bytes()).await?;
        stdout.flush().await?;

        // Ctrl-C at the prompt ends the session
        let Some(line) = next_line(&mut lines, tokio::signal::ctrl_c()).await? else {
            break;
        };
        let command = match Command::parse(&line) {
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        // Ctrl-C stops a running publish between resources
        let cancel = CancelFlag::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };
        let result = session.execute(command, cancel).await;
        watcher.abort();

        match result {
            Ok(output) if output.is_empty() => {}
            Ok(output) => println!("{}", output),
            Err(e) if e.is_fatal() => {
                error!(error = %e, "Stopping shell");
                return Err(e);
            }
            Err(e) => println!("error: {}", e),
        }
    }

    println!();
    info!(actor = %session.context().actor, "Shell closed");
    Ok(())
}

/// The next input line, or `None` at end of input or once `interrupt` fires
async fn next_line<R, F, T>(lines: &mut Lines<R>, interrupt: F) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = T>,
{
    tokio::select! {
        line = lines.next_line() => Ok(line?),
        _ = interrupt => Ok(None),
    }
}
