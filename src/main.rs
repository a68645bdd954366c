//! sqlcmdr - run SQL batches and inspect PostgreSQL schemas from the shell.

use serde::Serialize;
use sqlcmdr::cli::{
    interrupt_action, read_sql, Cli, Command, Interrupt, SettingsAction, INTERRUPTED_EXIT_CODE,
};
use sqlcmdr::config::Settings;
use sqlcmdr::db::{MetadataService, QueryRequest};
use sqlcmdr::error::{Result, SqlCmdrError};
use sqlcmdr::logging;
use sqlcmdr::query::QueryExecutor;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse_args();

    if cli.log_file {
        logging::init_file_logging(cli.log_level());
    } else {
        logging::init_stderr_logging(cli.log_level());
    }

    match run(&cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{}: {}", e.category(), e);
            if cli.log_file {
                eprintln!("{}: {}", e.category(), e);
            }
            match e {
                SqlCmdrError::InvalidArgument(_) | SqlCmdrError::Config(_) => ExitCode::from(2),
                _ => ExitCode::from(1),
            }
        }
    }
}

/// Runs the selected command. Returns whether the operation succeeded.
async fn run(cli: &Cli) -> Result<bool> {
    let config_path = cli.config_path();
    let settings = cli.resolve_settings()?;

    match &cli.command {
        Command::Test => {
            let connection_string = settings.connection.to_connection_string()?;
            info!("Testing {}", settings.connection.display_string());

            let result = MetadataService::new()
                .test_connection(&connection_string)
                .await?;
            print_json(&result)?;
            Ok(result.success)
        }
        Command::Schema => {
            let connection_string = settings.connection.to_connection_string()?;

            let metadata = MetadataService::new()
                .get_metadata(&connection_string)
                .await?;
            print_json(&metadata)?;
            eprintln!("{}", metadata.summary());
            Ok(true)
        }
        Command::Query { sql, file, limit } => {
            let connection_string = settings.connection.to_connection_string()?;
            let sql = read_sql(sql.as_deref(), file.as_deref())?;

            let mut request = QueryRequest::new(sql).or_result_limit(settings.default_result_limit);
            if let Some(limit) = limit {
                request = request.with_result_limit(*limit);
            }

            let response = run_query(&connection_string, &request).await?;
            print_json(&response)?;
            Ok(response.success)
        }
        Command::Settings { action } => match action {
            SettingsAction::Show => {
                print_toml(&settings)?;
                Ok(true)
            }
            SettingsAction::Save => {
                settings.save(&config_path)?;
                eprintln!("Saved settings to {}", config_path.display());
                Ok(true)
            }
            SettingsAction::Delete => {
                if Settings::delete(&config_path)? {
                    eprintln!("Deleted {}", config_path.display());
                } else {
                    eprintln!("No settings file at {}", config_path.display());
                }
                Ok(true)
            }
        },
    }
}

/// Runs a query. The first Ctrl-C cancels it, a second one exits.
async fn run_query(
    connection_string: &str,
    request: &QueryRequest,
) -> Result<sqlcmdr::db::QueryResponse> {
    let executor = Arc::new(QueryExecutor::new());
    let token = CancellationToken::new();

    let interrupt = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move {
            let mut count = 0;
            while tokio::signal::ctrl_c().await.is_ok() {
                count += 1;
                match interrupt_action(count) {
                    Interrupt::CancelQuery => {
                        warn!("Interrupted; cancelling query (Ctrl-C again to exit)");
                        executor.cancel_current();
                    }
                    Interrupt::Exit => {
                        warn!("Interrupted again; exiting");
                        std::process::exit(INTERRUPTED_EXIT_CODE);
                    }
                }
            }
        })
    };

    let response = executor.execute(connection_string, request, &token).await;
    interrupt.abort();
    response
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| SqlCmdrError::internal(format!("Failed to serialize output: {e}")))?;
    println!("{json}");
    Ok(())
}

/// Prints settings with the password masked.
fn print_toml(settings: &Settings) -> Result<()> {
    let mut shown = settings.clone();
    if shown.connection.password.is_some() {
        shown.connection.password = Some("********".to_string());
    }
    if shown.connection.connection_string.is_some() {
        shown.connection.connection_string = shown
            .connection
            .to_connection_string()
            .ok()
            .map(|s| mask_password(&s));
    }

    let text = toml::to_string_pretty(&shown)
        .map_err(|e| SqlCmdrError::internal(format!("Failed to serialize settings: {e}")))?;
    print!("{text}");
    Ok(())
}

fn mask_password(connection_string: &str) -> String {
    match url::Url::parse(connection_string) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("********"));
            url.to_string()
        }
        _ => connection_string.to_string(),
    }
}
