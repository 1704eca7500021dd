//! askdb - ask questions of a SQLite database in plain language
//!
//! Usage:
//!   askdb --schema shop.json --database shop.db ask "How many customers are there?"
//!   askdb --introspect --database shop.db repl
//!   askdb status

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use askdb::commands::{self, SharedPipeline};
use askdb::config::Settings;
use askdb::db::connectors::sqlite::SqliteEngine;
use askdb::db::connectors::QueryEngine;
use askdb::db::registry::SchemaRegistry;
use askdb::llm::GenerationBackend;
use askdb::ollama::OllamaClient;
use askdb::pipeline::{Pipeline, QueryResult, RunOptions};

#[derive(Parser)]
#[command(name = "askdb")]
#[command(about = "Turn natural-language questions into validated SQL and run them")]
#[command(version)]
struct Cli {
    /// Path to an askdb.toml config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Schema description (JSON)
    #[arg(long, global = true, conflicts_with = "introspect")]
    schema: Option<PathBuf>,

    /// Build the schema from the database itself
    #[arg(long, global = true)]
    introspect: bool,

    /// SQLite database file (overrides config)
    #[arg(long, global = true)]
    database: Option<String>,

    /// SQL script to run after opening the database (repeatable)
    #[arg(long = "init-sql", global = true, action = ArgAction::Append)]
    init_sql: Vec<PathBuf>,

    /// Log filter, e.g. "debug" or "askdb=trace"
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single question
    Ask {
        question: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,

        /// Skip validation and run the generated SQL as-is
        #[arg(long)]
        no_validate: bool,

        /// Do not regenerate after a validation failure
        #[arg(long)]
        no_retry: bool,
    },

    /// Interactive session
    Repl,

    /// List tables in the schema
    Tables,

    /// Show columns and sample rows for a table
    Describe { table: String },

    /// Print the schema text given to the model
    Schema,

    /// Explain a SQL statement in plain language
    Explain { sql: String },

    /// Suggest related questions
    Suggest {
        question: String,

        #[arg(short, default_value_t = 3)]
        n: usize,
    },

    /// Check that the Ollama server is reachable
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Aligned table
    Text,
    /// Result envelope as JSON
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut settings = match Settings::load(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut logger = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(settings.log_level.as_str()),
    );
    if let Some(level) = &cli.log_level {
        logger.parse_filters(level);
    }
    logger.init();

    if let Some(path) = &cli.database {
        settings.database.path = path.clone();
    }
    settings.database.init_sql.extend(cli.init_sql.iter().cloned());

    match run(cli, settings).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, settings: Settings) -> anyhow::Result<ExitCode> {
    let client = Arc::new(OllamaClient::new(settings.ollama.clone()));

    if let Commands::Status = cli.command {
        return cmd_status(&client).await;
    }

    let engine = Arc::new(SqliteEngine::open(settings.database.connection_config())?);
    for script in &settings.database.init_sql {
        let sql = tokio::fs::read_to_string(script)
            .await
            .with_context(|| format!("reading {}", script.display()))?;
        engine
            .execute_script(sql)
            .await
            .with_context(|| format!("running {}", script.display()))?;
        log::info!("Ran init script {}", script.display());
    }

    let registry = match (&cli.schema, cli.introspect) {
        (Some(path), _) => SchemaRegistry::load_from_file(path)?,
        (None, true) => SchemaRegistry::introspect(engine.as_ref(), &database_name(&settings)).await?,
        (None, false) => anyhow::bail!("either --schema <file> or --introspect is required"),
    };

    let backend: Arc<dyn GenerationBackend> = client.clone();
    let engine: Arc<dyn QueryEngine> = engine;
    let pipeline = Pipeline::new(settings.pipeline_config(), Arc::new(registry), backend, engine);

    let cancel = pipeline.cancel_token();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if cancel.is_cancelled() {
                eprintln!("Interrupted twice, exiting");
                std::process::exit(130);
            }
            log::warn!("Interrupted, cancelling generation");
            cancel.cancel();
        }
    });

    let session = commands::share(pipeline);

    match cli.command {
        Commands::Ask {
            question,
            format,
            no_validate,
            no_retry,
        } => {
            let options = RunOptions {
                validate: !no_validate,
                retry_on_error: !no_retry,
            };
            let result = commands::ask(&session, &question, options)
                .await
                .map_err(anyhow::Error::msg)?;
            print_result(&result, format)?;
            Ok(if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Repl => repl(&session).await,
        Commands::Tables => {
            for table in commands::list_tables(&session).await.map_err(anyhow::Error::msg)? {
                println!("{}", table);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Describe { table } => {
            let details = commands::get_table_info(&session, &table)
                .await
                .map_err(anyhow::Error::msg)?;
            println!("{}", serde_json::to_string_pretty(&details)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Schema => {
            println!(
                "{}",
                commands::get_schema_info(&session).await.map_err(anyhow::Error::msg)?
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Explain { sql } => {
            println!(
                "{}",
                commands::explain_sql(&session, &sql).await.map_err(anyhow::Error::msg)?
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Suggest { question, n } => {
            let suggestions = commands::suggest_questions(&session, &question, n)
                .await
                .map_err(anyhow::Error::msg)?;
            for (i, s) in suggestions.iter().enumerate() {
                println!("{}. {}", i + 1, s);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status => cmd_status(&client).await,
    }
}

fn database_name(settings: &Settings) -> String {
    std::path::Path::new(&settings.database.path)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty() && *s != ":memory:")
        .unwrap_or("database")
        .to_string()
}

fn print_result(result: &QueryResult, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => print!("{}", commands::format_result(result)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(result)?),
    }
    Ok(())
}

async fn cmd_status(client: &OllamaClient) -> anyhow::Result<ExitCode> {
    let status = client.check_status().await;
    if !status.running {
        println!("Ollama is not reachable at {}", client.settings().base_url);
        return Ok(ExitCode::FAILURE);
    }

    println!("Ollama is running at {}", client.settings().base_url);
    for model in &status.models {
        println!("  {} ({} bytes)", model.name, model.size);
    }

    let wanted = &client.settings().model;
    if client.has_model(wanted).await {
        println!("Model '{}' is available", wanted);
        Ok(ExitCode::SUCCESS)
    } else {
        println!("Model '{}' is not pulled", wanted);
        Ok(ExitCode::FAILURE)
    }
}

async fn repl(session: &SharedPipeline) -> anyhow::Result<ExitCode> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Ask a question, or: tables, schema, info <table>, explain <sql>, quit");
    loop {
        stdout.write_all(b"askdb> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        let (head, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        let outcome: Result<String, String> = match head.to_lowercase().as_str() {
            "" => continue,
            "quit" | "exit" => break,
            "tables" => commands::list_tables(session).await.map(|t| t.join("\n")),
            "schema" => commands::get_schema_info(session).await,
            "info" if !rest.is_empty() => commands::get_table_info(session, rest)
                .await
                .and_then(|d| serde_json::to_string_pretty(&d).map_err(|e| e.to_string())),
            "explain" if !rest.is_empty() => {
                session.lock().await.cancel_token().reset();
                commands::explain_sql(session, rest).await
            }
            _ => {
                session.lock().await.cancel_token().reset();
                commands::ask(session, line, RunOptions::default())
                    .await
                    .map(|r| commands::format_result(&r))
            }
        };

        match outcome {
            Ok(text) => println!("{}", text.trim_end()),
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    Ok(ExitCode::SUCCESS)
}
