use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crdb_adapter::db::AdapterConfig;
use crdb_adapter::dialect::Capability;
use crdb_adapter::{Adapter, DialectRegistry, Duration};

/// Inspect a CockroachDB schema through the dialect adapter
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Dialect name or alias, overriding the config file
    #[arg(long, global = true)]
    dialect: Option<String>,

    #[arg(long, global = true)]
    host: Option<String>,

    #[arg(long, global = true)]
    port: Option<u16>,

    #[arg(long, global = true)]
    database: Option<String>,

    #[arg(long, global = true)]
    user: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List secondary indexes of a table
    Indexes { table: String },
    /// List foreign keys of a table
    ForeignKeys { table: String },
    /// List primary key columns of a table
    PrimaryKeys { table: String },
    /// List check constraints of a table
    Checks { table: String },
    /// List columns of a table
    Columns { table: String },
    /// List tables in a schema (search path by default)
    Tables {
        #[arg(long)]
        schema: Option<String>,
    },
    /// Print the engine's CREATE TABLE statement
    ShowCreate { table: String },
    /// Parse an interval and print its normalized form
    Interval {
        text: String,
        /// Fractional-second digits to keep
        #[arg(long)]
        precision: Option<u32>,
    },
    /// Print the resolved capability table
    Capabilities,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => AdapterConfig::load_from(path),
        None => AdapterConfig::load(),
    }
    .context("Failed to load configuration")?;
    apply_overrides(&cli, &mut config);

    let registry = DialectRegistry::with_builtin();

    match &cli.command {
        Command::Interval { text, precision } => {
            let duration = Duration::parse(text)?;
            if cli.json {
                print_json(&duration.round(precision.unwrap_or(crdb_adapter::interval::DEFAULT_PRECISION)))?;
            } else {
                println!("{}", duration.to_sql_text(*precision));
            }
            return Ok(());
        }
        Command::Capabilities => {
            let dialect = registry
                .resolve_with(&config.dialect, &config.capabilities)
                .context("Failed to resolve dialect")?;
            let caps = dialect.capabilities();
            if cli.json {
                print_json(caps.as_ref())?;
            } else {
                println!("dialect: {}", dialect.name());
                for capability in Capability::ALL {
                    println!("  {:<32} {}", capability.name(), caps.capability(capability));
                }
            }
            return Ok(());
        }
        _ => {}
    }

    resolve_password(&mut config)?;
    let adapter = Adapter::connect(&config, &registry)
        .await
        .with_context(|| format!("Failed to connect to {}", config.connection.display_string()))?;
    let schema = adapter.introspector();

    match &cli.command {
        Command::Indexes { table } => {
            let indexes = schema.list_indexes(table).await?;
            if cli.json {
                print_json(&indexes)?;
            } else {
                for index in &indexes {
                    let unique = if index.unique { "UNIQUE " } else { "" };
                    let cols = match &index.columns {
                        crdb_adapter::db::IndexColumns::Names(cols) => cols
                            .iter()
                            .map(|c| match c.order {
                                crdb_adapter::db::SortOrder::Desc => format!("{} DESC", c.name),
                                crdb_adapter::db::SortOrder::Asc => c.name.clone(),
                            })
                            .collect::<Vec<_>>()
                            .join(", "),
                        crdb_adapter::db::IndexColumns::Expression(expr) => expr.clone(),
                    };
                    print!("{}{} ({})", unique, index.name, cols);
                    if let Some(predicate) = &index.predicate {
                        print!(" WHERE {}", predicate);
                    }
                    println!();
                }
            }
        }
        Command::ForeignKeys { table } => {
            let keys = schema.list_foreign_keys(table).await?;
            if cli.json {
                print_json(&keys)?;
            } else {
                for fk in &keys {
                    println!(
                        "{}: ({}) -> {}({})",
                        fk.name,
                        fk.columns.join(", "),
                        fk.to_table,
                        fk.primary_keys.join(", ")
                    );
                }
            }
        }
        Command::PrimaryKeys { table } => {
            let keys = schema.list_primary_keys(table).await?;
            if cli.json {
                print_json(&keys)?;
            } else {
                println!("{}", keys.join(", "));
            }
        }
        Command::Checks { table } => {
            let checks = schema.list_check_constraints(table).await?;
            if cli.json {
                print_json(&checks)?;
            } else {
                for check in &checks {
                    println!("{}: {}", check.name, check.expression);
                }
            }
        }
        Command::Columns { table } => {
            let columns = schema.list_columns(table).await?;
            if cli.json {
                print_json(&columns)?;
            } else {
                for col in columns.iter().filter(|c| !c.hidden) {
                    let null = if col.nullable { "" } else { " NOT NULL" };
                    println!("{} {}{}", col.name, col.sql_type, null);
                }
            }
        }
        Command::Tables { schema: name } => {
            let tables = schema.list_tables(name.as_deref()).await?;
            if cli.json {
                print_json(&tables)?;
            } else {
                for table in &tables {
                    println!("{}", table);
                }
            }
        }
        Command::ShowCreate { table } => {
            let ddl = schema.show_create_table(table).await?;
            if cli.json {
                print_json(&ddl)?;
            } else {
                println!("{}", ddl);
            }
        }
        Command::Interval { .. } | Command::Capabilities => {}
    }

    Ok(())
}

fn apply_overrides(cli: &Cli, config: &mut AdapterConfig) {
    if let Some(dialect) = &cli.dialect {
        config.dialect = dialect.clone();
    }
    let conn = &mut config.connection;
    if let Some(host) = &cli.host {
        conn.host = host.clone();
    }
    if let Some(port) = cli.port {
        conn.port = port;
    }
    if let Some(database) = &cli.database {
        conn.database = database.clone();
    }
    if let Some(user) = &cli.user {
        conn.user = user.clone();
    }
}

/// Password from the environment, then an interactive prompt. Insecure
/// local nodes accept an empty password.
fn resolve_password(config: &mut AdapterConfig) -> Result<()> {
    if !config.connection.password.is_empty() {
        return Ok(());
    }
    for var in ["COCKROACH_PASSWORD", "PGPASSWORD"] {
        if let Ok(pw) = std::env::var(var) {
            config.connection.password = pw;
            return Ok(());
        }
    }
    if config.connection.ssl_mode != crdb_adapter::db::SslMode::Disable {
        let prompt = format!("Password for {}: ", config.connection.display_string());
        config.connection.password = rpassword::read_password_from_tty(Some(&prompt))?;
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
