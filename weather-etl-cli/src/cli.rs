use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use inquire::{CustomType, Password, Select, Text};
use tracing::info;
use weather_etl_core::{
    Config, Dialect, FailurePolicy, Location, LocationOutcome, LocationQuery, MemoryWarehouse,
    ObservationStore, OpenWeatherFetcher, PgWarehouse, Pipeline, RunReport, StoredObservation, TableName,
    WeatherFetcher,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather-etl", version, about = "Load current weather observations into a warehouse table")]
pub struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch every configured location and insert one row per observation.
    Run(RunArgs),

    /// Create the destination table if it does not exist and check its columns.
    EnsureTable,

    /// List configured locations.
    Locations,

    /// Interactively set the API key and warehouse connection.
    Configure,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Keep going when a location fails; exit non-zero at the end if any did.
    #[arg(long)]
    pub continue_on_error: bool,

    /// Fetch and normalize, but keep rows in memory and print them.
    #[arg(long)]
    pub dry_run: bool,

    /// Only ingest configured locations with this name (repeatable).
    #[arg(long = "only", value_name = "NAME")]
    pub only: Vec<String>,

    /// Ingest a single location by name query instead of the configured list.
    #[arg(long, value_name = "NAME", conflicts_with = "only")]
    pub city: Option<String>,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Run(args) => {
                let config = load_config(self.config.as_ref())?;
                run(config, args).await
            }
            Command::EnsureTable => {
                let config = load_config(self.config.as_ref())?;
                ensure_table(config).await
            }
            Command::Locations => {
                let config = load_config(self.config.as_ref())?;
                for location in &config.locations {
                    println!("{}", describe(location));
                }
                Ok(())
            }
            Command::Configure => configure(self.config),
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    config.apply_env().context("Invalid environment override")?;
    Ok(config)
}

/// Locations and failure policy for one `run` invocation.
#[derive(Debug)]
struct RunPlan {
    locations: Vec<Location>,
    policy: FailurePolicy,
    dry_run: bool,
}

fn plan_run(config: &Config, args: &RunArgs) -> Result<RunPlan> {
    let locations = match &args.city {
        Some(city) => vec![Location::named(city.clone())],
        None => config.select_locations(&args.only)?,
    };
    if locations.is_empty() {
        bail!("No locations to ingest. Check `[[locations]]` in the config file.");
    }

    let policy = if args.continue_on_error { FailurePolicy::Continue } else { config.on_error };

    Ok(RunPlan { locations, policy, dry_run: args.dry_run })
}

async fn run(config: Config, args: RunArgs) -> Result<()> {
    let plan = plan_run(&config, &args)?;
    let api_key = config.api_key()?.to_owned();
    let fetcher = OpenWeatherFetcher::new(api_key, &config.api).context("Failed to build HTTP client")?;

    info!(locations = plan.locations.len(), policy = ?plan.policy, dry_run = plan.dry_run, "starting ingestion run");

    let report = if plan.dry_run {
        let (report, lines) =
            run_in_memory(&fetcher, config.database.table.clone(), plan.policy, &plan.locations).await?;
        for line in lines {
            println!("{line}");
        }
        report
    } else {
        let settings = config.database.connection_settings()?;
        let mut store = PgWarehouse::connect(&settings, config.database.table.clone(), config.database.dialect)
            .await
            .context("Failed to connect to warehouse")?;
        Pipeline::new(&fetcher, &mut store, plan.policy).run(&plan.locations).await?
    };

    summarize(&report)
}

/// Run the pipeline against a [`MemoryWarehouse`] and render the rows it kept.
async fn run_in_memory<F: WeatherFetcher + ?Sized>(
    fetcher: &F,
    table: TableName,
    policy: FailurePolicy,
    locations: &[Location],
) -> Result<(RunReport, Vec<String>)> {
    let mut store = MemoryWarehouse::new(table);
    let report = Pipeline::new(fetcher, &mut store, policy).run(locations).await?;
    let lines = store.rows().iter().map(render_row).collect();
    Ok((report, lines))
}

fn render_row(row: &StoredObservation) -> String {
    let obs = &row.observation;
    format!(
        "{:<16} {:>6.1} °C  {:<30} {}",
        obs.location,
        obs.temperature,
        obs.weather_descriptions,
        obs.observation_time.format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

fn summarize(report: &RunReport) -> Result<()> {
    for (name, outcome) in &report.outcomes {
        if let LocationOutcome::Failed(err) = outcome {
            eprintln!("{name}: {err}");
        }
    }

    info!(inserted = report.inserted(), failed = report.failed(), "ingestion run finished");

    if !report.is_success() {
        bail!("{} of {} locations failed", report.failed(), report.outcomes.len());
    }
    Ok(())
}

async fn ensure_table(config: Config) -> Result<()> {
    let settings = config.database.connection_settings()?;
    let mut store = PgWarehouse::connect(&settings, config.database.table.clone(), config.database.dialect)
        .await
        .context("Failed to connect to warehouse")?;

    prepare_table(&mut store).await?;

    println!("Table `{}` is ready.", config.database.table);
    Ok(())
}

/// Ensure the table, then close the store. An ensure failure is reported
/// even when closing fails too.
async fn prepare_table<S: ObservationStore + ?Sized>(store: &mut S) -> Result<()> {
    let ensured = store.ensure_table().await;
    let closed = store.close().await;
    let table = store.table().to_string();

    match (ensured, closed) {
        (Err(err), Err(close_err)) => Err(anyhow::Error::new(err).context(format!(
            "Failed to prepare table `{table}` (closing the connection also failed: {close_err})"
        ))),
        (Err(err), Ok(())) => {
            Err(anyhow::Error::new(err).context(format!("Failed to prepare table `{table}`")))
        }
        (Ok(()), closed) => closed.context("Failed to close warehouse connection"),
    }
}

fn configure(path: Option<PathBuf>) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => Config::config_file_path()?,
    };
    let mut config = Config::load_from(&path).context("Failed to load configuration")?;

    let api_key = Password::new("OpenWeatherMap API key:")
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;
    if !api_key.trim().is_empty() {
        config.api.api_key = Some(api_key.trim().to_string());
    }

    let db = &mut config.database;
    db.host = Some(prompt_text("Warehouse host:", db.host.as_deref())?);
    db.port = CustomType::<u16>::new("Warehouse port:")
        .with_default(db.port)
        .prompt()
        .context("Failed to read port")?;
    db.dbname = Some(prompt_text("Database name:", db.dbname.as_deref())?);
    db.user = Some(prompt_text("User:", db.user.as_deref())?);

    let password = Password::new("Password:")
        .without_confirmation()
        .prompt()
        .context("Failed to read password")?;
    if !password.is_empty() {
        db.password = Some(password);
    }

    let dialects = vec![Dialect::Redshift, Dialect::Postgres];
    let start = dialects.iter().position(|d| *d == db.dialect).unwrap_or(0);
    db.dialect = Select::new("SQL dialect:", dialects)
        .with_starting_cursor(start)
        .prompt()
        .context("Failed to read dialect")?;

    config.save_to(&path).context("Failed to save configuration")?;
    println!("Configuration saved to {}", path.display());
    Ok(())
}

fn prompt_text(message: &str, current: Option<&str>) -> Result<String> {
    let mut prompt = Text::new(message);
    if let Some(current) = current {
        prompt = prompt.with_default(current);
    }
    prompt.prompt().with_context(|| format!("Failed to read `{message}`"))
}

fn describe(location: &Location) -> String {
    match &location.query {
        LocationQuery::Coordinates { lat, lon } => format!("{:<16} lat={lat} lon={lon}", location.name),
        LocationQuery::Name(query) => format!("{:<16} q={query}", location.name),
    }
}
