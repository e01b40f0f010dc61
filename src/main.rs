use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use flatgraph::input;
use flatgraph::metadata::{self, ParentLink};
use flatgraph::{GraphBuildEngine, NullIdStrategy};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "flatgraph")]
#[command(about = "Fold flat JOIN rows into a deduplicated entity graph")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the entity graph from a row file and write it as JSON
    Map(MapArgs),
    /// Validate a schema description and print its levels
    Check(CheckArgs),
}

#[derive(Args)]
struct MapArgs {
    /// Schema description (JSON)
    #[arg(short, long)]
    schema: PathBuf,

    /// Row file (.csv with a header line, or .json array of objects)
    #[arg(short, long)]
    rows: PathBuf,

    /// What to do when a child entity's identity is null
    #[arg(long, value_enum, default_value_t = StrategyArg::Skip)]
    strategy: StrategyArg,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,

    /// Write the graph here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct CheckArgs {
    /// Schema description (JSON)
    #[arg(short, long)]
    schema: PathBuf,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Skip,
    Throw,
    AllowNull,
}

impl From<StrategyArg> for NullIdStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Skip => Self::Skip,
            StrategyArg::Throw => Self::Throw,
            StrategyArg::AllowNull => Self::AllowNull,
        }
    }
}

fn run_map(args: MapArgs) -> Result<()> {
    let def = input::load_schema(&args.schema)?;
    let engine = GraphBuildEngine::from_schema(&def, args.strategy.into())
        .with_context(|| format!("Invalid schema: {:?}", args.schema))?;
    let rows = input::load_rows(&args.rows)?;

    let start = Instant::now();
    let graph = engine
        .build(&rows)
        .with_context(|| format!("Failed to map rows from {:?}", args.rows))?;
    let stats = engine.stats().snapshot();
    info!(
        duration_secs = start.elapsed().as_secs_f64(),
        rows = stats.rows_processed,
        discarded = stats.rows_discarded,
        skipped = stats.null_ids_skipped,
        roots = graph.len(),
        entities = graph.entity_count(),
        links = stats.links_added,
        "Mapping complete"
    );

    let mut writer: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path)
                .with_context(|| format!("Failed to create output file: {:?}", path))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let written = if args.pretty {
        serde_json::to_writer_pretty(&mut writer, &graph)
    } else {
        serde_json::to_writer(&mut writer, &graph)
    };
    written.context("Failed to write graph")?;
    writeln!(writer)?;
    writer.flush()?;

    Ok(())
}

fn run_check(args: CheckArgs) -> Result<()> {
    let def = input::load_schema(&args.schema)?;
    let metadata = metadata::extract(&def)
        .with_context(|| format!("Invalid schema: {:?}", args.schema))?;
    let catalog = metadata.catalog();

    println!("Schema:       {}", metadata.schema());
    println!("Entity types: {}", catalog.len());
    println!(
        "Root:         {} ({} fields, identity from '{}')",
        catalog.name(metadata.root_type()),
        metadata.root_mappings().len(),
        metadata.root_identity().source
    );
    for (level, group) in metadata.groups().iter().enumerate() {
        let link = match group.parent {
            ParentLink::Root => "root".to_string(),
            ParentLink::Level(parent) => format!("level {}", parent),
            ParentLink::Unlinked => "unlinked".to_string(),
        };
        println!(
            "Level {}:      {} under {} via {} ({} fields, identity from '{}')",
            level,
            catalog.name(group.entity_type),
            catalog.name(group.parent_type),
            link,
            group.mappings.len(),
            metadata.identity_of(group).source
        );
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Map(args) => run_map(args),
        Commands::Check(args) => run_check(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
