use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use narrascope::analysis::App;
use narrascope::config::{ConfigLoader, ResolvedConfig};
use narrascope::domain::{AnalysisParams, DatasetName, TargetNarrative};
use narrascope::error::NarrascopeError;
use narrascope::ingest;
use narrascope::output::JsonOutput;
use narrascope::registry::DatasetRegistry;
use narrascope::scoring::ScoringHttpClient;
use narrascope::store::SessionStore;

#[derive(Parser)]
#[command(name = "narrascope")]
#[command(about = "Combine narrative-similarity timelines across tweet datasets")]
#[command(version)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List datasets available for analysis")]
    Datasets(UploadArgs),
    #[command(about = "Score selected datasets against a target narrative")]
    Analyze(AnalyzeArgs),
    #[command(about = "Generate candidate narratives from an analysis run")]
    Narratives(NarrativesArgs),
    #[command(about = "List locally exported session files, newest first")]
    Exports,
    #[command(about = "Inspect a locally saved session file")]
    Load(LoadArgs),
    #[command(about = "List or load sessions saved on the scoring server")]
    Sessions(SessionsArgs),
}

#[derive(Args, Clone, Default)]
struct UploadArgs {
    /// Register a local CSV as a dataset, as NAME=PATH. Repeatable.
    #[arg(long = "upload", value_name = "NAME=PATH")]
    uploads: Vec<String>,
}

#[derive(Args, Clone)]
struct AnalyzeArgs {
    /// Dataset names to score, server-hosted or uploaded.
    datasets: Vec<String>,

    #[command(flatten)]
    uploads: UploadArgs,

    #[arg(long)]
    start_date: Option<String>,

    #[arg(long)]
    end_date: Option<String>,

    #[arg(long)]
    narrative: Option<String>,

    #[arg(long)]
    threshold: Option<f64>,

    /// Export the merged result as an annotated CSV session file.
    #[arg(long)]
    export: bool,

    /// Also persist the result server-side.
    #[arg(long)]
    save_remote: bool,

    /// Print every merged record instead of the summary.
    #[arg(long)]
    full: bool,
}

#[derive(Args, Clone)]
struct NarrativesArgs {
    #[command(flatten)]
    analyze: AnalyzeArgs,

    #[arg(long, default_value_t = 3)]
    num_narratives: usize,
}

#[derive(Args, Clone)]
struct LoadArgs {
    /// Session filename inside the session store, or a direct path.
    filename: String,
}

#[derive(Args, Clone)]
struct SessionsArgs {
    #[command(subcommand)]
    command: SessionsCommand,
}

#[derive(Subcommand, Clone)]
enum SessionsCommand {
    #[command(about = "List server-side sessions, newest first")]
    List,
    #[command(about = "Load a server-side session")]
    Load { filename: String },
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<NarrascopeError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &NarrascopeError) -> u8 {
    if error.is_auth() {
        // Session termination: the stored token is no longer usable.
        return 4;
    }
    if error.is_validation() {
        return 2;
    }
    match error {
        NarrascopeError::ScoringHttp(_) | NarrascopeError::ScoringStatus { .. } => 3,
        NarrascopeError::SessionNotFound(_) => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref()).into_diagnostic()?;

    let scoring = ScoringHttpClient::new(
        &config.api_base_url,
        config.auth_token.as_deref(),
        config.timeout_secs,
    )
    .into_diagnostic()?;
    let app = App::new(scoring, DatasetRegistry::new());

    match cli.command {
        Commands::Datasets(args) => {
            register_uploads(&app, &args)?;
            let names = app.list_datasets().into_diagnostic()?;
            JsonOutput::print_names(&names).into_diagnostic()?;
            Ok(())
        }
        Commands::Analyze(args) => {
            let (outcome, params) = run_analyze(&app, &config, &args)?;
            if args.full {
                JsonOutput::print_records(&outcome).into_diagnostic()?;
            } else {
                JsonOutput::print_outcome(&outcome).into_diagnostic()?;
            }
            if args.export {
                let store = SessionStore::new().into_diagnostic()?;
                let rows: Vec<_> = outcome.records.iter().map(|r| r.to_raw()).collect();
                let path = store.save(&rows, &params).into_diagnostic()?;
                eprintln!("session exported to {path}");
            }
            if args.save_remote {
                let saved = app.save_remote(&outcome.records, &params).into_diagnostic()?;
                JsonOutput::print_saved(&saved).into_diagnostic()?;
            }
            Ok(())
        }
        Commands::Narratives(args) => {
            let (outcome, _) = run_analyze(&app, &config, &args.analyze)?;
            let narratives = app
                .generate_narratives(&outcome.records, args.num_narratives)
                .into_diagnostic()?;
            JsonOutput::print_narratives(&narratives).into_diagnostic()?;
            Ok(())
        }
        Commands::Exports => {
            let store = SessionStore::new().into_diagnostic()?;
            let names = store.list().into_diagnostic()?;
            JsonOutput::print_names(&names).into_diagnostic()?;
            Ok(())
        }
        Commands::Load(args) => {
            let store = SessionStore::new().into_diagnostic()?;
            let session = if std::path::Path::new(&args.filename).exists() {
                let content = std::fs::read_to_string(&args.filename)
                    .map_err(|err| NarrascopeError::Filesystem(err.to_string()))
                    .into_diagnostic()?;
                narrascope::session::decode(&content).into_diagnostic()?
            } else {
                store.load(&args.filename).into_diagnostic()?
            };
            let records = session.records();
            eprintln!(
                "loaded {} records generated {}",
                records.len(),
                session.metadata.generated_at
            );
            JsonOutput::print_metadata(&session.metadata).into_diagnostic()?;
            Ok(())
        }
        Commands::Sessions(args) => match args.command {
            SessionsCommand::List => {
                let names = app.list_remote_sessions().into_diagnostic()?;
                JsonOutput::print_names(&names).into_diagnostic()?;
                Ok(())
            }
            SessionsCommand::Load { filename } => {
                let records = app.load_remote_session(&filename).into_diagnostic()?;
                eprintln!("loaded {} records from {filename}", records.len());
                Ok(())
            }
        },
    }
}

fn register_uploads(
    app: &App<ScoringHttpClient>,
    args: &UploadArgs,
) -> miette::Result<()> {
    for spec in &args.uploads {
        let (name, path) = spec.split_once('=').ok_or_else(|| {
            miette::Report::msg(format!("invalid --upload value {spec:?}, expected NAME=PATH"))
        })?;
        let name: DatasetName = name.parse().into_diagnostic()?;
        let content = std::fs::read_to_string(path)
            .map_err(|err| NarrascopeError::Filesystem(err.to_string()))
            .into_diagnostic()?;
        let upload = ingest::validate_upload(&content, path).into_diagnostic()?;
        eprintln!("registered {} rows as {name}", upload.total_rows);
        app.registry().register(&name, upload.rows);
    }
    Ok(())
}

fn run_analyze(
    app: &App<ScoringHttpClient>,
    config: &ResolvedConfig,
    args: &AnalyzeArgs,
) -> miette::Result<(narrascope::analysis::AnalysisOutcome, AnalysisParams)> {
    register_uploads(app, &args.uploads)?;

    let narrative_text = args
        .narrative
        .clone()
        .or_else(|| config.default_target_narrative.clone())
        .ok_or_else(|| miette::Report::msg("--narrative required (no configured default)"))?;
    let target_narrative: TargetNarrative = narrative_text.parse().into_diagnostic()?;

    let mut selected = Vec::new();
    for name in &args.datasets {
        selected.push(name.parse::<DatasetName>().into_diagnostic()?);
    }
    // Uploaded-only invocations may omit positional datasets.
    if selected.is_empty() {
        for spec in &args.uploads.uploads {
            if let Some((name, _)) = spec.split_once('=') {
                selected.push(name.parse::<DatasetName>().into_diagnostic()?);
            }
        }
    }

    let params = AnalysisParams {
        start_date: args
            .start_date
            .clone()
            .or_else(|| config.default_start_date.clone())
            .unwrap_or_else(|| "2020-11-01".to_string()),
        end_date: args
            .end_date
            .clone()
            .or_else(|| config.default_end_date.clone())
            .unwrap_or_else(|| "2020-12-01".to_string()),
        target_narrative,
        threshold: args
            .threshold
            .or(config.default_threshold)
            .unwrap_or(0.5),
        selected_datasets: selected,
    };

    let (outcome, _applied) = app.run_and_apply(&params, &JsonOutput).into_diagnostic()?;
    Ok((outcome, params))
}
