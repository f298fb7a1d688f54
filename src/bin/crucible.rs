use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

use crucible_client::client::{ArchiveClient, CrucibleHttpClient, DEFAULT_LIMIT, download_dataset};
use crucible_client::config::{Config, ConfigLoader, ResolvedConfig};
use crucible_client::domain::{Mfid, ResourceKind};
use crucible_client::error::CrucibleError;
use crucible_client::output::{
    JsonOutput, LogProgress, OutputMode, print_record, print_records, print_upload_summary,
};
use crucible_client::parsers::{ParseOptions, ParserKind, parse_inputs};
use crucible_client::plan::{UploadOverrides, UploadPlan};
use crucible_client::upload::{ProgressSink, Uploader, link_resources};

/// Exit status when the dataset was created but some cross-links failed.
const PARTIAL_UPLOAD: u8 = 4;

#[derive(Parser)]
#[command(name = "crucible")]
#[command(about = "Command-line client for the Crucible scientific data archive")]
#[command(version, author)]
struct Cli {
    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: CRUCIBLE_CONFIG or the user config directory).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Manage client configuration")]
    Config(ConfigArgs),
    #[command(about = "Create, inspect and link datasets")]
    Dataset(DatasetArgs),
    #[command(about = "Inspect and link samples")]
    Sample(SampleArgs),
    #[command(about = "Inspect projects")]
    Project(ProjectArgs),
    #[command(about = "Link two records, detecting their types")]
    Link(LinkArgs),
    #[command(about = "Open a record in the graph explorer")]
    Open(OpenArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand)]
enum ConfigCommand {
    #[command(about = "Write a config file, keeping values not given")]
    Init(InitArgs),
    #[command(about = "Show the current configuration")]
    Show,
    #[command(about = "Set one configuration value (empty clears it)")]
    Set { key: String, value: String },
    #[command(about = "Print the config file path")]
    Path,
}

#[derive(Args)]
struct InitArgs {
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    graph_explorer_url: Option<String>,
    #[arg(long)]
    project: Option<String>,
    #[arg(long)]
    web_host: Option<String>,
}

#[derive(Args)]
struct DatasetArgs {
    #[command(subcommand)]
    command: DatasetCommand,
}

#[derive(Subcommand)]
enum DatasetCommand {
    #[command(about = "List datasets")]
    List(ListArgs),
    #[command(about = "Show one dataset")]
    Get {
        id: String,
        #[arg(long)]
        include_metadata: bool,
    },
    #[command(about = "Parse input files and upload them as a new dataset")]
    Create(Box<CreateArgs>),
    #[command(about = "Link a child dataset to a parent dataset")]
    Link(ParentChild),
    #[command(about = "Download dataset files")]
    Download(DownloadArgs),
}

#[derive(Args)]
struct ListArgs {
    #[arg(long, visible_alias = "pid")]
    project_id: Option<String>,
    #[arg(short, long, default_value_t = DEFAULT_LIMIT)]
    limit: usize,
}

#[derive(Args)]
struct CreateArgs {
    #[arg(short, long = "input", value_name = "FILE", num_args = 1.., required = true)]
    input: Vec<Utf8PathBuf>,

    /// Parser for the inputs: generic, mdnote or lammps.
    #[arg(short = 't', long = "type", default_value = "generic")]
    dataset_type: ParserKind,

    #[arg(long, visible_alias = "pid")]
    project_id: Option<String>,

    /// Dataset identifier; without a value one is generated locally.
    #[arg(long, num_args = 0..=1, default_missing_value = "", value_name = "ID")]
    mfid: Option<String>,

    #[arg(short, long)]
    name: Option<String>,

    #[arg(short, long)]
    measurement: Option<String>,

    /// Scientific metadata as a JSON object or a path to a JSON file.
    #[arg(long, value_name = "JSON|PATH")]
    metadata: Option<String>,

    /// Comma-separated keywords.
    #[arg(short, long)]
    keywords: Option<String>,

    #[arg(long)]
    session: Option<String>,

    #[arg(long)]
    public: bool,

    #[arg(long)]
    instrument: Option<String>,

    #[arg(long)]
    data_format: Option<String>,

    #[arg(long)]
    owner_orcid: Option<String>,

    /// Print the upload plan without contacting the archive.
    #[arg(long)]
    dry_run: bool,

    /// Do not wait for ingestion to finish.
    #[arg(long)]
    no_wait: bool,
}

#[derive(Args)]
struct ParentChild {
    #[arg(short, long, value_name = "ID")]
    parent: String,
    #[arg(short, long, value_name = "ID")]
    child: String,
}

#[derive(Args)]
struct DownloadArgs {
    id: String,
    /// Regular expression matched against whole file names.
    #[arg(short, long, value_name = "PATTERN")]
    file: Option<String>,
    #[arg(short, long, default_value = "crucible-downloads")]
    output_dir: PathBuf,
    #[arg(long)]
    no_overwrite: bool,
}

#[derive(Args)]
struct SampleArgs {
    #[command(subcommand)]
    command: SampleCommand,
}

#[derive(Subcommand)]
enum SampleCommand {
    #[command(about = "List samples")]
    List {
        #[arg(long, visible_alias = "pid")]
        project_id: Option<String>,
        #[arg(short, long, value_name = "ID")]
        dataset: Option<String>,
        #[arg(short, long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
    },
    #[command(about = "Show one sample")]
    Get { id: String },
    #[command(about = "Link a child sample to a parent sample")]
    Link(ParentChild),
    #[command(about = "Attach a sample to a dataset")]
    LinkDataset(DatasetSample),
}

#[derive(Args)]
struct DatasetSample {
    #[arg(short, long, value_name = "ID")]
    dataset: String,
    #[arg(short, long, value_name = "ID")]
    sample: String,
}

#[derive(Args)]
struct ProjectArgs {
    #[command(subcommand)]
    command: ProjectCommand,
}

#[derive(Subcommand)]
enum ProjectCommand {
    #[command(about = "List projects")]
    List {
        #[arg(short, long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
    },
    #[command(about = "Show one project")]
    Get { id: String },
}

#[derive(Args)]
struct LinkArgs {
    #[arg(short, long, value_name = "ID", requires = "child", conflicts_with_all = ["dataset", "sample"])]
    parent: Option<String>,
    #[arg(short, long, value_name = "ID", requires = "parent")]
    child: Option<String>,
    /// Treat both ids as this kind instead of asking the archive.
    #[arg(long = "type", value_enum)]
    kind: Option<ResourceKind>,
    #[arg(short, long, value_name = "ID", requires = "sample")]
    dataset: Option<String>,
    #[arg(short, long, value_name = "ID", requires = "dataset")]
    sample: Option<String>,
}

#[derive(Args)]
struct OpenArgs {
    mfid: Option<String>,
    #[arg(long, visible_alias = "pid")]
    project_id: Option<String>,
    /// Print the URL instead of launching a browser.
    #[arg(long)]
    print_url: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(error) = report.downcast_ref::<CrucibleError>() {
                return ExitCode::from(map_exit_code(error));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &CrucibleError) -> u8 {
    match error {
        CrucibleError::MissingInputFile(_)
        | CrucibleError::MissingConfig(_)
        | CrucibleError::MissingApiKey
        | CrucibleError::ResourceNotFound(_) => 2,
        CrucibleError::Http(_)
        | CrucibleError::Status { .. }
        | CrucibleError::RemoteCreation(_)
        | CrucibleError::UnexpectedResponse(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Config(args) => run_config(args.command, config_path, mode),
        Commands::Dataset(args) => run_dataset(args.command, config_path, mode),
        Commands::Sample(args) => run_sample(args.command, config_path, mode),
        Commands::Project(args) => run_project(args.command, config_path, mode),
        Commands::Link(args) => run_link(args, config_path, mode),
        Commands::Open(args) => run_open(args, config_path),
    }
}

fn run_config(
    command: ConfigCommand,
    config_path: Option<&Path>,
    mode: OutputMode,
) -> miette::Result<ExitCode> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => ConfigLoader::default_path()?,
    };
    match command {
        ConfigCommand::Init(args) => {
            let mut config = if path.exists() {
                ConfigLoader::load(&path)?
            } else {
                Config::default()
            };
            let values = [
                ("api_url", args.api_url),
                ("api_key", args.api_key),
                ("graph_explorer_url", args.graph_explorer_url),
                ("current_project", args.project),
                ("web_host", args.web_host),
            ];
            for (key, value) in values {
                if let Some(value) = value {
                    config.set(key, &value)?;
                }
            }
            ConfigLoader::save(&path, &config)?;
            tracing::info!("wrote config to {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        ConfigCommand::Show => {
            let mut config = ConfigLoader::load(&path)?;
            if let Some(key) = config.api_key.as_mut() {
                *key = mask(key);
            }
            match mode {
                OutputMode::Json => JsonOutput::print_json(&config).into_diagnostic()?,
                OutputMode::Human => {
                    print_record(&serde_json::to_value(&config).into_diagnostic()?)
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        ConfigCommand::Set { key, value } => {
            let mut config = if path.exists() {
                ConfigLoader::load(&path)?
            } else {
                Config::default()
            };
            config.set(&key, &value)?;
            ConfigLoader::save(&path, &config)?;
            tracing::info!("set {key} in {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        ConfigCommand::Path => {
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn mask(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    format!("{visible}****")
}

fn connect(config: &ResolvedConfig) -> miette::Result<CrucibleHttpClient> {
    Ok(CrucibleHttpClient::new(config)?)
}

fn run_dataset(
    command: DatasetCommand,
    config_path: Option<&Path>,
    mode: OutputMode,
) -> miette::Result<ExitCode> {
    match command {
        DatasetCommand::List(args) => {
            let config = ConfigLoader::resolve(config_path)?;
            let client = connect(&config)?;
            let project = args.project_id.or_else(|| config.current_project.clone());
            let datasets = client.list_datasets(project.as_deref(), args.limit)?;
            print_list(&datasets, "unique_id", "dataset_name", mode)
        }
        DatasetCommand::Get {
            id,
            include_metadata,
        } => {
            let client = connect(&ConfigLoader::resolve(config_path)?)?;
            let dataset = client.get_dataset(&id, include_metadata)?;
            print_one(&dataset, mode)
        }
        DatasetCommand::Create(args) => run_create(*args, config_path, mode),
        DatasetCommand::Link(args) => {
            let client = connect(&ConfigLoader::resolve(config_path)?)?;
            let result = link_resources(
                &client,
                &args.parent,
                &args.child,
                Some(ResourceKind::Dataset),
            )?;
            print_linked(&result, mode)
        }
        DatasetCommand::Download(args) => {
            let client = connect(&ConfigLoader::resolve(config_path)?)?;
            let files = download_dataset(
                &client,
                &args.id,
                args.file.as_deref(),
                &args.output_dir,
                !args.no_overwrite,
            )?;
            match mode {
                OutputMode::Json => JsonOutput::print_json(&files).into_diagnostic()?,
                OutputMode::Human => {
                    for file in &files {
                        println!("{}", file.display());
                    }
                    println!("downloaded {} file(s)", files.len());
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_create(
    args: CreateArgs,
    config_path: Option<&Path>,
    mode: OutputMode,
) -> miette::Result<ExitCode> {
    // A dry run works without any archive configured.
    let config = if args.dry_run {
        ConfigLoader::resolve_if_present(config_path)?
    } else {
        Some(ConfigLoader::resolve(config_path)?)
    };
    let options = config
        .as_ref()
        .map(|config| ParseOptions {
            frontmatter: config.frontmatter_parser,
            web_host: config.web_host.clone(),
        })
        .unwrap_or_default();
    let extraction = parse_inputs(args.dataset_type, &args.input, &options)?;
    let references = extraction.references.clone();

    let mfid = match args.mfid.as_deref() {
        None => None,
        Some("") => Some(Mfid::generate()),
        Some(value) => Some(value.parse::<Mfid>()?),
    };
    let overrides = UploadOverrides {
        name: args.name,
        metadata: args
            .metadata
            .as_deref()
            .map(read_metadata)
            .transpose()?
            .unwrap_or_default(),
        keywords: args
            .keywords
            .as_deref()
            .map(|list| list.split(',').map(|kw| kw.trim().to_string()).collect())
            .unwrap_or_default(),
        project_id: args
            .project_id
            .or_else(|| config.as_ref().and_then(|config| config.current_project.clone())),
        mfid,
        session_name: args.session,
        public: args.public,
        instrument_name: args.instrument,
        owner_orcid: args.owner_orcid,
        measurement: args.measurement,
        data_format: args.data_format,
        no_wait: args.no_wait,
    };
    let plan = UploadPlan::build(extraction, overrides)?;
    for warning in &plan.warnings {
        tracing::warn!("{warning}");
    }

    let config = match config {
        Some(config) if !args.dry_run => config,
        _ => {
            let preview = json!({ "plan": plan, "references": references });
            match mode {
                OutputMode::Json => JsonOutput::print_json(&preview).into_diagnostic()?,
                OutputMode::Human => {
                    print_record(&serde_json::to_value(&plan.record).into_diagnostic()?);
                    println!("files:");
                    for file in &plan.files {
                        println!("  {file}");
                    }
                    println!("keywords: {}", plan.keywords.join(", "));
                    for reference in &references {
                        println!("links to {} {}", reference.kind, reference.id);
                    }
                }
            }
            return Ok(ExitCode::SUCCESS);
        }
    };

    let uploader = Uploader::new(connect(&config)?);
    let sink: &dyn ProgressSink = match mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Human => &LogProgress,
    };
    let result = uploader.upload(&plan, &references, sink)?;
    match mode {
        OutputMode::Json => JsonOutput::print_json(&result).into_diagnostic()?,
        OutputMode::Human => print_upload_summary(&result),
    }

    if result.is_complete() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(PARTIAL_UPLOAD))
    }
}

/// Accepts a JSON object literal or the path of a file containing one.
fn read_metadata(input: &str) -> Result<Map<String, Value>, CrucibleError> {
    let path = Path::new(input);
    let text = if path.is_file() {
        fs::read_to_string(path)
            .map_err(|err| CrucibleError::Filesystem(format!("{input}: {err}")))?
    } else {
        input.to_string()
    };
    match serde_json::from_str(&text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(CrucibleError::Metadata(
            "metadata must be a JSON object".to_string(),
        )),
        Err(err) => Err(CrucibleError::Metadata(err.to_string())),
    }
}

fn run_sample(
    command: SampleCommand,
    config_path: Option<&Path>,
    mode: OutputMode,
) -> miette::Result<ExitCode> {
    let config = ConfigLoader::resolve(config_path)?;
    let client = connect(&config)?;
    match command {
        SampleCommand::List {
            project_id,
            dataset,
            limit,
        } => {
            let project = project_id.or_else(|| config.current_project.clone());
            let samples = client.list_samples(project.as_deref(), dataset.as_deref(), limit)?;
            print_list(&samples, "unique_id", "sample_name", mode)
        }
        SampleCommand::Get { id } => {
            let sample = client.get_sample(&id)?;
            print_one(&sample, mode)
        }
        SampleCommand::Link(args) => {
            let result =
                link_resources(&client, &args.parent, &args.child, Some(ResourceKind::Sample))?;
            print_linked(&result, mode)
        }
        SampleCommand::LinkDataset(args) => {
            let response = client.add_sample_to_dataset(&args.dataset, &args.sample)?;
            tracing::info!("linked sample {} to dataset {}", args.sample, args.dataset);
            print_one(&response, mode)
        }
    }
}

fn run_project(
    command: ProjectCommand,
    config_path: Option<&Path>,
    mode: OutputMode,
) -> miette::Result<ExitCode> {
    let config = ConfigLoader::resolve(config_path)?;
    let client = connect(&config)?;
    match command {
        ProjectCommand::List { limit } => {
            let projects = client.list_projects(limit)?;
            print_list(&projects, "project_id", "project_name", mode)
        }
        ProjectCommand::Get { id } => {
            let project = client.get_project(&id)?;
            print_one(&project, mode)
        }
    }
}

fn run_link(
    args: LinkArgs,
    config_path: Option<&Path>,
    mode: OutputMode,
) -> miette::Result<ExitCode> {
    let (parent, child, kind) = match args {
        LinkArgs {
            dataset: Some(dataset),
            sample: Some(sample),
            ..
        } => (dataset, sample, None),
        LinkArgs {
            parent: Some(parent),
            child: Some(child),
            kind,
            ..
        } => (parent, child, kind),
        _ => {
            return Err(miette::Report::msg(
                "use -p/--parent with -c/--child, or -d/--dataset with -s/--sample",
            ));
        }
    };
    if parent == child {
        return Err(miette::Report::msg("cannot link a record to itself"));
    }
    let config = ConfigLoader::resolve(config_path)?;
    let client = connect(&config)?;
    let result = link_resources(&client, &parent, &child, kind)?;
    print_linked(&result, mode)
}

fn run_open(args: OpenArgs, config_path: Option<&Path>) -> miette::Result<ExitCode> {
    let config = ConfigLoader::resolve(config_path)?;
    let project = args
        .project_id
        .or_else(|| config.current_project.clone())
        .ok_or_else(|| {
            miette::Report::msg("no project given (use --project-id or set current_project)")
        })?;

    let url = match args.mfid.as_deref() {
        Some(mfid) => {
            let client = connect(&config)?;
            let kind: ResourceKind = client.get_resource_type(mfid)?.parse()?;
            config.explorer_url(&project, Some((kind, mfid)))?
        }
        None => config.explorer_url(&project, None)?,
    };

    if args.print_url {
        println!("{url}");
        return Ok(ExitCode::SUCCESS);
    }
    launch_browser(&url)?;
    tracing::info!("opened {url}");
    Ok(ExitCode::SUCCESS)
}

fn launch_browser(url: &str) -> Result<(), CrucibleError> {
    let mut command = if cfg!(target_os = "macos") {
        Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut command = Command::new("cmd");
        command.args(["/C", "start", ""]);
        command
    } else {
        Command::new("xdg-open")
    };
    let status = command
        .arg(url)
        .status()
        .map_err(|err| CrucibleError::Browser(err.to_string()))?;
    if !status.success() {
        return Err(CrucibleError::Browser(format!("opener exited with {status}")));
    }
    Ok(())
}

fn print_list(
    records: &[Value],
    id_field: &str,
    name_field: &str,
    mode: OutputMode,
) -> miette::Result<ExitCode> {
    match mode {
        OutputMode::Json => JsonOutput::print_json(records).into_diagnostic()?,
        OutputMode::Human => print_records(records, id_field, name_field),
    }
    Ok(ExitCode::SUCCESS)
}

fn print_one(record: &Value, mode: OutputMode) -> miette::Result<ExitCode> {
    match mode {
        OutputMode::Json => JsonOutput::print_json(record).into_diagnostic()?,
        OutputMode::Human => print_record(record),
    }
    Ok(ExitCode::SUCCESS)
}

fn print_linked(
    result: &crucible_client::upload::LinkResult,
    mode: OutputMode,
) -> miette::Result<ExitCode> {
    match mode {
        OutputMode::Json => JsonOutput::print_json(result).into_diagnostic()?,
        OutputMode::Human => println!(
            "linked {} {} -> {} {}",
            result.parent_kind, result.parent, result.child_kind, result.child
        ),
    }
    Ok(ExitCode::SUCCESS)
}
