//! Load test CLI for the render service.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use render_load_test::{
    JobSelection, LoadRunner, OutputSettings, RenderSettings, ReportFormat, ResultsReport,
    TestConfig, TextureSettings, DEFAULT_ENDPOINT,
};
use render_protocol::OutputFormat;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "render-load-test")]
#[command(about = "Load testing tool for the render-form endpoint", long_about = None)]
struct Cli {
    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a load test from command line flags
    Run(RunArgs),

    /// Run a load test from a scenario file
    Scenario {
        /// Path to scenario YAML file
        #[arg(short, long)]
        file: PathBuf,

        /// Override concurrency level
        #[arg(short, long)]
        conc: Option<usize>,

        /// Output format: table (default), json, csv
        #[arg(short, long, default_value = "table")]
        output: ReportFormat,
    },

    /// List available scenarios
    List {
        /// Scenarios directory
        #[arg(short, long, default_value = "scenarios")]
        dir: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Number of jobs in flight at once
    #[arg(long, default_value_t = 1, env = "RENDER_CONCURRENCY")]
    conc: usize,

    /// Number of requests against --model
    #[arg(short = 'n', long = "requests", default_value_t = 1)]
    requests: usize,

    /// Render every model in --models-dir once
    #[arg(long)]
    all: bool,

    /// Directory scanned by --all
    #[arg(long, default_value = "../glb")]
    models_dir: PathBuf,

    /// Model URL or local path
    #[arg(long, env = "RENDER_MODEL", required_unless_present = "all")]
    model: Option<String>,

    /// With --all, send `<base><file name>` as the model URL instead of uploading the file
    #[arg(long, env = "RENDER_MODEL_BASE_URL")]
    model_base_url: Option<String>,

    /// Max texture dimension after resizing
    #[arg(long, default_value_t = 2000)]
    size: u32,

    /// Output width
    #[arg(long, default_value_t = 3000)]
    width: u32,

    /// Output height
    #[arg(long, default_value_t = 2700)]
    height: u32,

    /// Format of the default texture (`canvas.<iformat>` in slot 1)
    #[arg(long, default_value = "jpg")]
    iformat: String,

    /// Requested output format: png, jpg, webp
    #[arg(long, default_value = "png")]
    oformat: OutputFormat,

    /// Texture for a slot, as SLOT=PATH (repeatable)
    #[arg(long = "texture", value_parser = parse_texture)]
    textures: Vec<(u32, PathBuf)>,

    /// Save rendered artifacts
    #[arg(long)]
    save: bool,

    /// Where saved artifacts go
    #[arg(long, default_value = "out")]
    out_dir: PathBuf,

    /// Render endpoint
    #[arg(long, default_value = DEFAULT_ENDPOINT, env = "RENDER_ENDPOINT")]
    endpoint: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 120)]
    timeout: u64,

    /// Output format: table (default), json, csv
    #[arg(short, long, default_value = "table")]
    output: ReportFormat,

    /// Check GET /health before the run
    #[arg(long)]
    health_check: bool,
}

impl RunArgs {
    fn into_config(self) -> TestConfig {
        let jobs = if self.all {
            JobSelection::Directory {
                dir: self.models_dir,
                extension: "glb".to_string(),
                model_base_url: self.model_base_url,
            }
        } else {
            JobSelection::Repeat {
                model: self.model.unwrap_or_default(),
                count: self.requests,
            }
        };

        let slots: BTreeMap<u32, PathBuf> = if self.textures.is_empty() {
            [(1, PathBuf::from(format!("canvas.{}", self.iformat)))]
                .into_iter()
                .collect()
        } else {
            self.textures.into_iter().collect()
        };

        TestConfig {
            name: if self.all { "all-models" } else { "run" }.to_string(),
            description: String::new(),
            endpoint: self.endpoint,
            concurrency: self.conc,
            queue_capacity: None,
            timeout_secs: self.timeout,
            jobs,
            render: RenderSettings {
                width: self.width,
                height: self.height,
                format: self.oformat,
            },
            textures: TextureSettings {
                max_dimension: self.size,
                slots,
            },
            output: OutputSettings {
                save: self.save,
                dir: self.out_dir,
            },
            health_check: self.health_check,
        }
    }
}

fn parse_texture(value: &str) -> Result<(u32, PathBuf), String> {
    let (slot, path) = value
        .split_once('=')
        .ok_or_else(|| format!("expected SLOT=PATH, got '{}'", value))?;
    let slot = slot
        .trim()
        .parse()
        .map_err(|_| format!("invalid texture slot '{}'", slot))?;
    if path.is_empty() {
        return Err("texture path must not be empty".to_string());
    }
    Ok((slot, PathBuf::from(path)))
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    match cli.command {
        Commands::Run(args) => {
            let output = args.output;
            run(args.into_config(), output).await
        }
        Commands::Scenario { file, conc, output } => {
            info!(path = %file.display(), "Loading scenario");
            let mut config = TestConfig::from_file(&file)?;
            if let Some(c) = conc {
                config.concurrency = c;
            }
            config.validate()?;
            run(config, output).await
        }
        Commands::List { dir } => list_scenarios(&dir),
    }
}

async fn run(config: TestConfig, output: ReportFormat) -> anyhow::Result<()> {
    let runner = LoadRunner::new(config)?.with_console(output == ReportFormat::Table);

    let results = tokio::select! {
        results = runner.run() => results?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, abandoning in-flight jobs");
            std::process::exit(130);
        }
    };

    println!("{}", ResultsReport::render(&results, output)?);
    Ok(())
}

fn list_scenarios(dir: &Path) -> anyhow::Result<()> {
    println!("Available scenarios in {}:", dir.display());
    println!();

    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("reading scenarios directory {}", dir.display()))?;

    let mut scenarios = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_yaml = matches!(
            path.extension().and_then(|s| s.to_str()),
            Some("yaml") | Some("yml")
        );
        if !is_yaml {
            continue;
        }
        match TestConfig::from_file(&path) {
            Ok(config) => scenarios.push((
                entry.file_name().to_string_lossy().into_owned(),
                config.name,
                config.description,
            )),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable scenario"),
        }
    }

    scenarios.sort_by(|a, b| a.0.cmp(&b.0));

    if scenarios.is_empty() {
        println!("No scenario files found");
    } else {
        for (filename, name, desc) in scenarios {
            println!("  {} - {}", filename, name);
            if !desc.is_empty() {
                println!("    {}", desc);
            }
            println!();
        }
    }

    Ok(())
}
