use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use cgm_plot::pipeline::{DEFAULT_BASE_DIR, DEFAULT_OUT_DIR, DEFAULT_SAMPLE_SIZE};
use cgm_plot::{run, ChartKind, RunConfig};
use clap::{ArgAction, Parser, ValueEnum, ValueHint};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "cgm-plot",
    author,
    version,
    about = "Render one glucose plot per Dexcom G6 participant",
    long_about = None
)]
struct Cli {
    /// Base data directory holding participants.tsv and wearable_blood_glucose/
    #[arg(
        long,
        env = "CGM_PLOT_DATA_DIR",
        default_value = DEFAULT_BASE_DIR,
        value_hint = ValueHint::DirPath
    )]
    base_dir: PathBuf,

    /// Directory the plots are written to
    #[arg(long, default_value = DEFAULT_OUT_DIR, value_hint = ValueHint::DirPath)]
    out_dir: PathBuf,

    /// Number of participant folders to plot (sorted by name)
    #[arg(long, default_value_t = DEFAULT_SAMPLE_SIZE)]
    limit: usize,

    /// Image format
    #[arg(long, value_enum, default_value_t = FormatOpt::Png)]
    format: FormatOpt,

    /// Also write the run summary (plots written, participants skipped) as JSON
    #[arg(long, value_hint = ValueHint::FilePath)]
    summary_json: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FormatOpt {
    Png,
    Svg,
}

impl From<FormatOpt> for ChartKind {
    fn from(value: FormatOpt) -> Self {
        match value {
            FormatOpt::Png => ChartKind::Png,
            FormatOpt::Svg => ChartKind::Svg,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let config = RunConfig {
        base_dir: cli.base_dir,
        out_dir: cli.out_dir,
        sample_size: cli.limit,
        format: cli.format.into(),
    };

    let summary = run(&config).with_context(|| {
        format!(
            "failed to plot participants under {}",
            config.base_dir.display()
        )
    })?;

    info!(
        "Done: {} plots written to {}, {} participants skipped",
        summary.rendered.len(),
        config.out_dir.display(),
        summary.skipped.len()
    );

    if let Some(path) = cli.summary_json.as_deref() {
        summary
            .write_json(path)
            .with_context(|| format!("failed to write run summary to {}", path.display()))?;
        info!("Wrote run summary: {}", path.display());
    }
    Ok(())
}
