//! Command-line front end: sharpen a stacked image, align a frame
//! sequence, or convert settings files.
//!
//! Work runs on the engines' worker threads; this thread only renders
//! progress events and enforces the optional time budget through the
//! engines' abort protocol.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use stackpost_format::{parse_settings, to_settings_xml};
use stackpost_pipeline::{AlignmentMethod, ProcessingSettings};
use stackpost_worker::image_io::{load_mono, save_mono16};
use stackpost_worker::{
    AbortReason, AlignmentEngine, AlignmentRun, CompletionStatus, OutputPolicy, ProcessingEngine,
    ProgressEvent, RunId,
};

/// Sharpen and align stacked astronomical images.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the sharpening pipeline over one image.
    Process {
        /// Input image path.
        input: PathBuf,

        /// Output path, written as 16-bit grayscale PNG.
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        settings: SettingsArgs,

        /// Abort the run if it takes longer than this many seconds.
        #[arg(long, value_name = "SECONDS")]
        max_seconds: Option<f64>,
    },

    /// Register a sequence of frames and write aligned copies.
    Align {
        /// Input frames, in sequence order.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(long, value_enum, default_value_t = Method::PhaseCorrelation)]
        method: Method,

        /// Directory for aligned frames (created if missing).
        #[arg(long)]
        output_dir: PathBuf,

        /// Appended to each input's file stem.
        #[arg(long, default_value = stackpost_worker::alignment::DEFAULT_SUFFIX)]
        suffix: String,

        /// Abort the run if it takes longer than this many seconds.
        #[arg(long, value_name = "SECONDS")]
        max_seconds: Option<f64>,
    },

    /// Write a settings file, or show what one contains.
    Settings {
        #[command(flatten)]
        settings: SettingsArgs,

        /// Write the resulting settings as XML to this path.
        #[arg(long, value_name = "FILE")]
        write: Option<PathBuf>,

        /// Print the resulting settings as JSON.
        #[arg(long)]
        print_json: bool,
    },
}

#[derive(clap::Args)]
struct SettingsArgs {
    /// XML settings file; sections it contains replace the defaults.
    #[arg(long, value_name = "FILE", conflicts_with = "settings_json")]
    settings: Option<PathBuf>,

    /// JSON settings file holding a complete settings object.
    #[arg(long, value_name = "FILE")]
    settings_json: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Method {
    PhaseCorrelation,
    Limb,
}

impl From<Method> for AlignmentMethod {
    fn from(method: Method) -> Self {
        match method {
            Method::PhaseCorrelation => Self::PhaseCorrelation,
            Method::Limb => Self::Limb,
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

fn load_settings(args: &SettingsArgs) -> anyhow::Result<ProcessingSettings> {
    if let Some(path) = &args.settings_json {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        return serde_json::from_str(&text)
            .with_context(|| format!("parsing JSON settings {}", path.display()));
    }

    let mut settings = ProcessingSettings::default();
    if let Some(path) = &args.settings {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let loaded = parse_settings(&text)
            .with_context(|| format!("parsing settings {}", path.display()))?;
        log::info!("{}: loaded sections {:?}", path.display(), loaded.loaded);
        loaded.apply_to(&mut settings);
    }
    Ok(settings)
}

// ---------------------------------------------------------------------------
// Driving an engine
// ---------------------------------------------------------------------------

/// The part of an engine the main loop needs.
trait Drive {
    fn wait(&mut self) -> Option<CompletionStatus>;
    fn wait_timeout(&mut self, timeout: Duration) -> Option<CompletionStatus>;
    /// Cancel and return the status the run actually settled with.
    fn abort(&mut self) -> Option<CompletionStatus>;
}

impl Drive for ProcessingEngine {
    fn wait(&mut self) -> Option<CompletionStatus> {
        Self::wait(self)
    }

    fn wait_timeout(&mut self, timeout: Duration) -> Option<CompletionStatus> {
        Self::wait_timeout(self, timeout)
    }

    fn abort(&mut self) -> Option<CompletionStatus> {
        self.abort_processing()
    }
}

impl Drive for AlignmentEngine {
    fn wait(&mut self) -> Option<CompletionStatus> {
        Self::wait(self)
    }

    fn wait_timeout(&mut self, timeout: Duration) -> Option<CompletionStatus> {
        Self::wait_timeout(self, timeout)
    }

    fn abort(&mut self) -> Option<CompletionStatus> {
        Self::abort(self)
    }
}

/// Deliver progress until the run settles, aborting once `budget`
/// elapses.
fn drive(engine: &mut impl Drive, budget: Option<Duration>) -> CompletionStatus {
    let settled = match budget {
        None => engine.wait(),
        Some(budget) => engine.wait_timeout(budget).or_else(|| {
            log::warn!("time budget exhausted, aborting");
            engine.abort()
        }),
    };
    settled.unwrap_or(CompletionStatus::Aborted)
}

fn budget(max_seconds: Option<f64>) -> anyhow::Result<Option<Duration>> {
    max_seconds
        .map(|seconds| {
            Duration::try_from_secs_f64(seconds)
                .with_context(|| format!("invalid --max-seconds {seconds}"))
        })
        .transpose()
}

fn report_progress(run: RunId, event: &ProgressEvent) {
    eprintln!("[{run}] {}", describe(event));
}

fn describe(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::TranslationComputed {
            index,
            total,
            translation,
        } => format!(
            "translation {index}/{total}: ({:.2}, {:.2})",
            translation.dx, translation.dy
        ),
        ProgressEvent::ImageSaved { index, total, path } => {
            format!("saved {}/{total}: {}", index + 1, path.display())
        }
        ProgressEvent::DiscRadiusFound {
            index,
            total,
            radius,
        } => format!("disc {}/{total}: radius {radius:.2}", index + 1),
        ProgressEvent::AverageRadiusUsed { radius } => format!("average radius {radius:.2}"),
        ProgressEvent::StabilizationProgress { index, total } => {
            format!("stabilized {}/{total}", index + 1)
        }
        ProgressEvent::StabilizationFailure { index, message } => {
            format!("frame {} skipped: {message}", index + 1)
        }
        ProgressEvent::StageProgress { stage, step, total } => format!("{stage} {step}/{total}"),
        ProgressEvent::Completed => "completed".to_string(),
        ProgressEvent::Aborted { reason } => format!("aborted: {reason}"),
    }
}

fn exit_code(status: CompletionStatus, reason: Option<&AbortReason>) -> ExitCode {
    match (status, reason) {
        (CompletionStatus::Completed, _) => ExitCode::SUCCESS,
        (CompletionStatus::Aborted, Some(AbortReason::Failed(message))) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
        (CompletionStatus::Aborted, _) => {
            eprintln!("cancelled");
            ExitCode::from(2)
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn process(
    input: &Path,
    output: &Path,
    settings: &SettingsArgs,
    max_seconds: Option<f64>,
) -> anyhow::Result<ExitCode> {
    let settings = load_settings(settings)?;
    let budget = budget(max_seconds)?;
    let image = load_mono(input)?;
    log::info!(
        "processing {} ({}x{})",
        input.display(),
        image.width(),
        image.height()
    );

    let mut engine = ProcessingEngine::new();
    engine.set_progress_handler(report_progress);
    engine.start_processing(Arc::new(image), settings)?;

    let status = drive(&mut engine, budget);
    if let Some(result) = engine.take_output() {
        save_mono16(&result, output)?;
        eprintln!("wrote {}", output.display());
    }
    Ok(exit_code(status, engine.abort_reason()))
}

fn align(
    inputs: Vec<PathBuf>,
    method: Method,
    output: OutputPolicy,
    max_seconds: Option<f64>,
) -> anyhow::Result<ExitCode> {
    let budget = budget(max_seconds)?;
    let mut engine = AlignmentEngine::new();
    engine.set_progress_handler(report_progress);
    engine.start(AlignmentRun {
        inputs,
        method: method.into(),
        output,
    })?;

    let status = drive(&mut engine, budget);
    if let Some(summary) = engine.summary() {
        eprintln!(
            "aligned {} frames, skipped {}",
            summary.frames.len(),
            summary.skipped.len()
        );
    }
    Ok(exit_code(status, engine.abort_reason()))
}

fn settings(
    settings: &SettingsArgs,
    write: Option<&Path>,
    print_json: bool,
) -> anyhow::Result<ExitCode> {
    if write.is_none() && !print_json {
        bail!("nothing to do: pass --write and/or --print-json");
    }
    let settings = load_settings(settings)?;
    if let Some(path) = write {
        let xml = to_settings_xml(&settings)?;
        std::fs::write(path, xml).with_context(|| format!("writing {}", path.display()))?;
        eprintln!("wrote {}", path.display());
    }
    if print_json {
        println!("{}", serde_json::to_string_pretty(&settings)?);
    }
    Ok(ExitCode::SUCCESS)
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
    match args.command {
        Command::Process {
            input,
            output,
            settings,
            max_seconds,
        } => process(&input, &output, &settings, max_seconds),
        Command::Align {
            inputs,
            method,
            output_dir,
            suffix,
            max_seconds,
        } => align(
            inputs,
            method,
            OutputPolicy::new(output_dir).with_suffix(suffix),
            max_seconds,
        ),
        Command::Settings {
            settings: args,
            write,
            print_json,
        } => settings(&args, write.as_deref(), print_json),
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match run(Args::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
