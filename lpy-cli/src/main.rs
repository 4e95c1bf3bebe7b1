use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use lpy_core::compiler::Observation;
use lpy_core::rewrite::DEFAULT_STAMP_FORMAT;
use lpy_core::sources::{SourceFile, load_sources};
use lpy_core::unparse::unparse;
use lpy_core::{Environment, Pipeline, PipelineOptions, TimestampPolicy};

/// Runs lpy programs after stamping every `print` call with the time.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Source files or directories to run in order; reads stdin when empty
    #[arg(value_name = "INPUTS")]
    inputs: Vec<PathBuf>,

    #[arg(
        long,
        value_name = "NAME",
        default_value = "print",
        help = "Name of the function whose calls receive the timestamp"
    )]
    target: String,

    #[arg(
        long,
        value_enum,
        default_value_t = TimestampMode::PerCall,
        help = "When the timestamp is read from the clock"
    )]
    timestamp: TimestampMode,

    #[arg(
        long,
        value_name = "TEXT",
        help = "Insert this text instead of reading the clock"
    )]
    fixed_timestamp: Option<String>,

    #[arg(
        long,
        value_name = "STRFTIME",
        default_value = DEFAULT_STAMP_FORMAT,
        help = "Format of the timestamp, rendered in UTC"
    )]
    stamp_format: String,

    #[arg(long, help = "Print the rewritten source of every input")]
    dump: bool,

    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "Write the wasm module of the last input to PATH"
    )]
    output: Option<PathBuf>,

    #[arg(long, help = "Compile without running")]
    no_run: bool,

    #[arg(long, help = "Do not print the numeric literal report")]
    no_report: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TimestampMode {
    PerCall,
    PerRun,
}

impl Cli {
    fn pipeline_options(&self) -> PipelineOptions {
        let timestamp = match (&self.fixed_timestamp, self.timestamp) {
            (Some(text), _) => TimestampPolicy::Fixed(text.clone()),
            (None, TimestampMode::PerCall) => TimestampPolicy::PerCallSite,
            (None, TimestampMode::PerRun) => TimestampPolicy::PerRun,
        };
        PipelineOptions {
            target: self.target.clone(),
            timestamp,
            stamp_format: self.stamp_format.clone(),
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    execute(cli)
}

fn execute(cli: Cli) -> Result<()> {
    let sources = read_sources(&cli.inputs)?;
    let mut pipeline =
        Pipeline::wasm(cli.pipeline_options()).context("invalid timestamp configuration")?;
    let mut env = Environment::new().context("failed to set up the runtime")?;

    let mut last_wasm = None;
    for source in &sources {
        let compile_context = || format!("failed to compile {}", source.name);
        let observed = pipeline
            .observe(&source.contents)
            .with_context(compile_context)?;
        if !cli.no_report {
            print_report(&observed.observations);
        }
        let transformed = pipeline.rewrite(observed).with_context(compile_context)?;
        let artifact = pipeline
            .lower(transformed, &source.name)
            .with_context(compile_context)?;

        if cli.dump {
            print!("{}", unparse(&artifact.transformed.module));
        }
        if !cli.no_run {
            pipeline
                .execute(&artifact, &mut env)
                .with_context(|| format!("failed to run {}", source.name))?;
        }
        last_wasm = Some(artifact.unit.wasm);
    }

    if let Some(path) = &cli.output {
        let wasm = last_wasm.context("no input was compiled, nothing to write")?;
        write_output(path, &wasm)?;
    }
    Ok(())
}

fn read_sources(inputs: &[PathBuf]) -> Result<Vec<SourceFile>> {
    if inputs.is_empty() {
        let mut contents = String::new();
        io::stdin()
            .read_to_string(&mut contents)
            .context("failed to read stdin")?;
        return Ok(vec![SourceFile {
            name: "<stdin>".to_string(),
            path: PathBuf::from("<stdin>"),
            contents,
        }]);
    }

    let mut sources = Vec::new();
    for input in inputs {
        let found = load_sources(input)
            .with_context(|| format!("failed to read input {}", input.display()))?;
        if found.is_empty() {
            log::warn!("no source files found under {}", input.display());
        }
        sources.extend(found);
    }
    Ok(sources)
}

fn print_report(observations: &[Observation]) {
    println!("{}", "-".repeat(20));
    for observation in observations {
        println!("visit Num {}", observation.value);
    }
    println!("{}", "-".repeat(20));
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {parent:?}"))?;
        }
    }
    fs::write(path, bytes)
        .with_context(|| format!("failed to write output file {}", path.display()))?;
    Ok(())
}
