//! Interactive text-to-image sampling shell.
//!
//! Reads prompt lines from stdin, each optionally carrying `--flag value`
//! overrides, and writes the generated samples and grids under the output
//! directory. Terminate with end-of-input (Ctrl-D).

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use log::info;
use std::io;
use std::path::PathBuf;

use sdshell::backend::ProceduralBackend;
use sdshell::config::{self, Sampler, SessionConfig};
use sdshell::output::OutputManager;
use sdshell::rng::SeedStream;
use sdshell::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Precision {
    Full,
    Autocast,
}

#[derive(Parser, Debug)]
#[command(version, about = "Interactive text-to-image sampling shell")]
struct Args {
    /// Directory to write results to
    #[arg(long, default_value = "outputs/txt2img-samples")]
    outdir: PathBuf,

    /// Do not save a grid, only individual samples
    #[arg(long)]
    skip_grid: bool,

    /// Do not save individual samples
    #[arg(long)]
    skip_save: bool,

    /// Number of sampling steps
    #[arg(long, default_value_t = 50)]
    steps: usize,

    /// Use plms sampling (the default)
    #[arg(long)]
    plms: bool,

    /// Use ddim sampling
    #[arg(long)]
    ddim: bool,

    /// Reuse the same starting code across iterations
    #[arg(long)]
    fixed_code: bool,

    /// ddim eta (eta=0.0 corresponds to deterministic sampling)
    #[arg(long, default_value_t = 0.0)]
    eta: f64,

    /// Sample this often per prompt
    #[arg(long, default_value_t = 1)]
    n_iter: usize,

    /// Image height, in pixel space
    #[arg(long = "H", default_value_t = 512)]
    height: usize,

    /// Image width, in pixel space
    #[arg(long = "W", default_value_t = 512)]
    width: usize,

    /// How many samples to produce per prompt (batch size)
    #[arg(long, default_value_t = 1)]
    n_samples: usize,

    /// Images per grid row (0 uses the batch size)
    #[arg(long, default_value_t = 2)]
    n_rows: usize,

    /// Unconditional guidance scale
    #[arg(long, default_value_t = 7.5)]
    scale: f64,

    /// The seed (for reproducible sampling)
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Numeric precision for the backend
    #[arg(long, value_enum, default_value_t = Precision::Autocast)]
    precision: Precision,

    /// Path to the model config, checked at startup when given
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the model checkpoint, checked at startup when given
    #[arg(long)]
    ckpt: Option<PathBuf>,
}

fn main() -> Result<()> {
    sdshell::logging::init_logger();
    let args = Args::parse();

    for (label, path) in [("config", &args.config), ("checkpoint", &args.ckpt)] {
        if let Some(p) = path {
            if !p.exists() {
                bail!("{} file not found: {}", label, p.display());
            }
        }
    }
    for (label, v) in [("--W", args.width), ("--H", args.height)] {
        if !config::valid_dimension(v) {
            bail!("{} must be a multiple of {}", label, config::BLOCK_SIZE);
        }
    }

    let config = SessionConfig {
        sampler: if args.ddim {
            Sampler::Ddim
        } else {
            Sampler::Plms
        },
        steps: args.steps,
        n_samples: args.n_samples,
        n_iter: args.n_iter,
        n_rows: args.n_rows,
        scale: args.scale,
        width: args.width,
        height: args.height,
        seed: args.seed,
        skip_grid: args.skip_grid,
        skip_save: args.skip_save,
        fixed_code: args.fixed_code,
        eta: args.eta,
    };

    let seeds = SeedStream::new(config.seed);
    info!("Seed set to: {}", config.seed);
    info!(
        "precision: {:?}, sampler: {}, writing to {}",
        args.precision,
        config.sampler,
        args.outdir.display()
    );

    let output = OutputManager::new(&args.outdir)?;
    let mut session = Session::new(config, ProceduralBackend, output, seeds);

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    session.run(&mut stdin.lock(), &mut stdout)?;

    info!(
        "Your samples are ready and waiting for you here: {}",
        args.outdir.display()
    );
    Ok(())
}
