use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::error;
use tracing_subscriber::EnvFilter;

use pf_engine::engine::{Engine, EngineKind};
use pf_runtime::tutorials::format_propagation::{format_propagation, FormatPropagationConfig};
use pf_runtime::tutorials::get_started::get_started;
use pf_runtime::tutorials::int8_matmul::{int8_matmul, Int8MatMulConfig};
use pf_runtime::{TutorialError, TutorialResult};

#[derive(Debug, clap::Parser)]
struct Args {
    /// The engine to run on.
    #[clap(short, long, value_enum, default_value_t = EngineArg::Cpu)]
    engine: EngineArg,
    /// Log filter, in `RUST_LOG` syntax. Use `pf_engine::verbose=info` for per-primitive timings.
    #[clap(long, default_value = "info")]
    log: String,
    /// Seed for the generated inputs.
    #[clap(long, default_value_t = 0)]
    seed: u64,

    #[clap(subcommand)]
    tutorial: Tutorial,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum EngineArg {
    Cpu,
    Gpu,
}

#[derive(Debug, Subcommand)]
enum Tutorial {
    /// Relu on a channels-last image.
    GetStarted,
    /// Convolution and pooling with engine-chosen layouts.
    FormatPropagation {
        #[clap(long, default_value_t = 1)]
        batch: usize,
        #[clap(long, default_value_t = 128)]
        channels_in: usize,
        #[clap(long, default_value_t = 256)]
        channels_out: usize,
        #[clap(long, default_value_t = 14)]
        size: usize,
    },
    /// Quantized matmul with a runtime row count.
    Int8Matmul {
        #[clap(long, default_value_t = 96)]
        k: usize,
        #[clap(long, default_value_t = 1000)]
        n: usize,
        #[clap(short, long, value_delimiter = ',', default_value = "1,100")]
        m: Vec<usize>,
        #[clap(long, default_value_t = 1)]
        runs: usize,
    },
    /// Every tutorial with its default problem size.
    All,
}

impl From<EngineArg> for EngineKind {
    fn from(arg: EngineArg) -> Self {
        match arg {
            EngineArg::Cpu => EngineKind::Cpu,
            EngineArg::Gpu => EngineKind::Gpu,
        }
    }
}

fn main() -> ExitCode {
    let Args {
        engine,
        log,
        seed,
        tutorial,
    } = Args::parse();

    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(&log)).init();

    let kind = EngineKind::from(engine);
    match run(kind, seed, tutorial) {
        Ok(()) => {
            println!("Example passed on {}.", kind);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            println!("Example failed on {}.", kind);
            match e {
                TutorialError::Pf(_) => ExitCode::from(1),
                TutorialError::DescriptorMismatch(_) | TutorialError::Accuracy { .. } => ExitCode::from(2),
            }
        }
    }
}

fn run(kind: EngineKind, seed: u64, tutorial: Tutorial) -> TutorialResult<()> {
    let engine = Engine::new(kind, 0)?;
    let mut rng = StdRng::seed_from_u64(seed);

    match tutorial {
        Tutorial::GetStarted => get_started(&engine),
        Tutorial::FormatPropagation {
            batch,
            channels_in,
            channels_out,
            size,
        } => {
            let config = FormatPropagationConfig {
                batch,
                channels_in,
                channels_out,
                size,
                ..Default::default()
            };
            format_propagation(&engine, &config, &mut rng).map(|_| ())
        }
        Tutorial::Int8Matmul { k, n, m, runs } => {
            let config = Int8MatMulConfig { k, n, rows: m, runs };
            int8_matmul(&engine, &config, &mut rng)
        }
        Tutorial::All => {
            get_started(&engine)?;
            format_propagation(&engine, &FormatPropagationConfig::default(), &mut rng)?;
            int8_matmul(&engine, &Int8MatMulConfig::default(), &mut rng)
        }
    }
}
