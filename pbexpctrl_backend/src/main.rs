//! Command-line front end.
//!
//! ```bash
//! # Print the compiled program for a Hahn echo without touching the board
//! pbexpctrl_backend_bin plan ramsey-hahn-dd --free-precession-time 10us --n-refocussing-pi-pulses 1
//!
//! # Upload pulsed ODMR with parameters from a file and start playback
//! pbexpctrl_backend_bin --board 0 program pulsed-odmr --config pulsed.json --rf-width 2us --start
//!
//! pbexpctrl_backend_bin --board 0 stop
//! ```
//!
//! Without the `spinapi` feature the in-memory board is used.

use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pbcompiler_backend::utils::parse_seconds;
use pbcompiler_backend::*;
use pbexpctrl_backend::*;

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "pbexpctrl_backend_bin")]
#[command(about = "Compile and upload PulseBlaster pulse sequences")]
struct Cli {
    /// Board number (overrides the parameter file)
    #[arg(long, global = true, env = "PB_BOARD")]
    board: Option<i32>,

    /// Log level, used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a sequence and print it without touching the board
    Plan(SequenceArgs),
    /// Compile a sequence and upload it
    Program(SequenceArgs),
    /// Start playback of the uploaded program
    Start,
    /// Stop playback
    Stop,
    /// Stop playback and clear the outputs
    Reset,
}

#[derive(Clone, Copy, ValueEnum)]
enum Variant {
    HoldOpen,
    CwOdmr,
    PulsedOdmr,
    RamseyHahnDd,
}

#[derive(Args)]
struct SequenceArgs {
    #[arg(value_enum)]
    variant: Variant,

    /// JSON parameter file; fields not set keep their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// RF pulse width (CW and pulsed ODMR), e.g. `5us`
    #[arg(long, value_parser = seconds)]
    rf_width: Option<f64>,

    /// Free precession time (Ramsey/Hahn/DD), e.g. `10us`
    #[arg(long, value_parser = seconds)]
    free_precession_time: Option<f64>,

    /// Number of refocusing pi pulses (Ramsey/Hahn/DD)
    #[arg(long)]
    n_refocussing_pi_pulses: Option<u32>,

    /// Also print each pin's level at this many samples per cycle
    #[arg(long)]
    levels: Option<usize>,

    /// Start playback after uploading
    #[arg(long)]
    start: bool,
}

fn seconds(text: &str) -> Result<f64, String> {
    parse_seconds(text).ok_or_else(|| format!("not a duration: {text:?}"))
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

#[cfg(feature = "spinapi")]
fn driver() -> Box<dyn PulserDriver> {
    Box::new(SpinApiDriver::new())
}

#[cfg(not(feature = "spinapi"))]
fn driver() -> Box<dyn PulserDriver> {
    tracing::warn!("built without the spinapi feature, using an in-memory board");
    Box::new(FakeDriver::new())
}

/// Reads the parameter file (if any) and applies the `--board` override.
fn load_params<P: DeserializeOwned>(config: Option<&Path>, board: Option<i32>) -> CliResult<P> {
    let mut value = match config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => serde_json::Value::Object(Default::default()),
    };
    if let (Some(board), Some(fields)) = (board, value.as_object_mut()) {
        fields.remove("pb_board_number");
        fields.insert("board".to_string(), board.into());
    }
    Ok(serde_json::from_value(value)?)
}

fn print_program<S: SequenceFamily>(result: &TimingResult<S>, program: &PulseProgram, nsamps: Option<usize>) -> CliResult<()> {
    println!("{} on board {}", S::NAME, result.params.board());
    println!(
        "conditions: {}",
        serde_json::to_string_pretty(&result.params.experimental_conditions())?
    );
    println!("intervals:");
    for iv in result.plan.intervals() {
        println!("  {iv}");
    }
    println!("instructions:");
    for instr in program.instructions() {
        println!("  {instr}");
    }
    println!(
        "cycle width: {} ns, clock cycles per cycle: {}",
        program.cycle_width_ns(),
        program.clock_cycle_count()
    );
    if let Some(nsamps) = nsamps {
        let pins: Vec<u8> = program.pins().iter().map(|pin| pin.index()).collect();
        println!("levels (rows = pins {pins:?}):\n{}", program.calc_levels(nsamps));
    }
    Ok(())
}

fn run<S>(args: &SequenceArgs, board: Option<i32>, overrides: S::Overrides, upload: bool) -> CliResult<()>
where
    S: SequenceFamily + DeserializeOwned,
{
    let params: S = load_params(args.config.as_deref(), board)?;
    let mut pulser = PulseBlaster::new(params, driver());
    let (result, program) = pulser.preview(&overrides)?;
    print_program(&result, &program, args.levels)?;
    if !upload {
        return Ok(());
    }
    let clock_cycle_count = pulser.program_pulser_state(&overrides)?;
    info!(clock_cycle_count, "uploaded");
    if args.start {
        pulser.start()?;
    }
    Ok(())
}

fn dispatch(args: &SequenceArgs, board: Option<i32>, upload: bool) -> CliResult<()> {
    match args.variant {
        Variant::HoldOpen => run::<HoldOpenParams>(args, board, (), upload),
        Variant::CwOdmr => run::<CwOdmrParams>(
            args,
            board,
            CwOdmrOverrides {
                rf_width: args.rf_width,
            },
            upload,
        ),
        Variant::PulsedOdmr => run::<PulsedOdmrParams>(
            args,
            board,
            PulsedOdmrOverrides {
                rf_width: args.rf_width,
            },
            upload,
        ),
        Variant::RamseyHahnDd => run::<RamseyHahnDdParams>(
            args,
            board,
            RamseyHahnDdOverrides {
                free_precession_time: args.free_precession_time,
                n_refocussing_pi_pulses: args.n_refocussing_pi_pulses,
            },
            upload,
        ),
    }
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let board = cli.board.unwrap_or(1);
    match &cli.command {
        Commands::Plan(args) => dispatch(args, cli.board, false),
        Commands::Program(args) => dispatch(args, cli.board, true),
        Commands::Start => Ok(DeviceSession::new(driver(), board).start()?),
        Commands::Stop => Ok(DeviceSession::new(driver(), board).stop()?),
        Commands::Reset => Ok(DeviceSession::new(driver(), board).reset()?),
    }
}
