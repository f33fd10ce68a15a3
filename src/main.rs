//! cosim-ctl entry point: CLI wiring and a single configured run.

use std::collections::HashMap;
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::NaiveDateTime;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cosim_ctl::config::CosimConfig;
use cosim_ctl::dispatch::{self, Coordinator};
use cosim_ctl::io::export::export_csv;
use cosim_ctl::model::Model;
use cosim_ctl::run::{
    ClockMode, FanOut, RunState, SessionId, StepOutcome, TracingSink, TrajectoryRecorder,
};
use cosim_ctl::transport::TransportSession;

/// Parsed CLI arguments.
struct CliArgs {
    config_path: Option<String>,
    clock: Option<ClockMode>,
    steps: Option<u64>,
    inputs: HashMap<String, f64>,
    telemetry_out: Option<String>,
}

fn print_help() {
    eprintln!("cosim-ctl: step a building-energy simulation engine over the co-simulation socket");
    eprintln!();
    eprintln!("Usage: cosim-ctl --config <path> [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>          Controller configuration (TOML)");
    eprintln!("  --clock <mode>           Override run.clock: external or internal");
    eprintln!("  --steps <n>              External clock: stop after n advances");
    eprintln!("  --input <id=value>       Input applied before the first step (repeatable)");
    eprintln!("  --telemetry-out <path>   Export step outputs to CSV");
    eprintln!("  --help                   Show this help message");
    eprintln!();
    eprintln!("Logging is controlled with RUST_LOG (default: info).");
}

fn fail(message: &str) -> ! {
    eprintln!("error: {message}");
    process::exit(1);
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        config_path: None,
        clock: None,
        steps: None,
        inputs: HashMap::new(),
        telemetry_out: None,
    };

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let mut value = || {
            i += 1;
            match args.get(i) {
                Some(v) => v.clone(),
                None => fail(&format!("{flag} requires an argument")),
            }
        };
        match flag {
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            "--config" => cli.config_path = Some(value()),
            "--clock" => {
                let v = value();
                match v.parse::<ClockMode>() {
                    Ok(mode) => cli.clock = Some(mode),
                    Err(e) => fail(&e),
                }
            }
            "--steps" => {
                let v = value();
                match v.parse::<u64>() {
                    Ok(n) => cli.steps = Some(n),
                    Err(_) => fail(&format!("--steps value \"{v}\" is not a valid u64")),
                }
            }
            "--input" => {
                let v = value();
                let parsed = v
                    .split_once('=')
                    .and_then(|(id, x)| x.trim().parse::<f64>().ok().map(|x| (id.trim(), x)));
                match parsed {
                    Some((id, x)) if !id.is_empty() => {
                        cli.inputs.insert(id.to_string(), x);
                    }
                    _ => fail(&format!("--input value \"{v}\" is not of the form id=number")),
                }
            }
            "--telemetry-out" => cli.telemetry_out = Some(value()),
            other => {
                eprintln!("error: unknown argument \"{other}\"");
                print_help();
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

/// `RUST_LOG` directives when set and valid, `info` otherwise.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn init_tracing() {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    FmtSubscriber::builder()
        .with_env_filter(log_filter(directives.as_deref()))
        .with_writer(std::io::stderr)
        .init();
}

/// Steps the session once per advance until the engine finishes, the end
/// datetime passes, or `limit` advances were made.
fn run_external(
    coordinator: &Coordinator<TransportSession>,
    id: SessionId,
    recorder: &TrajectoryRecorder,
    end: NaiveDateTime,
    limit: Option<u64>,
) {
    let mut advances = 0u64;
    loop {
        if limit.is_some_and(|n| advances >= n) {
            break;
        }
        match coordinator.advance(id, "cli") {
            Ok(StepOutcome::Advanced { .. }) => {
                advances += 1;
                if let Some(record) = recorder.records_for(id).last() {
                    println!("{record}");
                }
            }
            Ok(StepOutcome::Finished) => break,
            Err(e) => {
                eprintln!("error: {e}");
                break;
            }
        }
        let past_end = coordinator
            .status(id)
            .ok()
            .and_then(|s| s.datetime)
            .is_some_and(|now| now >= end);
        if past_end {
            break;
        }
    }
}

/// Waits for the internal clock to finish, then prints what it recorded.
fn run_internal(
    coordinator: &Coordinator<TransportSession>,
    id: SessionId,
    recorder: &TrajectoryRecorder,
) {
    while coordinator
        .status(id)
        .is_ok_and(|s| !s.state.is_terminal())
    {
        thread::sleep(Duration::from_millis(100));
    }
    for record in recorder.records_for(id) {
        println!("{record}");
    }
}

fn main() {
    let cli = parse_args();
    init_tracing();

    let Some(config_path) = cli.config_path.as_deref() else {
        eprintln!("error: --config is required");
        print_help();
        process::exit(1);
    };
    let mut config = match CosimConfig::from_toml_file(Path::new(config_path)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    // Apply overrides
    if let Some(clock) = cli.clock {
        config.run.clock = clock;
    }

    // Validate
    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }

    let model = match Model::load(&config.model) {
        Ok(model) => Arc::new(model),
        Err(e) => fail(&format!("cannot load model: {e}")),
    };

    let recorder = Arc::new(TrajectoryRecorder::new());
    let events = FanOut::new()
        .with(Arc::new(TracingSink))
        .with(recorder.clone());
    let coordinator = dispatch::from_config(&config, Arc::new(events));

    let id = match coordinator.submit(model) {
        Ok(id) => id,
        Err(e) => fail(&e.to_string()),
    };
    let params = config.run_params();
    let clock = params.clock_mode;
    if let Err(e) = coordinator.start(id, params) {
        fail(&e.to_string());
    }
    if !cli.inputs.is_empty() {
        if let Err(e) = coordinator.set_inputs(id, &cli.inputs) {
            coordinator.stop(id).ok();
            fail(&e.to_string());
        }
    }

    match clock {
        ClockMode::External => {
            run_external(&coordinator, id, &recorder, config.run.end_datetime, cli.steps);
        }
        ClockMode::Internal => run_internal(&coordinator, id, &recorder),
    }

    let final_state = coordinator.stop(id).unwrap_or(RunState::Error);
    if let Ok(status) = coordinator.status(id) {
        println!("\n{status}");
    }

    // Export CSV if requested
    if let Some(ref path) = cli.telemetry_out {
        if let Err(e) = export_csv(&recorder.records_for(id), Path::new(path)) {
            fail(&format!("failed to write CSV: {e}"));
        }
        eprintln!("Telemetry written to {path}");
    }

    if final_state == RunState::Error {
        process::exit(1);
    }
}
