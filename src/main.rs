use std::{env, process::ExitCode, sync::Arc, time::Instant};

use tessel::{
    programs,
    runtime::{
        config::RuntimeConfig,
        execution::{Execution, RunReport},
        scheduler::QueueScheduler,
        signal::Signal,
        value::Value,
    },
};
use tracing::Level;

fn main() -> ExitCode {
    let mut args: Vec<String> = env::args().collect();
    let verbose = args.iter().any(|arg| arg == "--verbose");
    let trace = args.iter().any(|arg| arg == "--trace");
    let deterministic = args.iter().any(|arg| arg == "--deterministic");
    let show_stats = args.iter().any(|arg| arg == "--stats");
    let json = args.iter().any(|arg| arg == "--json");
    args.retain(|arg| {
        !matches!(
            arg.as_str(),
            "--verbose" | "--trace" | "--deterministic" | "--stats" | "--json"
        )
    });
    let Some(n) = extract_value::<i64>(&mut args, "--n", "<count>") else {
        return ExitCode::FAILURE;
    };
    let Some(config_path) = extract_value::<String>(&mut args, "--config", "<file.json>") else {
        return ExitCode::FAILURE;
    };

    let level = if trace {
        Level::TRACE
    } else if verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    if args.len() < 2 {
        print_help();
        return ExitCode::SUCCESS;
    }
    let scenario = args[1].as_str();
    if matches!(scenario, "-h" | "--help" | "help") {
        print_help();
        return ExitCode::SUCCESS;
    }

    let config = match load_config(config_path.as_deref()) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("Error: {}", message);
            return ExitCode::FAILURE;
        }
    };
    let execution = match build_execution(config, deterministic) {
        Ok(execution) => execution,
        Err(message) => {
            eprintln!("Error: {}", message);
            return ExitCode::FAILURE;
        }
    };

    let started = Instant::now();
    let report = match scenario {
        "countdown" => direct_report(&execution, {
            let n = n.unwrap_or(1_000_000);
            execution.invoke(programs::countdown(), vec![Value::Integer(n)])
        }),
        "even-odd" => direct_report(
            &execution,
            programs::is_even(&execution, n.unwrap_or(1_000_000)),
        ),
        "fan-out" => execution.run(programs::fan_out(n.unwrap_or(8)), Vec::new()),
        "each" => {
            let elements = (0..n.unwrap_or(5)).map(Value::Integer).collect();
            execution.run(programs::each(), vec![Value::tuple(elements)])
        }
        "futures" => execution.run(programs::pipeline(), Vec::new()),
        "stalled" => execution.run(programs::stalled(), Vec::new()),
        other => {
            eprintln!("Error: unknown scenario `{}`", other);
            print_help();
            return ExitCode::FAILURE;
        }
    };
    let elapsed = started.elapsed();

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(err) => {
                eprintln!("Error: failed to serialize report: {}", err);
                return ExitCode::FAILURE;
            }
        }
    } else {
        for value in &report.publications {
            println!("{}", value);
        }
        if !report.completed {
            eprintln!("warning: run did not quiesce");
        }
        if show_stats {
            eprintln!("\n--- {} ({:.3?}) ---", scenario, elapsed);
            eprintln!("{}", report.stats);
        }
    }
    if report.completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn load_config(path: Option<&str>) -> Result<RuntimeConfig, String> {
    let mut config = match path {
        Some(path) => RuntimeConfig::from_json_file(path).map_err(|err| err.to_string())?,
        None => RuntimeConfig::default(),
    };
    config.apply_env_overrides().map_err(|err| err.to_string())?;
    config.validate().map_err(|err| err.to_string())?;
    Ok(config)
}

fn build_execution(config: RuntimeConfig, deterministic: bool) -> Result<Execution, String> {
    let builder = Execution::builder().config(config);
    let builder = if deterministic {
        builder.scheduler(Arc::new(QueueScheduler::new()))
    } else {
        builder
    };
    builder.build().map_err(|err| err.to_string())
}

/// Wraps the result of a direct root invocation as a run report.
fn direct_report(execution: &Execution, result: Result<Value, Signal>) -> RunReport {
    let (publications, completed) = match result {
        Ok(value) => (vec![value], true),
        Err(signal) => {
            eprintln!("error: root call ended with {:?}", signal);
            (Vec::new(), false)
        }
    };
    RunReport {
        publications,
        completed,
        discorporated: false,
        stats: execution.stats().snapshot(),
    }
}

fn extract_value<T: std::str::FromStr>(
    args: &mut Vec<String>,
    flag: &str,
    placeholder: &str,
) -> Option<Option<T>> {
    let mut value = None;
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag {
            if i + 1 >= args.len() {
                eprintln!("Usage: tessel <scenario> {} {}", flag, placeholder);
                return None;
            }
            let raw = args.remove(i + 1);
            args.remove(i);
            match raw.parse::<T>() {
                Ok(parsed) => value = Some(parsed),
                Err(_) => {
                    eprintln!("Error: {} expects {}, got `{}`.", flag, placeholder, raw);
                    return None;
                }
            }
            continue;
        }
        i += 1;
    }
    Some(value)
}

fn print_help() {
    println!(
        "\
Tessel runtime driver

Usage:
  tessel countdown [--n <count>]
  tessel even-odd [--n <count>]
  tessel fan-out [--n <width>]
  tessel each [--n <count>]
  tessel futures
  tessel stalled

Flags:
  --n <count>          Problem size for the scenario
  --config <file.json> Load runtime configuration (TESSEL_* variables override it)
  --deterministic      Run every task on the calling thread, in submission order
  --stats              Print execution counters after the run
  --json               Print the run report as JSON
  --verbose            Log dispatch and trampoline decisions
  --trace              Log every task and spawn decision
  -h, --help           Show this help message
"
    );
}
