use std::env;
use std::time::Duration;

mod scenarios;

type AnyResult<T> = Result<T, String>;

struct Args {
    list: bool,
    requested: Option<String>,
}

#[derive(Clone, Copy)]
pub(crate) struct Config {
    pub(crate) workers: usize,
    pub(crate) timeout: Duration,
    pub(crate) hold: Duration,
    /// `hold` split evenly between the workers.
    pub(crate) hold_per_worker: Duration,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

async fn run() -> AnyResult<()> {
    let args = parse_args()?;

    if args.list {
        for name in scenarios::NAMES {
            println!("{name}");
        }
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = config_from_env()?;
    let selected = match args.requested {
        Some(requested) => resolve_requested(&requested)?,
        None => {
            print_help();
            return Err("No scenario given".to_owned());
        }
    };

    tracing::info!(
        scenario = selected,
        workers = cfg.workers,
        timeout_ms = cfg.timeout.as_millis() as u64,
        hold_ms = cfg.hold.as_millis() as u64,
        "running scenario"
    );
    scenarios::run(selected, &cfg).await
}

fn parse_args() -> AnyResult<Args> {
    let mut list = false;
    let mut requested: Option<String> = None;

    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--list" => {
                list = true;
            }
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            _ if arg.starts_with('-') => {
                return Err(format!("Unknown option '{arg}'"));
            }
            _ => {
                if requested.is_some() {
                    return Err("Too many arguments".to_owned());
                }
                requested = Some(arg);
            }
        }
    }

    Ok(Args { list, requested })
}

fn print_help() {
    eprintln!("Usage: ctxlock-examples [--list] <scenario>");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  CTXLOCK_WORKERS     concurrent call paths (default 3)");
    eprintln!("  CTXLOCK_TIMEOUT_MS  per-call-path deadline (default 25)");
    eprintln!("  CTXLOCK_HOLD_MS     how long holders keep the lock (default 50)");
    eprintln!("  RUST_LOG            tracing filter (default info)");
}

fn config_from_env() -> AnyResult<Config> {
    config_from_values(
        env_number("CTXLOCK_WORKERS", 3)?,
        env_number("CTXLOCK_TIMEOUT_MS", 25)?,
        env_number("CTXLOCK_HOLD_MS", 50)?,
    )
}

fn config_from_values(workers: u64, timeout_ms: u64, hold_ms: u64) -> AnyResult<Config> {
    let divisor = u32::try_from(workers)
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| format!("CTXLOCK_WORKERS must be between 1 and {}", u32::MAX))?;
    let workers = usize::try_from(divisor)
        .map_err(|_| format!("CTXLOCK_WORKERS={workers} does not fit this platform"))?;
    let hold = Duration::from_millis(hold_ms);

    Ok(Config {
        workers,
        timeout: Duration::from_millis(timeout_ms),
        hold,
        hold_per_worker: hold / divisor,
    })
}

fn env_number(name: &str, default: u64) -> AnyResult<u64> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e| format!("invalid {name}='{value}': {e}")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(format!("invalid {name}: {e}")),
    }
}

fn contains_case_insensitive(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn resolve_requested(requested: &str) -> AnyResult<&'static str> {
    if let Some(exact) = scenarios::NAMES.iter().find(|name| **name == requested) {
        return Ok(*exact);
    }

    if let Some(substring_match) = scenarios::NAMES
        .iter()
        .find(|name| contains_case_insensitive(name, requested))
    {
        eprintln!("Using closest scenario match '{substring_match}' for '{requested}'.");
        return Ok(*substring_match);
    }

    eprintln!("Unknown scenario '{requested}'. Available scenarios:");
    for name in scenarios::NAMES {
        eprintln!("{name}");
    }
    Err("No matching scenario found".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hold_is_split_between_workers() {
        let cfg = config_from_values(4, 25, 100).unwrap();
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.hold_per_worker, Duration::from_millis(25));
    }

    #[test]
    fn worker_counts_outside_u32_are_rejected() {
        assert!(config_from_values(0, 25, 50).is_err());
        assert!(config_from_values(1 << 32, 25, 50).is_err());
        assert!(config_from_values(u64::from(u32::MAX), 25, 50).is_ok());
    }
}
