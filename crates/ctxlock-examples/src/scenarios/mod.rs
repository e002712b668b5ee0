use crate::{AnyResult, Config};

pub mod async_workers;
pub mod cancelled_waiter;
pub mod fan_out_reset;
pub mod nested_calls;

pub const NAMES: &[&str] = &[
    "nested_calls",
    "cancelled_waiter",
    "fan_out_reset",
    "async_workers",
];

pub async fn run(name: &str, cfg: &Config) -> AnyResult<()> {
    match name {
        "nested_calls" => nested_calls::run(cfg).await,
        "cancelled_waiter" => cancelled_waiter::run(cfg).await,
        "fan_out_reset" => fan_out_reset::run(cfg).await,
        "async_workers" => async_workers::run(cfg).await,
        other => Err(format!("scenario '{other}' is not wired up")),
    }
}

/// Prints the lock report, or a note when nothing is held or waited on.
pub(crate) fn print_diagnostics(label: &str) {
    let report = ctxlock::dump_lock_diagnostics();
    if report.is_empty() {
        println!("[{label}] no lock is held or waited on");
    } else {
        println!("[{label}]\n{report}");
    }
}
