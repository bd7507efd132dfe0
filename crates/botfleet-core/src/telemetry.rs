//! Log output for the `botfleet` command.
//!
//! Everything is written to stderr; stdout carries command results only,
//! so `botfleet --json ... | jq` keeps working with logging enabled.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset. `--verbose` opens up debug output
/// for the fleet crates without dragging in every dependency's spans.
fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "warn,botfleet=debug,botfleet_core=debug,botfleet_env=debug"
    } else {
        "warn,botfleet=info,botfleet_core=info,botfleet_env=info"
    }
}

/// Install the process-wide subscriber. `json` mirrors the `--json` flag
/// and switches log lines to newline-delimited JSON. Later calls are no-ops.
pub fn init_tracing(json: bool, verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));
    let stderr = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let installed = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr.json())
            .try_init()
    } else {
        tracing_subscriber::registry().with(filter).with(stderr).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_parse() {
        for verbose in [false, true] {
            assert!(EnvFilter::try_new(default_directives(verbose)).is_ok());
        }
        assert!(default_directives(true).contains("botfleet_env=debug"));
    }

    #[test]
    fn test_second_init_is_ignored() {
        init_tracing(false, false);
        init_tracing(true, true);
    }
}
