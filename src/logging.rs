//! Logging bootstrap
//!
//! Every crate logs through `tracing`. Nothing is printed until a subscriber
//! is installed; [`init`] installs a formatting subscriber filtered by the
//! `HYPERSTORE_LOG` environment variable, or `RUST_LOG` when it is unset.
//!
//! ```text
//! HYPERSTORE_LOG=hyperstore_concurrency=debug,info
//! ```

use tracing_subscriber::EnvFilter;

/// Environment variable read by [`init`]
pub const LOG_ENV: &str = "HYPERSTORE_LOG";

/// Install the subscriber with the environment filter (default `warn`)
///
/// Returns false if a global subscriber was already installed. Safe to call
/// more than once.
pub fn init() -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    install(filter)
}

/// Install the subscriber with an explicit filter directive
///
/// Returns false if a global subscriber was already installed.
pub fn init_with_filter(directives: &str) -> bool {
    install(EnvFilter::new(directives))
}

fn install(filter: EnvFilter) -> bool {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!("logging initialised");
    }
    installed
}
