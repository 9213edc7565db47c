//! chanarch binary entry point.
//!
//! Parses arguments, initializes logging and runs the selected command.
//! For library usage, see the chanarch-cli crate documentation.

use anyhow::Result;
use chanarch_cli::{CliConfig, run};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let config = CliConfig::from_args();

    // Logs go to stderr so command output stays pipeable
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_filter())),
        )
        .with_writer(std::io::stderr);
    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let output = run(&config)?;
    print!("{output}");
    Ok(())
}
