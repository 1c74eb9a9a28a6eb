use std::process::ExitCode;

use ipwatch::app::App;
use ipwatch::cli::Cli;
use tracing_subscriber::EnvFilter;

/// Logs go to stderr so stdout stays parseable; `RUST_LOG` overrides the
/// level chosen by `--verbose`.
fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ipwatch={}", cli.log_directive())));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::from_args();
    init_tracing(&cli);

    match App::run(&cli).await {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            if cli.error_enabled() {
                eprintln!("Error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}
