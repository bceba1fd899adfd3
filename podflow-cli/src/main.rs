//! podflow CLI entry point.
//!
//! Initializes logging and delegates to the commands module.

mod commands;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = commands::parse_cli();

    // RUST_LOG wins over --log-level
    podflow::observability::init_logging(&cli.log_level, cli.json_logs)?;

    let code = commands::run_with_cli(cli).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
