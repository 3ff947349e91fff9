mod cli;

use std::process;

use mini_docker::core::error::Error;

fn main() {
    init_logging();

    let args = cli::parse();

    match cli::commands::dispatch(args) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("mini-docker: {e}");
            process::exit(exit_code_for(&e));
        }
    }
}

fn init_logging() {
    let filter = std::env::var("MINI_DOCKER_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

/// Map the error taxonomy to a process exit code (spec §6): every
/// controller error, including a not-found lookup, exits `1`.
fn exit_code_for(_e: &Error) -> i32 {
    1
}
