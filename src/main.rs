use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use term_agent::operator::StdioOperator;
use term_agent::providers;
use term_agent::session::{Session, SessionConfig, SessionError};

fn main() -> anyhow::Result<()> {
    let cancel = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&cancel))
            .context("registering signal handler")?;
    }

    let scope_root = std::env::current_dir().context("resolving current directory")?;

    // A prompt on the command line runs one-shot; otherwise the session
    // loops on stdin instructions.
    let args: Vec<String> = std::env::args().skip(1).collect();
    let initial_instruction = if args.is_empty() {
        None
    } else {
        Some(args.join(" "))
    };
    let one_shot = initial_instruction.is_some();

    let provider = providers::provider_from_env()
        .map_err(|error| SessionError::Auth(error.to_string()))?;
    let config = SessionConfig::from_env(scope_root, one_shot);

    let mut operator = StdioOperator::new();
    Session::start(
        provider.as_ref(),
        &mut operator,
        config,
        initial_instruction,
        cancel,
    )?;

    Ok(())
}
