//! Provider selection for the binary.

use inference_provider::{ProviderInitError, TurnProvider};
use inference_provider_mock::ScriptedProvider;

pub const PROVIDER_ENV_VAR: &str = "TERM_AGENT_PROVIDER";

/// Builds the provider named by `TERM_AGENT_PROVIDER` (default: `mock`).
pub fn provider_from_env() -> Result<Box<dyn TurnProvider>, ProviderInitError> {
    let selected = std::env::var(PROVIDER_ENV_VAR).unwrap_or_else(|_| "mock".to_string());

    match selected.trim() {
        "" | "mock" => Ok(Box::new(ScriptedProvider::default())),
        other => Err(ProviderInitError::new(format!(
            "unknown provider '{other}'; supported providers: mock"
        ))),
    }
}
