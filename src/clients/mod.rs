//! Implementations of the external collaborator traits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::{HookConfig, RunnerConfig};
use crate::interfaces::{ProcessorChain, ValidationHook};

pub mod command_chain;
pub mod http_hook;
pub mod mock;
pub mod static_hook;

pub use command_chain::CommandProcessorChain;
pub use http_hook::HttpValidationHook;
pub use static_hook::StaticValidationHook;

/// Build the processor chain named by `runner.processor_command`.
pub fn init_processor_chain(
    runner: &RunnerConfig,
) -> Result<Arc<dyn ProcessorChain>, Box<dyn std::error::Error>> {
    match &runner.processor_command {
        Some(command) if !command.program.is_empty() => {
            info!(program = %command.program, "Processor chain: external command");
            Ok(Arc::new(CommandProcessorChain::new(command)))
        }
        _ => Err("runner.processor_command is not configured".into()),
    }
}

/// Build every configured validation hook, keyed by lowercased name.
pub fn init_hooks(
    hooks: &HashMap<String, HookConfig>,
    timeout: Duration,
) -> Result<HashMap<String, Arc<dyn ValidationHook>>, Box<dyn std::error::Error>> {
    let mut built: HashMap<String, Arc<dyn ValidationHook>> = HashMap::new();
    for (name, config) in hooks {
        let hook: Arc<dyn ValidationHook> = match config {
            HookConfig::Static { default, overrides } => {
                info!(hook = %name, "Validation hook: static");
                Arc::new(StaticValidationHook::new(*default, overrides))
            }
            HookConfig::Http { url } => {
                info!(hook = %name, %url, "Validation hook: http");
                Arc::new(HttpValidationHook::new(url.clone(), timeout)?)
            }
        };
        built.insert(name.to_lowercase(), hook);
    }
    Ok(built)
}
