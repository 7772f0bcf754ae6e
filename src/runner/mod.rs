pub mod condition;
pub mod error;
pub mod events;
pub mod filters;
pub mod js_engine;
pub mod lookup;
pub mod orchestra;
pub mod state;
pub mod timeout;

use crate::driver::traits::Driver;
use crate::parser::{parse_flow_file, FlowCommand};
use crate::utils::config::OrchestraConfig;
use anyhow::Result;
use colored::Colorize;
use std::path::Path;

pub use error::{OrchestraError, OrchestraResult};
pub use events::*;
pub use js_engine::{JsEngine, ScriptEngine};
pub use orchestra::{FailFast, FailureResolver, Orchestra};
pub use state::*;

/// Run a flow file on an open driver and render progress to the console
///
/// Returns whether the flow passed together with the event totals.
pub async fn run_flow_file(
    driver: Box<dyn Driver>,
    path: &Path,
    config: OrchestraConfig,
    continue_on_failure: bool,
) -> Result<(bool, RunSummary)> {
    let flow = parse_flow_file(path)?;

    println!(
        "{} Running flow: {} on {}",
        "▶".green().bold(),
        path.display(),
        driver.name().cyan()
    );

    let mut orchestra = Orchestra::new(driver, config);
    if continue_on_failure {
        orchestra = orchestra.with_failure_resolver(
            |index: usize, command: &FlowCommand, error: &OrchestraError| {
                log::warn!(
                    "Continuing after failure of [{}] {}: {}",
                    index,
                    command.command.description(),
                    error
                );
                ErrorResolution::Continue
            },
        );
    }

    let listener = tokio::spawn(ConsoleEventListener::listen(orchestra.subscribe()));

    let result = orchestra.run_flow(&flow, None).await;
    if let Err(e) = orchestra.close().await {
        log::warn!("Failed to stop network mock: {}", e);
    }
    // Dropping the emitter ends the listener
    drop(orchestra);

    let summary = listener.await?;
    Ok((result?, summary))
}
