use crate::channel::CommandChannel;
use crate::engine::execute;
use crate::error::{RunError, TransportError};
use crate::expand::expand;
use crate::parser::ResponseParser;
use crate::report::write_results;
use crate::resolve::AddressResolver;
use crate::retry::write_retry;
use crate::spec::TestSpec;
use crate::types::RunSummary;
use crate::validate::check_spec;
use std::path::PathBuf;
use tracing::{info, warn};

/// Validate, expand and execute. Nothing reaches the channel unless every
/// declaration validated.
pub fn run<C, P>(
    spec: &TestSpec,
    resolver: &AddressResolver,
    channel: &mut C,
    parser: &P,
) -> Result<RunSummary, RunError>
where
    C: CommandChannel + ?Sized,
    P: ResponseParser + ?Sized,
{
    let validated = check_spec(spec, resolver)?;
    let testlets = expand(&validated, resolver);
    Ok(execute(testlets, channel, parser)?)
}

/// Files a completed run leaves behind.
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub retry: PathBuf,
    pub results: Option<PathBuf>,
}

/// Writes the artifacts of a completed run, then releases the session.
/// A failed close only warns. Returns the number of retry declarations.
pub fn conclude<F>(summary: &RunSummary, artifacts: &Artifacts, close: F) -> anyhow::Result<usize>
where
    F: FnOnce() -> Result<(), TransportError>,
{
    if let Some(path) = &artifacts.results {
        write_results(path, summary)?;
        info!("Results written to {}", path.display());
    }
    let retried = write_retry(&artifacts.retry, &summary.outcomes)?;
    if let Err(e) = close() {
        warn!("Session did not close cleanly: {}", e);
    }
    Ok(retried)
}
