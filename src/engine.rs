use crate::channel::CommandChannel;
use crate::error::TransportError;
use crate::parser::ResponseParser;
use crate::types::{ExecutionOutcome, Grade, RunStatistics, RunSummary, Testlet};
use tracing::{error, info, warn};

fn log_outcome(outcome: &ExecutionOutcome) {
    let t = &outcome.testlet;
    info!("Expecting: {}, device reports: {}", t.expected_result, outcome.observed_action);
    if let Some(nat) = outcome.nat() {
        info!("NAT detected: {} to {} (rule \"{}\")", nat.from, nat.to, nat.rule);
    }
    if !outcome.drop_reason.is_empty() {
        info!("Drop reason: {}", outcome.drop_reason);
    }
    match outcome.grade {
        Grade::Pass => info!("Test passed"),
        _ => error!("Test failed: '{}' on interface '{}'", t.command, t.interface),
    }
}

/// Runs every testlet in order, one command at a time.
///
/// Non-executable testlets are graded SKIP without touching the channel. A
/// transport failure aborts the remaining testlets and is returned as is.
pub fn execute<C, P>(
    testlets: Vec<Testlet>,
    channel: &mut C,
    parser: &P,
) -> Result<RunSummary, TransportError>
where
    C: CommandChannel + ?Sized,
    P: ResponseParser + ?Sized,
{
    let mut statistics = RunStatistics::default();
    let mut outcomes = Vec::with_capacity(testlets.len());

    for testlet in testlets {
        let outcome = if testlet.executable {
            info!("Executing on interface {}: {}", testlet.interface, testlet.command);
            let raw = channel.send(&testlet.command)?;
            let outcome = ExecutionOutcome::graded(testlet, parser.parse(&raw));
            log_outcome(&outcome);
            outcome
        } else {
            warn!(
                "Skipping declaration {} on interface '{}': unable to resolve {} or {}",
                testlet.index, testlet.interface, testlet.source_ip, testlet.destination_ip
            );
            ExecutionOutcome::skipped(testlet)
        };
        statistics.record(&outcome.testlet.interface, outcome.grade);
        outcomes.push(outcome);
    }

    let agg = statistics.aggregate;
    info!(
        "Finished: {} total, {} passed, {} failed, {} skipped",
        agg.total, agg.pass, agg.fail, agg.skip
    );
    Ok(RunSummary {
        statistics,
        outcomes,
    })
}
