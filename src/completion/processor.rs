//! Runs a request file through the dispatcher and writes the outcome log

use crate::completion::request::{load_requests, CompletionRequest};
use crate::completion::worker::{CompletionOutput, CompletionWorker};
use crate::config::Config;
use crate::dispatch::{
    iter_source, CapacityRegulator, CostProbe, DispatchSettings, Dispatcher, HaltSignal,
};
use crate::output::{write_escalations, JsonlSink, OutcomeSink, RunStats};
use crate::HarvestError;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Result of processing one request file
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub stats: RunStats,
    pub elapsed: Duration,

    /// Requests that did not complete
    pub escalated: Vec<CompletionRequest>,

    pub halt_reason: Option<String>,

    /// Average completion tokens per request measured by the probe
    pub calibrated_completion: Option<f64>,
}

/// Processes every request in `input`, appending outcomes to `output`
///
/// Runs a cost probe first when `[probe]` is enabled, otherwise one
/// dispatcher run against the configured limits. Requests that never
/// complete are written to the escalation file.
///
/// # Arguments
///
/// * `config` - Validated configuration with a `[completion]` section
/// * `input` - JSONL request file
/// * `output` - JSONL outcome log, appended to
/// * `use_probe` - Allows the probe when the configuration enables it
pub async fn process_requests(
    config: &Config,
    input: &Path,
    output: &Path,
    use_probe: bool,
) -> Result<ProcessReport, HarvestError> {
    let completion = config
        .completion
        .as_ref()
        .ok_or(HarvestError::MissingCompletion)?;

    let requests = load_requests(input)?;
    tracing::info!(
        "Loaded {} request(s) from {} ({:?} mode)",
        requests.len(),
        input.display(),
        completion.mode
    );

    let worker = Arc::new(CompletionWorker::from_env(completion, &config.user_agent)?);
    let log: Arc<dyn OutcomeSink<CompletionRequest, CompletionOutput>> =
        Arc::new(JsonlSink::append(output)?);
    let settings = DispatchSettings::from_config(&config.dispatch);
    let limits = config.capacity.limits();
    let halt = HaltSignal::new();

    let interrupt = {
        let halt = halt.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, stopping admissions");
                halt.halt("interrupted");
            }
        })
    };

    let report = if use_probe && config.probe.enabled {
        let probe = CostProbe::new("completion", worker, limits, config.probe.probe_size)
            .settings(settings)
            .sink(log)
            .with_halt_signal(halt);
        let report = probe.run(iter_source(requests)).await;

        ProcessReport {
            stats: report.stats(),
            elapsed: report.elapsed(),
            halt_reason: report.halt_reason().map(str::to_string),
            calibrated_completion: report.calibration.map(|c| c.completion_average),
            escalated: report.escalated,
        }
    } else {
        let mut dispatcher =
            Dispatcher::builder("completion", worker, CapacityRegulator::from_per_minute(limits))
                .settings(settings)
                .sink(log)
                .halt_signal(halt)
                .build();
        let report = dispatcher.run(iter_source(requests)).await;

        ProcessReport {
            stats: report.stats,
            elapsed: report.elapsed,
            halt_reason: report.halt_reason,
            calibrated_completion: None,
            escalated: dispatcher.escalations().take(),
        }
    };
    interrupt.abort();

    if !report.escalated.is_empty() {
        let path = Path::new(&config.output.escalation_path);
        write_escalations(path, &report.escalated)?;
        tracing::warn!(
            "{} request(s) did not complete; written to {}",
            report.escalated.len(),
            path.display()
        );
    }

    Ok(report)
}
