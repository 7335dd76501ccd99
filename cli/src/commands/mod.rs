//! Subcommand implementations

pub mod analyze;
pub mod dump;

use crate::output;
use indicatif::{ProgressBar, ProgressStyle};
use perfstream_aggregator::{ParserEvent, TaskHandle, TaskOutcome};
use std::time::Duration;
use tracing::debug;

const PROGRESS_STEPS: u64 = 1000;

/// Show the progress of `handle` until it ends. Ctrl-C stops the task.
///
/// Producers that never report progress get a spinner.
pub async fn follow(mut handle: TaskHandle, label: &str) -> TaskOutcome {
    let bar = ProgressBar::new_spinner().with_prefix(label.to_string());
    if let Ok(style) = ProgressStyle::with_template("{prefix} [{elapsed}]: {spinner:.green} {msg}")
    {
        bar.set_style(style);
    }
    bar.enable_steady_tick(Duration::from_millis(100));

    let cancel = handle.cancellation_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut determinate = false;
    while let Some(event) = handle.next_event().await {
        match event {
            ParserEvent::Progress(fraction) => {
                if !determinate {
                    determinate = true;
                    bar.set_length(PROGRESS_STEPS);
                    if let Ok(style) = ProgressStyle::with_template(
                        "{prefix} [{elapsed}]: {bar:40.green/white} {percent:>3}% {msg}",
                    ) {
                        bar.set_style(style);
                    }
                }
                bar.set_position((fraction.clamp(0.0, 1.0) * PROGRESS_STEPS as f32) as u64);
            }
            ParserEvent::DebugInfoDownloadProgress {
                url,
                numerator,
                denominator,
            } => {
                if numerator >= denominator {
                    bar.set_message("");
                } else {
                    bar.set_message(format!("downloading {} ({}/{})", url, numerator, denominator));
                }
            }
            ParserEvent::ParserWarning(message) => bar.suspend(|| output::warning(&message)),
            other => debug!("{:?}", ParserEventName(&other)),
        }
    }

    ctrl_c.abort();
    bar.finish_and_clear();
    handle.join().await
}

/// Notification without its payload, for logging
struct ParserEventName<'a>(&'a ParserEvent);

impl std::fmt::Debug for ParserEventName<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self.0 {
            ParserEvent::ParsingStarted => "ParsingStarted",
            ParserEvent::Progress(_) => "Progress",
            ParserEvent::DebugInfoDownloadProgress { .. } => "DebugInfoDownloadProgress",
            ParserEvent::SummaryAvailable(_) => "SummaryAvailable",
            ParserEvent::BottomUpAvailable(_) => "BottomUpAvailable",
            ParserEvent::TopDownAvailable(_) => "TopDownAvailable",
            ParserEvent::CallerCalleeAvailable(_) => "CallerCalleeAvailable",
            ParserEvent::FrequencyAvailable(_) => "FrequencyAvailable",
            ParserEvent::TracepointsAvailable(_) => "TracepointsAvailable",
            ParserEvent::EventsAvailable(_) => "EventsAvailable",
            ParserEvent::ParsingFinished => "ParsingFinished",
            ParserEvent::ParsingFailed(_) => "ParsingFailed",
            ParserEvent::ParserWarning(_) => "ParserWarning",
            ParserEvent::Stopped => "Stopped",
        };
        f.write_str(name)
    }
}
