//! Profiling session
//!
//! A [`PerfSession`] runs one decode or filter task at a time in the
//! background. Callers follow a task through its [`TaskHandle`]: a stream of
//! [`ParserEvent`] notifications and a final [`TaskOutcome`]. The results of
//! the latest finished parse are kept as the baseline that filters replay.

use crate::bottom_up::BottomUpResults;
use crate::caller_callee::CallerCalleeResults;
use crate::collector::{AnalysisResults, PerfDataCollector};
use crate::config::AnalysisConfig;
use crate::filter::{filter_results, Stopped};
use crate::process::{find_parser_binary, ParserProcess, ParserProcessError};
use crate::top_down::TopDownResults;
use perfstream_shared::protocol::{DecoderState, StreamDecoder};
use perfstream_shared::{EventResults, FilterAction, FrequencyResults, Summary, TracepointResults};
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Extension of files that already hold a perfparser stream
pub const STREAM_FILE_EXTENSION: &str = "perfparser";

/// Notifications sent while a task runs
#[derive(Debug, Clone)]
pub enum ParserEvent {
    ParsingStarted,
    /// Fraction of the input processed, 0 to 1
    Progress(f32),
    DebugInfoDownloadProgress {
        url: String,
        numerator: i64,
        denominator: i64,
    },
    SummaryAvailable(Arc<Summary>),
    BottomUpAvailable(Arc<BottomUpResults>),
    TopDownAvailable(Arc<TopDownResults>),
    CallerCalleeAvailable(Arc<CallerCalleeResults>),
    FrequencyAvailable(Arc<FrequencyResults>),
    TracepointsAvailable(Arc<TracepointResults>),
    EventsAvailable(Arc<EventResults>),
    ParsingFinished,
    ParsingFailed(String),
    ParserWarning(String),
    Stopped,
}

/// How a task ended. Exactly one per task.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Finished(Arc<AnalysisResults>),
    Failed(String),
    Stopped,
}

impl TaskOutcome {
    pub fn results(&self) -> Option<&Arc<AnalysisResults>> {
        match self {
            TaskOutcome::Finished(results) => Some(results),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("File '{0}' does not exist.")]
    FileNotFound(String),

    #[error("'{0}' is not a file.")]
    NotAFile(String),

    #[error("File '{0}' is not readable.")]
    NotReadable(String),

    #[error(transparent)]
    ParserProcess(#[from] ParserProcessError),

    #[error("No parsed results to filter")]
    NoBaseline,

    #[error("Session state lock poisoned")]
    LockPoisoned,
}

/// Why a task ended without results
#[derive(Debug)]
enum TaskError {
    Stopped,
    Failed(String),
}

impl From<Stopped> for TaskError {
    fn from(_: Stopped) -> Self {
        TaskError::Stopped
    }
}

/// A running decode or filter task
#[derive(Debug)]
pub struct TaskHandle {
    events: mpsc::UnboundedReceiver<ParserEvent>,
    join: JoinHandle<TaskOutcome>,
    cancel: CancellationToken,
}

impl TaskHandle {
    /// Request cancellation; the task ends with [`TaskOutcome::Stopped`]
    pub fn stop(&self) {
        info!("Stop requested");
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next notification, `None` once the task ended and everything sent
    /// was received
    pub async fn next_event(&mut self) -> Option<ParserEvent> {
        self.events.recv().await
    }

    /// Wait for the task to end
    pub async fn join(self) -> TaskOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => TaskOutcome::Failed(format!("Task failed: {}", e)),
        }
    }
}

#[derive(Debug, Clone)]
struct TaskContext {
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<ParserEvent>,
}

impl TaskContext {
    fn send(&self, event: ParserEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    fn check(&self) -> Result<(), TaskError> {
        if self.cancel.is_cancelled() {
            Err(TaskError::Stopped)
        } else {
            Ok(())
        }
    }

    /// Announce `results` in the order consumers expect
    fn publish(&self, results: &AnalysisResults, with_summary: bool) {
        if with_summary {
            self.send(ParserEvent::SummaryAvailable(Arc::clone(&results.summary)));
        }
        self.send(ParserEvent::BottomUpAvailable(Arc::clone(&results.bottom_up)));
        self.send(ParserEvent::TopDownAvailable(Arc::clone(&results.top_down)));
        self.send(ParserEvent::CallerCalleeAvailable(Arc::clone(
            &results.caller_callee,
        )));
        self.send(ParserEvent::FrequencyAvailable(Arc::clone(&results.frequency)));
        self.send(ParserEvent::TracepointsAvailable(Arc::clone(
            &results.tracepoints,
        )));
        self.send(ParserEvent::EventsAvailable(Arc::clone(&results.events)));
        self.send(ParserEvent::ParsingFinished);
        for warning in &results.warnings {
            self.send(ParserEvent::ParserWarning(warning.clone()));
        }
    }

    /// Report a task that ended without results
    fn fail(&self, error: TaskError) -> TaskOutcome {
        match error {
            TaskError::Stopped => {
                info!("Parsing stopped");
                self.send(ParserEvent::Stopped);
                TaskOutcome::Stopped
            }
            TaskError::Failed(message) => {
                warn!("Parsing failed: {}", message);
                self.send(ParserEvent::ParsingFailed(message.clone()));
                TaskOutcome::Failed(message)
            }
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    /// Bumped by every parse; only the latest one may set the baseline
    generation: u64,
    baseline: Option<Arc<AnalysisResults>>,
}

/// Decodes recordings and filters their results
#[derive(Debug, Clone)]
pub struct PerfSession {
    config: Arc<AnalysisConfig>,
    state: Arc<Mutex<SessionState>>,
}

impl PerfSession {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Results of the latest finished parse
    pub fn baseline(&self) -> Option<Arc<AnalysisResults>> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.baseline.clone())
    }

    /// Parse a recording.
    ///
    /// `.perfparser` files are decoded directly; anything else is converted
    /// by the parser process first. Must be called within a tokio runtime.
    pub fn start_parse_file(&self, path: impl AsRef<Path>) -> Result<TaskHandle, SessionError> {
        let path = path.as_ref();
        check_input(path)?;

        let is_stream = path
            .extension()
            .map_or(false, |ext| ext == STREAM_FILE_EXTENSION);
        let parser_binary = if is_stream {
            None
        } else {
            let binary = find_parser_binary(self.config.parser_binary.as_deref())
                .ok_or(ParserProcessError::BinaryNotFound)?;
            Some(binary)
        };

        let path = path.to_path_buf();
        let config = Arc::clone(&self.config);
        self.start_parse(move |context| async move {
            info!("Parsing {}", path.display());
            match parser_binary {
                None => {
                    let file = tokio::fs::File::open(&path).await.map_err(|e| {
                        TaskError::Failed(format!(
                            "Failed to open file {}: {}",
                            path.display(),
                            e
                        ))
                    })?;
                    decode_stream(file, &config, &context).await?.into_results()
                }
                Some(binary) => parse_with_process(&binary, &path, &config, &context).await,
            }
        })
    }

    /// Decode a perfparser stream from any byte source
    pub fn start_parse_reader<R>(&self, reader: R) -> Result<TaskHandle, SessionError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let config = Arc::clone(&self.config);
        self.start_parse(move |context| async move {
            info!("Parsing stream");
            decode_stream(reader, &config, &context).await?.into_results()
        })
    }

    /// Re-aggregate the baseline, keeping what `filter` accepts.
    ///
    /// Filter results are reported but never replace the baseline.
    pub fn filter_results(&self, filter: FilterAction) -> Result<TaskHandle, SessionError> {
        let baseline = self
            .state
            .lock()
            .map_err(|_| SessionError::LockPoisoned)?
            .baseline
            .clone()
            .ok_or(SessionError::NoBaseline)?;
        let aggregation = self.config.cost_aggregation;

        let (context, handle_parts) = new_task();
        context.send(ParserEvent::ParsingStarted);
        let join = tokio::spawn(async move {
            info!("Filtering results");
            let cancel = context.cancel.clone();
            let filtered = tokio::task::spawn_blocking(move || {
                filter_results(&baseline, &filter, aggregation, &cancel)
            })
            .await;

            let result = match filtered {
                Ok(Ok(results)) => context.check().map(|()| results),
                Ok(Err(stopped)) => Err(stopped.into()),
                Err(e) => Err(TaskError::Failed(format!("Filter task failed: {}", e))),
            };
            match result {
                Ok(results) => {
                    let results = Arc::new(results);
                    context.publish(&results, false);
                    info!("Filtering finished");
                    TaskOutcome::Finished(results)
                }
                Err(e) => context.fail(e),
            }
        });
        Ok(handle_parts.into_handle(join))
    }

    fn start_parse<W, F>(&self, work: W) -> Result<TaskHandle, SessionError>
    where
        W: FnOnce(TaskContext) -> F,
        F: Future<Output = Result<AnalysisResults, TaskError>> + Send + 'static,
    {
        let generation = {
            let mut state = self.state.lock().map_err(|_| SessionError::LockPoisoned)?;
            state.generation += 1;
            state.baseline = None;
            state.generation
        };

        let (context, handle_parts) = new_task();
        context.send(ParserEvent::ParsingStarted);
        let work = work(context.clone());
        let state = Arc::clone(&self.state);

        let join = tokio::spawn(async move {
            let result = match work.await {
                Ok(results) => context.check().map(|()| results),
                Err(e) => Err(e),
            };
            match result {
                Ok(results) => {
                    let results = Arc::new(results);
                    store_baseline(&state, generation, &results);
                    context.publish(&results, true);
                    info!("Parsing finished");
                    TaskOutcome::Finished(results)
                }
                Err(e) => context.fail(e),
            }
        });
        Ok(handle_parts.into_handle(join))
    }
}

/// Receiving ends of a task that is about to be spawned
struct HandleParts {
    events: mpsc::UnboundedReceiver<ParserEvent>,
    cancel: CancellationToken,
}

impl HandleParts {
    fn into_handle(self, join: JoinHandle<TaskOutcome>) -> TaskHandle {
        TaskHandle {
            events: self.events,
            join,
            cancel: self.cancel,
        }
    }
}

fn new_task() -> (TaskContext, HandleParts) {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    (
        TaskContext {
            cancel: cancel.clone(),
            events: tx,
        },
        HandleParts { events: rx, cancel },
    )
}

fn store_baseline(state: &Mutex<SessionState>, generation: u64, results: &Arc<AnalysisResults>) {
    match state.lock() {
        Ok(mut state) if state.generation == generation => {
            state.baseline = Some(Arc::clone(results));
        }
        Ok(_) => debug!("Discarding results of superseded parse {}", generation),
        Err(_) => warn!("Session state lock poisoned, results not retained"),
    }
}

fn check_input(path: &Path) -> Result<(), SessionError> {
    let display = || path.display().to_string();
    if !path.exists() {
        return Err(SessionError::FileNotFound(display()));
    }
    if !path.is_file() {
        return Err(SessionError::NotAFile(display()));
    }
    std::fs::File::open(path).map_err(|_| SessionError::NotReadable(display()))?;
    Ok(())
}

/// Collector state once the byte source is exhausted
struct DecodedStream {
    collector: PerfDataCollector,
    header_complete: bool,
    trailing_bytes: usize,
}

impl DecodedStream {
    fn into_results(self) -> Result<AnalysisResults, TaskError> {
        if !self.header_complete {
            return Err(TaskError::Failed(
                "Failed to parse file: stream ended before the QPERFSTREAM header".to_string(),
            ));
        }

        let mut results = self.collector.finalize();
        if self.trailing_bytes > 0 {
            warn!(
                "Stream ended inside an event, ignoring {} bytes",
                self.trailing_bytes
            );
            results.warnings.push(format!(
                "Stream ended inside an event, {} trailing bytes were ignored.",
                self.trailing_bytes
            ));
        }
        Ok(results)
    }
}

/// Feed `reader` through the decoder into a collector until end of input
async fn decode_stream<R>(
    mut reader: R,
    config: &AnalysisConfig,
    context: &TaskContext,
) -> Result<DecodedStream, TaskError>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = StreamDecoder::new();
    let mut collector = PerfDataCollector::new(config.cost_aggregation, config.frame_policy);
    let mut buf = vec![0u8; config.read_chunk_size];

    loop {
        let read = tokio::select! {
            _ = context.cancel.cancelled() => return Err(TaskError::Stopped),
            read = reader.read(&mut buf) => read
                .map_err(|e| TaskError::Failed(format!("Failed to read input: {}", e)))?,
        };
        if read == 0 {
            break;
        }
        decoder.feed(&buf[..read]);

        while let Some(event) = decoder
            .try_next()
            .map_err(|e| TaskError::Failed(format!("Failed to parse file: {}", e)))?
        {
            context.check()?;
            if let Some(notification) = collector.apply(event) {
                context.send(notification);
            }
        }
    }

    debug!(
        "End of input after {} samples, decoder state {:?}",
        collector.sample_count(),
        decoder.state()
    );
    let header_complete = !matches!(
        decoder.state(),
        DecoderState::Header | DecoderState::DataStreamVersion
    );
    let trailing_bytes = if decoder.at_event_boundary() {
        0
    } else {
        decoder.buffered()
    };
    Ok(DecodedStream {
        collector,
        header_complete,
        trailing_bytes,
    })
}

/// Convert `input` with the parser process and decode its output
async fn parse_with_process(
    binary: &Path,
    input: &Path,
    config: &AnalysisConfig,
    context: &TaskContext,
) -> Result<AnalysisResults, TaskError> {
    let mut process = ParserProcess::spawn(binary, config, input)
        .map_err(|e| TaskError::Failed(e.to_string()))?;
    let Some(stdout) = process.take_stdout() else {
        process.kill().await;
        return Err(TaskError::Failed(
            "Failed to read from the hotspot-perfparser process".to_string(),
        ));
    };

    let decoded = match decode_stream(stdout, config, context).await {
        Ok(decoded) => decoded,
        Err(e) => {
            process.kill().await;
            return Err(e);
        }
    };
    // the exit code explains a short stream better than the decoder can
    process
        .wait()
        .await
        .map_err(|e| TaskError::Failed(e.to_string()))?;
    decoded.into_results()
}
