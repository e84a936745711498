//! Chunk scheduling.
//!
//! [`ChunkScheduler::next_operation`] is the request-selection state machine:
//! given the buffered/in-flight queue and the playback position it decides
//! which byte range of which encoded variant to fetch next, or that the
//! stream has ended, or that nothing can be fetched yet. It is driven
//! synchronously from a single playback pump and never blocks; all network
//! I/O belongs to an external loader whose completions are delivered back via
//! [`ChunkScheduler::on_init_loaded`].

use std::sync::Arc;

use crate::{
    clock::Clock,
    error::{NagareError, NagareResult},
    index::SegmentIndex,
    manifest::{ContainerFormat, DrmInitData, Format, MediaManifest, TrackSelection},
    range::RangedUrl,
    timeline::{AvailabilityWindow, PeriodState, RefreshOutcome, RepresentationState, Timeline},
};

/// Fallback live-edge latency when neither the configuration nor the
/// manifest suggests one.
const DEFAULT_LIVE_EDGE_LATENCY_US: i64 = 30_000_000;

/// One entry of the caller-owned chunk queue, described just enough for
/// scheduling decisions. Times are presentation-absolute microseconds;
/// `next_segment_number` is logical (stable across refreshes).
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkQueueEntry {
    pub period_local_id: u64,
    pub representation_id: String,
    pub start_time_us: i64,
    pub end_time_us: i64,
    pub next_segment_number: i64,
}

/// Why the evaluator chose its format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Initial,
    Adaptive,
    Manual,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub format: Format,
    pub trigger: Trigger,
}

/// Picks the variant to fetch next. The bandwidth-adaptive policy lives
/// outside the engine; only its output is consumed here. Returning `None`
/// declines the tick (no chunk is scheduled).
pub trait FormatEvaluator: Send {
    fn evaluate(
        &mut self,
        queue: &[ChunkQueueEntry],
        playback_position_us: i64,
        candidates: &[Format],
    ) -> Option<Evaluation>;
}

/// Always selects the highest advertised bitrate.
#[derive(Debug, Default)]
pub struct HighestBitrateEvaluator;

impl FormatEvaluator for HighestBitrateEvaluator {
    fn evaluate(
        &mut self,
        _queue: &[ChunkQueueEntry],
        _playback_position_us: i64,
        candidates: &[Format],
    ) -> Option<Evaluation> {
        candidates
            .iter()
            .max_by_key(|format| format.bitrate)
            .cloned()
            .map(|format| Evaluation { format, trigger: Trigger::Adaptive })
    }
}

/// Manual pin to a single representation; overrides any adaptive choice.
#[derive(Debug)]
pub struct FixedFormatEvaluator {
    representation_id: String,
}

impl FixedFormatEvaluator {
    pub fn new(representation_id: impl Into<String>) -> Self {
        Self { representation_id: representation_id.into() }
    }
}

impl FormatEvaluator for FixedFormatEvaluator {
    fn evaluate(
        &mut self,
        _queue: &[ChunkQueueEntry],
        _playback_position_us: i64,
        candidates: &[Format],
    ) -> Option<Evaluation> {
        candidates
            .iter()
            .find(|format| format.id == self.representation_id)
            .cloned()
            .map(|format| Evaluation { format, trigger: Trigger::Manual })
    }
}

/// Request for initialization metadata and/or a stream-declared segment
/// index. Adjoining byte ranges are merged into a single fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct InitRequest {
    pub format: Format,
    pub period_local_id: u64,
    pub location: RangedUrl,
    pub requests_container: bool,
    pub requests_index: bool,
}

/// Request for one media segment.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRequest {
    pub format: Format,
    pub period_local_id: u64,
    /// Logical segment number; remains valid across manifest refreshes.
    pub segment_number: i64,
    pub start_time_us: i64,
    pub end_time_us: i64,
    pub location: RangedUrl,
    /// Provisional container metadata, finalized by the demuxer.
    pub container: Option<ContainerFormat>,
    pub trigger: Trigger,
}

/// One scheduling decision.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOperation {
    Init(InitRequest),
    Media(MediaRequest),
    EndOfStream,
    /// Nothing can be fetched yet. On a dynamic window this is a normal
    /// outcome retried on the next tick, never a timeout.
    Idle,
}

/// Completion payload of an init/index fetch, handed back by the external
/// loader.
pub struct LoadedInitData {
    pub period_local_id: u64,
    pub representation_id: String,
    pub container: Option<ContainerFormat>,
    pub segment_index: Option<Box<dyn SegmentIndex>>,
    pub drm_init_data: Option<DrmInitData>,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Distance to keep behind the live edge when starting playback there.
    /// `None` falls back to the manifest's suggested presentation delay.
    pub live_edge_latency_us: Option<i64>,
    pub start_at_live_edge: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { live_edge_latency_us: None, start_at_live_edge: true }
    }
}

struct Memo {
    queue_len: usize,
    format_id: String,
    operation: ChunkOperation,
}

/// Where the next chunk comes from, resolved before the representation is
/// known.
enum Target {
    /// Empty queue: start from a resolved position inside the window.
    Start { period_index: usize, position_us: i64 },
    /// Continue one past the queue tail inside the same period.
    Continue { period_index: usize, next_logical: i64 },
    /// Start from the first available segment of a (possibly different)
    /// period.
    NewPeriod { period_index: usize },
}

impl Target {
    fn period_index(&self) -> usize {
        match self {
            Target::Start { period_index, .. }
            | Target::Continue { period_index, .. }
            | Target::NewPeriod { period_index } => *period_index,
        }
    }
}

/// Outcome of stepping past the queue tail.
enum TailStep {
    Idle,
    EndOfStream,
    Fetch(Target),
}

pub struct ChunkScheduler {
    timeline: Timeline,
    evaluator: Box<dyn FormatEvaluator>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    /// Formats offered to the evaluator, captured at prepare time.
    candidates: Vec<Format>,
    fatal: Option<NagareError>,
    prepared: bool,
    explicit_seek: bool,
    memo: Option<Memo>,
}

impl ChunkScheduler {
    pub fn new(
        selection: TrackSelection,
        evaluator: Box<dyn FormatEvaluator>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            timeline: Timeline::new(selection),
            evaluator,
            clock,
            config,
            candidates: Vec::new(),
            fatal: None,
            prepared: false,
            explicit_seek: false,
            memo: None,
        }
    }

    /// Apply the initial manifest. Track-selection failures are fatal here.
    pub fn prepare(&mut self, manifest: MediaManifest) -> NagareResult<()> {
        if let Some(fatal) = &self.fatal {
            return Err(fatal.clone());
        }
        match self.timeline.process(manifest, self.clock.as_ref()) {
            Ok(_) => {
                self.candidates = self
                    .timeline
                    .periods()
                    .first()
                    .map(|period| period.formats())
                    .unwrap_or_default();
                self.prepared = true;
                Ok(())
            }
            Err(error) => {
                self.fatal = Some(error.clone());
                Err(error)
            }
        }
    }

    /// Apply a manifest refresh. A refresh never invalidates queued chunk
    /// identities; a `BehindLiveWindow` outcome aborts the refresh and
    /// latches as fatal.
    pub fn process_manifest(&mut self, manifest: MediaManifest) -> NagareResult<RefreshOutcome> {
        if let Some(fatal) = &self.fatal {
            return Err(fatal.clone());
        }
        if !self.prepared {
            return Err(NagareError::NotPrepared);
        }
        match self.timeline.process(manifest, self.clock.as_ref()) {
            Ok(outcome) => {
                if matches!(outcome, RefreshOutcome::Applied { .. }) {
                    self.memo = None;
                }
                Ok(outcome)
            }
            Err(error) => {
                self.fatal = Some(error.clone());
                Err(error)
            }
        }
    }

    /// Record an explicit seek; the next start-position resolution honors the
    /// given position instead of snapping to the live edge.
    pub fn seek_to(&mut self, _position_us: i64) {
        self.explicit_seek = true;
        self.memo = None;
    }

    pub fn availability_window(&self) -> Option<AvailabilityWindow> {
        self.timeline.window()
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn fatal_error(&self) -> Option<&NagareError> {
        self.fatal.as_ref()
    }

    /// Clear all latched state. A fresh `prepare` is required before any
    /// further scheduling.
    pub fn reset(&mut self) {
        self.timeline.clear();
        self.candidates.clear();
        self.fatal = None;
        self.prepared = false;
        self.explicit_seek = false;
        self.memo = None;
    }

    /// Attach stream-declared data from a completed init/index fetch. The
    /// manifest always wins: data it already declared is left untouched.
    /// Cancelling an in-flight chunk must not call this; only a delivered
    /// completion may.
    pub fn on_init_loaded(&mut self, data: LoadedInitData) {
        if let Some(period) = self.timeline.period_mut(data.period_local_id) {
            if let Some(state) = period.representation_state_mut(&data.representation_id) {
                if let Some(container) = data.container {
                    state.attach_stream_container(container);
                }
                if let Some(index) = data.segment_index {
                    state.attach_stream_index(index);
                }
            }
            if let Some(drm) = data.drm_init_data {
                period.attach_stream_drm(drm);
            }
        } else {
            tracing::debug!(
                period = data.period_local_id,
                "init data arrived for a pruned period, dropping"
            );
        }
        self.memo = None;
    }

    /// Decide the next fetch.
    pub fn next_operation(
        &mut self,
        queue: &[ChunkQueueEntry],
        playback_position_us: i64,
    ) -> NagareResult<ChunkOperation> {
        if self.fatal.is_some() {
            tracing::debug!("fatal error latched, scheduling suspended");
            return Ok(ChunkOperation::Idle);
        }
        if !self.prepared {
            return Err(NagareError::NotPrepared);
        }

        let Some(evaluation) = self
            .evaluator
            .evaluate(queue, playback_position_us, &self.candidates)
        else {
            return Ok(ChunkOperation::Idle);
        };

        // Unchanged queue and format: return the previous decision unchanged.
        // Only media decisions are memoized; a pending init/index fetch must
        // re-evaluate so its completion turns into the real media chunk.
        if let Some(memo) = &self.memo {
            if memo.queue_len == queue.len() && memo.format_id == evaluation.format.id {
                return Ok(memo.operation.clone());
            }
        }

        let window = self.timeline.window().ok_or(NagareError::NotPrepared)?;

        let target = if queue.is_empty() {
            let position_us = self.resolve_start_position(playback_position_us, &window);
            Target::Start {
                period_index: self.timeline.period_index_for(position_us),
                position_us,
            }
        } else {
            match self.continue_from_tail(queue, &window)? {
                TailStep::Idle => return Ok(ChunkOperation::Idle),
                TailStep::EndOfStream => return Ok(ChunkOperation::EndOfStream),
                TailStep::Fetch(target) => target,
            }
        };

        let period = &self.timeline.periods()[target.period_index()];

        let Some(state) = period.representation_state(&evaluation.format.id) else {
            let error = NagareError::MissingRepresentation {
                period: period.local_id(),
                representation: evaluation.format.id.clone(),
            };
            self.fatal = Some(error.clone());
            return Err(error);
        };

        // Initialization metadata or segment index still missing: fetch them
        // from the stream before any media request can be formed.
        let needs_container = state.container().is_none() && state.representation().init.is_some();
        let needs_index = !state.has_index();
        if needs_container || needs_index {
            let request = build_init_request(period, state, &evaluation, needs_container, needs_index)?;
            self.memo = None;
            return Ok(ChunkOperation::Init(request));
        }

        let logical = match target {
            Target::Start { position_us, .. } => state.segment_number_for(position_us),
            Target::NewPeriod { .. } => state.logical_first(),
            Target::Continue { next_logical, .. } => Some(next_logical),
        };
        // The index is present here, so number resolution cannot decline.
        let Some(logical) = logical else {
            return Ok(ChunkOperation::Idle);
        };

        let (Some(start_time_us), Some(end_time_us)) =
            (state.start_time_us(logical), state.end_time_us(logical))
        else {
            return Ok(ChunkOperation::Idle);
        };

        let request = MediaRequest {
            format: evaluation.format.clone(),
            period_local_id: period.local_id(),
            segment_number: logical,
            start_time_us,
            end_time_us,
            location: state.location(logical)?,
            container: state.container(),
            trigger: evaluation.trigger,
        };
        tracing::debug!(
            representation = %request.format.id,
            segment = request.segment_number,
            start_us = request.start_time_us,
            "scheduling media chunk"
        );
        let operation = ChunkOperation::Media(request);
        self.memo = Some(Memo {
            queue_len: queue.len(),
            format_id: evaluation.format.id.clone(),
            operation: operation.clone(),
        });
        Ok(operation)
    }

    /// Resolve the position playback starts from when the queue is empty.
    fn resolve_start_position(&self, playback_position_us: i64, window: &AvailabilityWindow) -> i64 {
        if !window.dynamic {
            return playback_position_us;
        }
        if self.config.start_at_live_edge && !self.explicit_seek {
            let latency = self
                .config
                .live_edge_latency_us
                .or_else(|| self.timeline.suggested_presentation_delay_us())
                .unwrap_or(DEFAULT_LIVE_EDGE_LATENCY_US);
            return (window.end_us - latency).max(window.start_us);
        }
        playback_position_us.clamp(window.start_us, window.end_us)
    }

    /// Steps the queue tail forward. `Err` latches `BehindLiveWindow`.
    fn continue_from_tail(
        &mut self,
        queue: &[ChunkQueueEntry],
        window: &AvailabilityWindow,
    ) -> NagareResult<TailStep> {
        let tail = &queue[queue.len() - 1];
        let next_start_us = tail.end_time_us;

        if window.dynamic && next_start_us < window.start_us {
            let error = NagareError::BehindLiveWindow;
            self.fatal = Some(error.clone());
            return Err(error);
        }
        if window.dynamic && next_start_us >= window.end_us {
            tracing::trace!(next_start_us, window_end_us = window.end_us, "window has not advanced yet");
            return Ok(TailStep::Idle);
        }

        match self.timeline.position_of(tail.period_local_id) {
            Some(period_index) => {
                let period = &self.timeline.periods()[period_index];
                let is_last = period_index == self.timeline.periods().len() - 1;
                let past_end = period
                    .representation_state(&tail.representation_id)
                    .and_then(|state| state.logical_last())
                    .map(|last| tail.next_segment_number > last)
                    .unwrap_or(false);

                if past_end && is_last {
                    // A dynamic manifest may still grow more segments or a
                    // further period; a static one is complete.
                    return Ok(if window.dynamic {
                        TailStep::Idle
                    } else {
                        TailStep::EndOfStream
                    });
                }
                if past_end {
                    Ok(TailStep::Fetch(Target::NewPeriod { period_index: period_index + 1 }))
                } else {
                    Ok(TailStep::Fetch(Target::Continue {
                        period_index,
                        next_logical: tail.next_segment_number,
                    }))
                }
            }
            None => {
                // The owning period was pruned; restart from the earliest
                // retained one.
                tracing::debug!(period = tail.period_local_id, "queue tail period pruned, advancing");
                Ok(TailStep::Fetch(Target::NewPeriod { period_index: 0 }))
            }
        }
    }
}

fn build_init_request(
    period: &PeriodState,
    state: &RepresentationState,
    evaluation: &Evaluation,
    requests_container: bool,
    requests_index: bool,
) -> NagareResult<InitRequest> {
    let representation = state.representation();
    let init = representation.init.clone();
    let index = representation.index_location().cloned();

    let location = match (&init, &index) {
        (Some(init), Some(index)) if requests_container && requests_index => {
            // Fetch both in one request when the ranges adjoin; otherwise the
            // init data comes first and the index follows on the next call.
            init.merge_adjoining(index).unwrap_or_else(|| init.clone())
        }
        (Some(init), _) if requests_container => init.clone(),
        (_, Some(index)) if requests_index => index.clone(),
        // No dedicated index location: the index is expected to follow the
        // initialization data inline.
        (Some(init), None) if requests_index => init.clone(),
        _ => {
            return Err(NagareError::InvalidManifest(format!(
                "representation {} declares neither initialization nor index data",
                representation.format.id
            )))
        }
    };

    Ok(InitRequest {
        format: evaluation.format.clone(),
        period_local_id: period.local_id(),
        location,
        requests_container,
        requests_index,
    })
}
