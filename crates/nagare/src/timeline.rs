//! Presentation timeline state.
//!
//! https://dashif.org/Guidelines-TimingModel/#mpd-general-timeline
//!
//! > The MPD defines the MPD timeline of a DASH presentation, which serves as
//! > the baseline for all scheduling decisions made during playback and
//! > establishes the relative timing of periods and media segments.
//!
//! A manifest snapshot is a promise that specific media segments are
//! available during specific time spans. For dynamic presentations that
//! promise is refreshed periodically, out from under an active playback
//! queue: the reconciliation in [`Timeline::process`] applies a refreshed
//! snapshot to the existing period state without invalidating the identity of
//! chunks that are already buffered or in flight.

use std::collections::HashMap;

use crate::{
    clock::Clock,
    error::{NagareError, NagareResult},
    index::{declared_index, SegmentIndex},
    manifest::{
        ContainerFormat, DrmInitData, Format, MediaManifest, Period, Representation,
        TrackSelection,
    },
    range::RangedUrl,
};

/// Computed playable time range of the presentation, in presentation-timeline
/// microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityWindow {
    pub start_us: i64,
    pub end_us: i64,
    /// Whether the window slides with wall-clock time.
    pub dynamic: bool,
}

impl AvailabilityWindow {
    pub fn duration_us(&self) -> i64 {
        self.end_us - self.start_us
    }

    pub fn contains(&self, position_us: i64) -> bool {
        position_us >= self.start_us && position_us < self.end_us
    }
}

/// Outcome of applying one manifest refresh.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Applied {
        /// The new window, when it differs from the previous one.
        availability_changed: Option<AvailabilityWindow>,
    },
    /// The refresh came from a stale or out-of-order manifest fetch and was
    /// ignored wholesale. Not an error; a later refresh is expected to
    /// supersede it.
    RejectedStale,
}

/// Result of re-aligning a representation's segment numbering against a
/// refreshed index. A gap between the old and new index means the playback
/// position has aged out of the retained window; that is an expected protocol
/// condition, so it travels as a value rather than unwinding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexAlignment {
    Aligned,
    BehindLiveWindow,
}

/// One representation plus its segment index and the numbering-continuity
/// shift.
///
/// The shift maps *logical* segment numbers, which stay stable across
/// manifest refreshes and are the only numbers handed to callers, onto
/// *index-local* numbers that are valid only against the current index
/// instance: `local = logical - shift`.
pub struct RepresentationState {
    representation: Representation,
    index: Option<Box<dyn SegmentIndex>>,
    index_from_stream: bool,
    container: Option<ContainerFormat>,
    period_start_us: i64,
    period_duration_us: Option<i64>,
    segment_number_shift: i64,
}

impl RepresentationState {
    fn new(
        representation: Representation,
        period_start_us: i64,
        period_duration_us: Option<i64>,
    ) -> Self {
        let index = declared_index(&representation);
        let container = representation
            .format
            .mime_type
            .as_deref()
            .map(ContainerFormat::from_mime_type);
        Self {
            representation,
            index,
            index_from_stream: false,
            container,
            period_start_us,
            period_duration_us,
            segment_number_shift: 0,
        }
    }

    pub fn format(&self) -> &Format {
        &self.representation.format
    }

    pub(crate) fn representation(&self) -> &Representation {
        &self.representation
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// Whether the current index was recovered from the stream rather than
    /// declared by the manifest.
    pub fn index_from_stream(&self) -> bool {
        self.index_from_stream
    }

    pub fn container(&self) -> Option<ContainerFormat> {
        self.container.clone()
    }

    pub fn segment_number_shift(&self) -> i64 {
        self.segment_number_shift
    }

    /// Attach a stream-declared index. The manifest always wins: once an
    /// index is declared there, stream data is ignored.
    pub(crate) fn attach_stream_index(&mut self, index: Box<dyn SegmentIndex>) {
        if self.index.is_none() {
            self.index = Some(index);
            self.index_from_stream = true;
        }
    }

    pub(crate) fn attach_stream_container(&mut self, container: ContainerFormat) {
        if self.container.is_none() {
            self.container = Some(container);
        }
    }

    /// First addressable segment, in logical numbering.
    pub fn logical_first(&self) -> Option<i64> {
        self.index
            .as_deref()
            .map(|index| index.first_segment_number() + self.segment_number_shift)
    }

    /// Last addressable segment, in logical numbering. `None` when the index
    /// is missing or open-ended.
    pub fn logical_last(&self) -> Option<i64> {
        let index = self.index.as_deref()?;
        index
            .last_segment_number(self.period_duration_us)
            .map(|last| last + self.segment_number_shift)
    }

    /// Logical segment number containing the given presentation-absolute
    /// position.
    pub fn segment_number_for(&self, position_us: i64) -> Option<i64> {
        self.index.as_deref().map(|index| {
            index.segment_number_at(position_us - self.period_start_us, self.period_duration_us)
                + self.segment_number_shift
        })
    }

    /// Presentation-absolute start time of a logical segment.
    pub fn start_time_us(&self, logical: i64) -> Option<i64> {
        self.index.as_deref().map(|index| {
            self.period_start_us + index.start_time_us(logical - self.segment_number_shift)
        })
    }

    /// Presentation-absolute end time of a logical segment.
    pub fn end_time_us(&self, logical: i64) -> Option<i64> {
        let index = self.index.as_deref()?;
        let local = logical - self.segment_number_shift;
        Some(
            self.period_start_us
                + index.start_time_us(local)
                + index.duration_us(local, self.period_duration_us),
        )
    }

    pub fn location(&self, logical: i64) -> NagareResult<RangedUrl> {
        let index = self
            .index
            .as_deref()
            .ok_or(NagareError::NotPrepared)?;
        index.location(logical - self.segment_number_shift)
    }

    /// Apply a refreshed representation snapshot, preserving logical segment
    /// numbering.
    ///
    /// Any chunk issued before the refresh resolves to the identical physical
    /// segment afterwards: when the new index continues exactly where the old
    /// one ended the shift advances past the old index; when it overlaps, the
    /// shift re-aligns using the old index's own numbering at the new start
    /// time. A gap between the two is not locally recoverable and reports
    /// [`IndexAlignment::BehindLiveWindow`].
    pub(crate) fn update(
        &mut self,
        new_period_duration_us: Option<i64>,
        new_representation: Representation,
    ) -> IndexAlignment {
        let old_period_duration_us = self.period_duration_us;
        let new_index = declared_index(&new_representation);
        self.representation = new_representation;
        self.period_duration_us = new_period_duration_us;

        let Some(new_index) = new_index else {
            // Indexed addressing: a stream-declared index keeps describing
            // the same resource across refreshes.
            return IndexAlignment::Aligned;
        };

        let shift_delta = match self.index.as_deref() {
            // No index yet, or a non-explicit one: derived numbering is
            // recomputed against the new index, never carried.
            None => 0,
            Some(old) if !old.is_explicit() => 0,
            Some(old) => match old.segment_count(old_period_duration_us) {
                // Nothing to align against.
                Some(0) | None => 0,
                Some(count) => {
                    let old_first = old.first_segment_number();
                    let old_last = old_first + count as i64 - 1;
                    let old_end_us = old.start_time_us(old_last)
                        + old.duration_us(old_last, old_period_duration_us);
                    let new_first = new_index.first_segment_number();
                    let new_start_us = new_index.start_time_us(new_first);

                    if old_end_us == new_start_us {
                        // Exact continuation.
                        old_last - new_first + 1
                    } else if old_end_us < new_start_us {
                        tracing::warn!(
                            representation = %self.representation.format.id,
                            old_end_us,
                            new_start_us,
                            "gap between refreshed segment indices"
                        );
                        return IndexAlignment::BehindLiveWindow;
                    } else {
                        // Overlap: re-align using the old index's numbering
                        // at the new start time.
                        old.segment_number_at(new_start_us, old_period_duration_us) - new_first
                    }
                }
            },
        };

        self.segment_number_shift += shift_delta;
        self.index = Some(new_index);
        self.index_from_stream = false;
        IndexAlignment::Aligned
    }
}

/// State for one manifest period: the selected representations plus derived
/// availability.
///
/// Created when the reconciler first observes the period and updated in place
/// for as long as the manifest advertises it, so `local_id` and the contained
/// representation states keep their identity across refreshes. In-flight
/// chunks reference their owning period by `local_id` even after pruning or
/// reordering elsewhere.
pub struct PeriodState {
    local_id: u64,
    id: Option<String>,
    start_us: i64,
    duration_us: Option<i64>,
    representations: HashMap<String, RepresentationState>,
    /// Selection order of the representation ids; `HashMap` iteration order
    /// is never used.
    representation_order: Vec<String>,
    drm_init_data: Option<DrmInitData>,
    available_start_us: i64,
    /// `None` when the trailing index is open-ended; reading an end makes no
    /// sense then and the window must come from the wall clock.
    available_end_us: Option<i64>,
    index_explicit: bool,
}

impl PeriodState {
    fn new(local_id: u64, period: &Period, selection: &TrackSelection) -> NagareResult<Self> {
        let set = period
            .adaptation_sets
            .iter()
            .find(|set| set.track_type == selection.track_type)
            .ok_or(NagareError::MissingAdaptationSet(selection.track_type))?;

        let selected = selection.filter(set);
        if selected.is_empty() {
            return Err(NagareError::MissingAdaptationSet(selection.track_type));
        }

        let mut representations = HashMap::new();
        let mut representation_order = Vec::new();
        for representation in selected {
            representation_order.push(representation.format.id.clone());
            representations.insert(
                representation.format.id.clone(),
                RepresentationState::new(
                    representation.clone(),
                    period.start_us,
                    period.duration_us,
                ),
            );
        }

        let mut state = Self {
            local_id,
            id: period.id.clone(),
            start_us: period.start_us,
            duration_us: period.duration_us,
            representations,
            representation_order,
            drm_init_data: set.drm.clone(),
            available_start_us: period.start_us,
            available_end_us: None,
            index_explicit: false,
        };
        state.derive_availability();
        Ok(state)
    }

    /// Apply a refreshed period snapshot in place.
    fn update(&mut self, period: &Period, selection: &TrackSelection) -> NagareResult<IndexAlignment> {
        let set = period
            .adaptation_sets
            .iter()
            .find(|set| set.track_type == selection.track_type)
            .ok_or(NagareError::MissingAdaptationSet(selection.track_type))?;

        self.id = period.id.clone();
        self.start_us = period.start_us;
        self.duration_us = period.duration_us;

        for representation in selection.filter(set) {
            let id = &representation.format.id;
            match self.representations.get_mut(id) {
                Some(state) => {
                    state.period_start_us = period.start_us;
                    if state.update(period.duration_us, representation.clone())
                        == IndexAlignment::BehindLiveWindow
                    {
                        return Ok(IndexAlignment::BehindLiveWindow);
                    }
                }
                None => {
                    tracing::debug!(period = self.local_id, representation = %id, "representation appeared on refresh");
                    self.representation_order.push(id.clone());
                    self.representations.insert(
                        id.clone(),
                        RepresentationState::new(
                            representation.clone(),
                            period.start_us,
                            period.duration_us,
                        ),
                    );
                }
            }
        }

        // Manifest-declared DRM data always wins over stream-declared data.
        if set.drm.is_some() {
            self.drm_init_data = set.drm.clone();
        }

        self.derive_availability();
        Ok(IndexAlignment::Aligned)
    }

    /// Recompute period-level availability from one representative
    /// representation. All representations in a period share duration and
    /// explicitness by protocol, so the first of the selected set stands in
    /// for the rest.
    fn derive_availability(&mut self) {
        let representative = self
            .representation_order
            .first()
            .and_then(|id| self.representations.get(id));
        let Some(representative) = representative else {
            return;
        };

        match representative.index.as_deref() {
            // No declared index at all: the stream's own index governs; the
            // period is treated as fully available for its advertised span.
            None => {
                self.available_start_us = self.start_us;
                self.available_end_us = self.duration_us.map(|d| self.start_us + d);
                self.index_explicit = true;
            }
            Some(index) => {
                self.index_explicit = index.is_explicit();
                match index.segment_count(self.duration_us) {
                    Some(0) => {
                        self.available_start_us = self.start_us;
                        self.available_end_us = Some(self.start_us);
                    }
                    None => {
                        let first = index.first_segment_number();
                        self.available_start_us = self.start_us + index.start_time_us(first);
                        self.available_end_us = None;
                    }
                    Some(count) => {
                        let first = index.first_segment_number();
                        let last = first + count as i64 - 1;
                        self.available_start_us = self.start_us + index.start_time_us(first);
                        self.available_end_us = Some(
                            self.start_us
                                + index.start_time_us(last)
                                + index.duration_us(last, self.duration_us),
                        );
                    }
                }
            }
        }
    }

    pub fn local_id(&self) -> u64 {
        self.local_id
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn start_us(&self) -> i64 {
        self.start_us
    }

    pub fn duration_us(&self) -> Option<i64> {
        self.duration_us
    }

    pub fn available_start_us(&self) -> i64 {
        self.available_start_us
    }

    pub fn available_end_us(&self) -> Option<i64> {
        self.available_end_us
    }

    pub fn index_unbounded(&self) -> bool {
        self.available_end_us.is_none()
    }

    pub fn index_explicit(&self) -> bool {
        self.index_explicit
    }

    pub fn drm_init_data(&self) -> Option<&DrmInitData> {
        self.drm_init_data.as_ref()
    }

    /// Attach stream-declared DRM data unless the manifest already declared
    /// some.
    pub(crate) fn attach_stream_drm(&mut self, drm: DrmInitData) {
        if self.drm_init_data.is_none() {
            self.drm_init_data = Some(drm);
        }
    }

    pub fn formats(&self) -> Vec<Format> {
        self.representation_order
            .iter()
            .filter_map(|id| self.representations.get(id))
            .map(|state| state.format().clone())
            .collect()
    }

    pub fn representation_state(&self, representation_id: &str) -> Option<&RepresentationState> {
        self.representations.get(representation_id)
    }

    pub(crate) fn representation_state_mut(
        &mut self,
        representation_id: &str,
    ) -> Option<&mut RepresentationState> {
        self.representations.get_mut(representation_id)
    }
}

/// Ordered period states plus the availability window, reconciled against
/// each manifest refresh.
pub struct Timeline {
    selection: TrackSelection,
    manifest: Option<MediaManifest>,
    periods: Vec<PeriodState>,
    next_local_id: u64,
    window: Option<AvailabilityWindow>,
}

impl Timeline {
    pub fn new(selection: TrackSelection) -> Self {
        Self {
            selection,
            manifest: None,
            periods: Vec::new(),
            next_local_id: 0,
            window: None,
        }
    }

    /// Apply a manifest refresh: prune, validate, update in place, append,
    /// recompute the availability window. Runs to completion atomically with
    /// respect to scheduling; a rejected refresh provably changes nothing.
    pub fn process(
        &mut self,
        manifest: MediaManifest,
        clock: &dyn Clock,
    ) -> NagareResult<RefreshOutcome> {
        if manifest.periods.is_empty() {
            return Err(NagareError::InvalidManifest("manifest has no periods".to_string()));
        }

        // A dynamic refresh whose publish time regressed is a stale fetch.
        if manifest.dynamic {
            if let (Some(current), Some(new)) = (
                self.manifest.as_ref().and_then(|m| m.publish_time),
                manifest.publish_time,
            ) {
                if new < current {
                    tracing::warn!(%current, %new, "refresh publish time regressed, ignoring");
                    return Ok(RefreshOutcome::RejectedStale);
                }
            }
        }

        // Count the leading periods that fell off the front of the manifest,
        // and validate before mutating anything.
        let first_new_start_us = manifest.periods[0].start_us;
        let pruned = self
            .periods
            .iter()
            .take_while(|period| period.start_us < first_new_start_us)
            .count();
        if self.periods.len() - pruned > manifest.periods.len() {
            // After discarding old periods there can never be more retained
            // periods than the new manifest advertises; a previously
            // announced period is no longer listed, so the fetch hit a
            // manifest server that is out of sync and behind.
            tracing::warn!(
                retained = self.periods.len() - pruned,
                advertised = manifest.periods.len(),
                "out of sync manifest refresh, ignoring"
            );
            return Ok(RefreshOutcome::RejectedStale);
        }

        if pruned > 0 {
            tracing::debug!(count = pruned, "pruning periods preceding the manifest start");
            self.periods.drain(..pruned);
        }

        // Update the first and last retained periods in place. Interior
        // periods of a multi-period manifest are immutable across refreshes
        // by protocol convention.
        let retained = self.periods.len();
        if retained > 0 {
            if self.periods[0].update(&manifest.periods[0], &self.selection)?
                == IndexAlignment::BehindLiveWindow
            {
                return Err(NagareError::BehindLiveWindow);
            }
            if retained > 1 {
                let last = retained - 1;
                if self.periods[last].update(&manifest.periods[last], &self.selection)?
                    == IndexAlignment::BehindLiveWindow
                {
                    return Err(NagareError::BehindLiveWindow);
                }
            }
        }

        // Append newly advertised periods with fresh local ids.
        for period in &manifest.periods[retained..] {
            let local_id = self.next_local_id;
            self.next_local_id += 1;
            tracing::debug!(local_id, start_us = period.start_us, "appending period");
            self.periods.push(PeriodState::new(local_id, period, &self.selection)?);
        }

        let window = self.compute_window(&manifest, clock);
        let availability_changed = if self.window != Some(window) {
            tracing::debug!(start_us = window.start_us, end_us = window.end_us, "availability window changed");
            self.window = Some(window);
            Some(window)
        } else {
            None
        };
        self.manifest = Some(manifest);

        Ok(RefreshOutcome::Applied { availability_changed })
    }

    fn compute_window(&self, manifest: &MediaManifest, clock: &dyn Clock) -> AvailabilityWindow {
        let first = &self.periods[0];
        let last = &self.periods[self.periods.len() - 1];

        if !manifest.dynamic || (last.index_explicit() && !last.index_unbounded()) {
            let end_us = match last.available_end_us() {
                Some(end) => end,
                None => {
                    tracing::warn!("static manifest with open-ended trailing index");
                    first.available_start_us()
                }
            };
            return AvailabilityWindow {
                start_us: first.available_start_us(),
                end_us,
                dynamic: manifest.dynamic,
            };
        }

        // Open-ended live: the window end tracks the wall clock, shifted by
        // any server/client offset the injected clock carries.
        let zero_point = manifest
            .availability_start_time
            .unwrap_or(chrono::DateTime::UNIX_EPOCH);
        let end_us = (clock.now() - zero_point).num_microseconds().unwrap_or(i64::MAX);
        let start_us = match manifest.time_shift_buffer_depth_us {
            Some(depth) => (end_us - depth).max(first.available_start_us()),
            // No advertised depth: the entire back catalog remains playable.
            None => first.available_start_us(),
        };
        AvailabilityWindow { start_us, end_us, dynamic: true }
    }

    pub fn window(&self) -> Option<AvailabilityWindow> {
        self.window
    }

    pub fn dynamic(&self) -> bool {
        self.manifest.as_ref().map(|m| m.dynamic).unwrap_or(false)
    }

    pub(crate) fn suggested_presentation_delay_us(&self) -> Option<i64> {
        self.manifest
            .as_ref()
            .and_then(|m| m.suggested_presentation_delay_us)
    }

    pub fn periods(&self) -> &[PeriodState] {
        &self.periods
    }

    pub fn position_of(&self, local_id: u64) -> Option<usize> {
        self.periods.iter().position(|p| p.local_id() == local_id)
    }

    /// Index of the period covering `position_us`: the first period if the
    /// position precedes all of them, else the first whose available end
    /// exceeds it, else the last.
    pub(crate) fn period_index_for(&self, position_us: i64) -> usize {
        for (i, period) in self.periods.iter().enumerate() {
            match period.available_end_us() {
                Some(end) if end > position_us => return i,
                None => return i,
                _ => {}
            }
        }
        self.periods.len() - 1
    }

    pub(crate) fn period_mut(&mut self, local_id: u64) -> Option<&mut PeriodState> {
        self.periods.iter_mut().find(|p| p.local_id() == local_id)
    }

    pub(crate) fn clear(&mut self) {
        self.manifest = None;
        self.periods.clear();
        self.window = None;
    }
}
