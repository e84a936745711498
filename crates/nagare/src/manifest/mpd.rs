//! Conversion from the [`dash_mpd`] document model into the engine's
//! manifest model.
//!
//! XML parsing stays in `dash-mpd`; this module resolves what the engine
//! needs from the parsed document: period start/duration inference, base-URL
//! cascades, addressing-element inheritance and timescale mapping.

use dash_mpd::{
    AdaptationSet as MpdAdaptationSet, Initialization, Representation as MpdRepresentation,
    SegmentBase, SegmentList, SegmentTemplate, MPD, S,
};
use url::Url;

use crate::{
    error::{NagareError, NagareResult},
    index::us_to_scale,
    manifest::{
        url::{merge_baseurls, parse_media_range},
        AdaptationSet, DrmInitData, Format, ListAddressing, MediaManifest, Period,
        Representation, SegmentAddressing, TemplateAddressing, TimelineAddressing,
        TimelineSegment, TrackType,
    },
    range::RangedUrl,
    template::{MediaTemplate, TemplateContext},
};

fn us_from_std(duration: std::time::Duration) -> i64 {
    duration.as_micros() as i64
}

/// Parse an MPD document and convert it.
pub fn parse_manifest(xml: &str, manifest_url: &Url) -> NagareResult<MediaManifest> {
    let mpd = dash_mpd::parse(xml).map_err(|e| NagareError::MpdParse(e.to_string()))?;
    convert_mpd(&mpd, manifest_url)
}

pub fn convert_mpd(mpd: &MPD, manifest_url: &Url) -> NagareResult<MediaManifest> {
    let base_url = match mpd.base_url.first() {
        Some(base) => merge_baseurls(manifest_url, &base.base)?,
        None => manifest_url.clone(),
    };
    let presentation_duration_us = mpd.mediaPresentationDuration.map(us_from_std);

    // Resolve every period's span first: a period without an explicit start
    // begins where the previous one ends, and a period without an explicit
    // duration runs to the next period's start (or the presentation end).
    let mut spans: Vec<(i64, Option<i64>)> = Vec::with_capacity(mpd.periods.len());
    for period in &mpd.periods {
        let start_us = match period.start {
            Some(start) => us_from_std(start),
            None => match spans.last() {
                Some((previous_start, Some(previous_duration))) => {
                    previous_start + previous_duration
                }
                Some((_, None)) => {
                    return Err(NagareError::InvalidManifest(
                        "period without start follows period without duration".to_string(),
                    ))
                }
                None => 0,
            },
        };
        if let Some(previous) = spans.last_mut() {
            if previous.1.is_none() {
                previous.1 = Some(start_us - previous.0);
            }
        }
        spans.push((start_us, period.duration.map(us_from_std)));
    }
    if let Some(last) = spans.last_mut() {
        if last.1.is_none() {
            last.1 = presentation_duration_us.map(|total| total - last.0);
        }
    }

    let mut periods = Vec::with_capacity(mpd.periods.len());
    for (period, &(start_us, duration_us)) in mpd.periods.iter().zip(&spans) {
        let period_base = match period.BaseURL.first() {
            Some(base) => merge_baseurls(&base_url, &base.base)?,
            None => base_url.clone(),
        };
        let inherited = Inherited {
            segment_base: period.SegmentBase.as_ref(),
            segment_list: period.SegmentList.as_ref(),
            segment_template: period.SegmentTemplate.as_ref(),
        };

        let mut adaptation_sets = Vec::with_capacity(period.adaptations.len());
        for set in &period.adaptations {
            adaptation_sets.push(convert_adaptation_set(
                &period_base,
                &inherited,
                set,
                duration_us,
            )?);
        }

        periods.push(Period {
            id: period.id.clone(),
            start_us,
            duration_us,
            adaptation_sets,
        });
    }

    Ok(MediaManifest {
        dynamic: mpd.mpdtype.as_deref() == Some("dynamic"),
        availability_start_time: mpd.availabilityStartTime,
        publish_time: mpd.publishTime,
        time_shift_buffer_depth_us: mpd.timeShiftBufferDepth.map(us_from_std),
        min_update_period_us: mpd.minimumUpdatePeriod.map(us_from_std),
        suggested_presentation_delay_us: mpd.suggestedPresentationDelay.map(us_from_std),
        periods,
    })
}

/// Addressing elements inherit downwards: period, then adaptation set, then
/// representation, with the innermost declaration winning.
struct Inherited<'a> {
    segment_base: Option<&'a SegmentBase>,
    segment_list: Option<&'a SegmentList>,
    segment_template: Option<&'a SegmentTemplate>,
}

impl<'a> Inherited<'a> {
    fn merge(self, outer: &Inherited<'a>) -> Inherited<'a> {
        Inherited {
            segment_base: self.segment_base.or(outer.segment_base),
            segment_list: self.segment_list.or(outer.segment_list),
            segment_template: self.segment_template.or(outer.segment_template),
        }
    }
}

fn convert_adaptation_set(
    base_url: &Url,
    inherited: &Inherited<'_>,
    set: &MpdAdaptationSet,
    period_duration_us: Option<i64>,
) -> NagareResult<AdaptationSet> {
    let set_base = match set.BaseURL.first() {
        Some(base) => merge_baseurls(base_url, &base.base)?,
        None => base_url.clone(),
    };
    let track_type = TrackType::from_mime_type(
        set.contentType
            .as_deref()
            .or(set.mimeType.as_deref())
            .or_else(|| {
                set.representations
                    .first()
                    .and_then(|r| r.mimeType.as_deref())
            }),
    );
    let inherited = Inherited {
        segment_base: set.SegmentBase.as_ref(),
        segment_list: set.SegmentList.as_ref(),
        segment_template: set.SegmentTemplate.as_ref(),
    }
    .merge(inherited);

    let mut representations = Vec::with_capacity(set.representations.len());
    for representation in &set.representations {
        representations.push(convert_representation(
            &set_base,
            &inherited,
            set,
            representation,
            period_duration_us,
        )?);
    }

    Ok(AdaptationSet {
        track_type,
        drm: convert_drm(set),
        representations,
    })
}

fn convert_drm(set: &MpdAdaptationSet) -> Option<DrmInitData> {
    let mut fallback = None;
    for protection in &set.ContentProtection {
        let data = DrmInitData {
            scheme_id_uri: protection.schemeIdUri.clone(),
            pssh: protection.cenc_pssh.first().and_then(|p| p.content.clone()),
        };
        if data.pssh.is_some() {
            return Some(data);
        }
        fallback.get_or_insert(data);
    }
    fallback
}

fn convert_representation(
    base_url: &Url,
    inherited: &Inherited<'_>,
    set: &MpdAdaptationSet,
    representation: &MpdRepresentation,
    period_duration_us: Option<i64>,
) -> NagareResult<Representation> {
    let base_url = match representation.BaseURL.first() {
        Some(base) => merge_baseurls(base_url, &base.base)?,
        None => base_url.clone(),
    };
    let id = representation
        .id
        .clone()
        .ok_or_else(|| NagareError::InvalidManifest("representation without id".to_string()))?;
    let format = Format {
        id: id.clone(),
        bitrate: representation.bandwidth.unwrap_or(0),
        codecs: representation.codecs.clone().or_else(|| set.codecs.clone()),
        mime_type: representation
            .mimeType
            .clone()
            .or_else(|| set.mimeType.clone())
            .or_else(|| representation.contentType.clone())
            .or_else(|| set.contentType.clone()),
        width: representation.width,
        height: representation.height,
    };
    let inherited = Inherited {
        segment_base: representation.SegmentBase.as_ref(),
        segment_list: representation.SegmentList.as_ref(),
        segment_template: representation.SegmentTemplate.as_ref(),
    }
    .merge(inherited);
    let context = TemplateContext::for_representation(Some(&id), format.bitrate);

    if let Some(segment_base) = inherited.segment_base {
        let init = convert_initialization(&base_url, segment_base.Initialization.as_ref())?;
        let index = segment_base
            .indexRange
            .as_deref()
            .map(|range| -> NagareResult<RangedUrl> {
                Ok(RangedUrl::new(base_url.clone(), Some(parse_media_range(range)?)))
            })
            .transpose()?;
        return Ok(Representation {
            format,
            init,
            addressing: SegmentAddressing::Indexed { index },
        });
    }

    if let Some(segment_list) = inherited.segment_list {
        let init = convert_initialization(&base_url, segment_list.Initialization.as_ref())?;
        let mut entries = Vec::with_capacity(segment_list.segment_urls.len());
        for segment_url in &segment_list.segment_urls {
            let media = segment_url.media.as_ref().ok_or_else(|| {
                NagareError::InvalidManifest("SegmentURL missing @media".to_string())
            })?;
            let url = merge_baseurls(&base_url, media)?;
            let range = segment_url
                .mediaRange
                .as_deref()
                .map(parse_media_range)
                .transpose()?;
            entries.push(RangedUrl::new(url, range));
        }
        return Ok(Representation {
            format,
            init,
            addressing: SegmentAddressing::List(ListAddressing {
                start_number: 1,
                timescale: segment_list.timescale.unwrap_or(1),
                duration: segment_list.duration,
                entries,
            }),
        });
    }

    if let Some(template) = inherited.segment_template {
        let init = template
            .initialization
            .as_ref()
            .map(|pattern| -> NagareResult<RangedUrl> {
                let merged = merge_baseurls(&base_url, pattern)?;
                let resolved = MediaTemplate::new(merged.to_string()).resolve(&context);
                Ok(RangedUrl::new(Url::parse(&resolved)?, None))
            })
            .transpose()?;
        let media = template.media.as_ref().ok_or_else(|| {
            NagareError::InvalidManifest("SegmentTemplate missing @media".to_string())
        })?;
        let media = MediaTemplate::new(merge_baseurls(&base_url, media)?.to_string());
        let start_number = template.startNumber.unwrap_or(1) as i64;
        let timescale = template.timescale.unwrap_or(1);
        let presentation_time_offset = template.presentationTimeOffset.unwrap_or(0);

        if let Some(timeline) = template.SegmentTimeline.as_ref() {
            return Ok(Representation {
                format,
                init,
                addressing: SegmentAddressing::Timeline(TimelineAddressing {
                    media,
                    start_number,
                    timescale,
                    presentation_time_offset,
                    segments: convert_timeline_segments(
                        &timeline.segments,
                        timescale,
                        presentation_time_offset,
                        period_duration_us,
                    ),
                }),
            });
        }

        let duration = template.duration.ok_or_else(|| {
            NagareError::InvalidManifest("SegmentTemplate missing @duration".to_string())
        })?;
        if duration <= 0.0 {
            return Err(NagareError::InvalidManifest(
                "SegmentTemplate duration must be positive".to_string(),
            ));
        }
        return Ok(Representation {
            format,
            init,
            addressing: SegmentAddressing::Template(TemplateAddressing {
                media,
                start_number,
                timescale,
                presentation_time_offset,
                duration: duration.round() as u64,
            }),
        });
    }

    // A bare BaseURL representation: one resource whose index lives in the
    // container itself.
    Ok(Representation {
        format,
        init: None,
        addressing: SegmentAddressing::Indexed {
            index: Some(RangedUrl::new(base_url, None)),
        },
    })
}

fn convert_initialization(
    base_url: &Url,
    initialization: Option<&Initialization>,
) -> NagareResult<Option<RangedUrl>> {
    let Some(initialization) = initialization else {
        return Ok(None);
    };
    let url = match &initialization.sourceURL {
        Some(source) => merge_baseurls(base_url, source)?,
        None => base_url.clone(),
    };
    let range = initialization
        .range
        .as_deref()
        .map(parse_media_range)
        .transpose()?;
    Ok(Some(RangedUrl::new(url, range)))
}

/// Resolve `S` elements to concrete repeat counts. A negative repeat value
/// continues the segment run up to a segment that ends at or overlaps the
/// period end point.
fn convert_timeline_segments(
    segments: &[S],
    timescale: u64,
    presentation_time_offset: u64,
    period_duration_us: Option<i64>,
) -> Vec<TimelineSegment> {
    let end_units =
        period_duration_us.map(|duration| us_to_scale(duration, timescale) + presentation_time_offset);

    let mut time = segments.first().and_then(|s| s.t).unwrap_or(0);
    let mut out = Vec::with_capacity(segments.len());
    for s in segments {
        if let Some(t) = s.t {
            time = t;
        }
        let duration = s.d;
        let repeat = match s.r.unwrap_or(0) {
            r if r >= 0 => r as u64,
            _ => match end_units {
                Some(end) if duration > 0 && end > time => {
                    ((end - time + duration - 1) / duration).saturating_sub(1)
                }
                _ => {
                    tracing::warn!("open-ended segment repeat without a period duration");
                    0
                }
            },
        };
        out.push(TimelineSegment { time: Some(time), duration, repeat });
        time += duration * (repeat + 1);
    }
    out
}
