//! Adaptive quality stepping driven by renderer-reported frame timings.

use std::collections::VecDeque;

use tracing::debug;

use crate::tunables::Tunables;

/// Tracks a rolling FPS window and steps quality up/down when the median
/// crosses a per-level band. The engine has no wall-clock of its own (it
/// must run on `wasm32-unknown-unknown`), so every bit of elapsed time
/// comes from an explicit [`Self::record_frame_time`] call the renderer
/// makes once per frame; this also makes quality transitions fully
/// deterministic under test.
#[derive(Debug)]
pub struct QualityController {
    fps_ring: VecDeque<f32>,
    capacity: usize,
    accumulated_since_check_secs: f32,
    quality: u8,
    focused: bool,
}

impl QualityController {
    /// Creates a controller starting at `initial_quality`, clamped into the
    /// configured range.
    pub fn new(tunables: &Tunables, initial_quality: u8) -> Self {
        Self {
            fps_ring: VecDeque::with_capacity(tunables.fps_ring_capacity),
            capacity: tunables.fps_ring_capacity,
            accumulated_since_check_secs: 0.0,
            quality: initial_quality.clamp(tunables.quality_min, tunables.quality_max),
            focused: true,
        }
    }

    /// Current quality level.
    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Sets window focus. While unfocused the reconsideration accumulator
    /// is frozen: frame times are still ignored entirely rather than
    /// quietly drifting quality while backgrounded.
    pub fn set_focused(&mut self, focused: bool) {
        self.focused = focused;
    }

    /// Records one frame's delta time and, every
    /// `tunables.quality_reconsider_seconds` of accumulated (focused) time,
    /// reconsiders quality against the median FPS observed in that window.
    /// Returns `true` if quality changed this call.
    pub fn record_frame_time(&mut self, dt_seconds: f32, tunables: &Tunables) -> bool {
        if !self.focused || dt_seconds <= 0.0 {
            return false;
        }

        if self.fps_ring.len() == self.capacity {
            self.fps_ring.pop_front();
        }
        self.fps_ring.push_back(1.0 / dt_seconds);
        self.accumulated_since_check_secs += dt_seconds;

        if self.accumulated_since_check_secs < tunables.quality_reconsider_seconds {
            return false;
        }
        self.accumulated_since_check_secs = 0.0;

        let median = median(&self.fps_ring);
        let band = tunables.band_for_quality(self.quality);
        if median < band.lower_fps && self.quality > tunables.quality_min {
            self.quality -= 1;
            true
        } else if median > band.upper_fps && self.quality < tunables.quality_max {
            self.quality += 1;
            true
        } else {
            debug!(median, quality = self.quality, "quality reconsideration, no step taken");
            false
        }
    }

    /// Directly overrides quality (the `set_quality` entry point, distinct
    /// from the automatic FPS-driven stepping above), clamped to range.
    pub fn set_quality(&mut self, quality: u8, tunables: &Tunables) {
        self.quality = quality.clamp(tunables.quality_min, tunables.quality_max);
        self.accumulated_since_check_secs = 0.0;
    }

    /// Edge opacity scalar for the current quality: lower quality trades
    /// edge count for higher per-edge opacity.
    pub fn edge_opacity(&self, tunables: &Tunables) -> f32 {
        const OPACITY_AT_MIN_QUALITY: f32 = 1.0;
        const OPACITY_AT_MAX_QUALITY: f32 = 0.35;
        let span = f32::from(tunables.quality_max - tunables.quality_min).max(1.0);
        let t = f32::from(self.quality - tunables.quality_min) / span;
        OPACITY_AT_MIN_QUALITY - t * (OPACITY_AT_MIN_QUALITY - OPACITY_AT_MAX_QUALITY)
    }

    /// Sphere tessellation hint for the current quality, passed to the
    /// renderer as a latitude/longitude subdivision count.
    pub fn sphere_tessellation_hint(&self, tunables: &Tunables) -> u32 {
        const BASE_SEGMENTS: u32 = 6;
        const SEGMENTS_PER_LEVEL: u32 = 3;
        let level = u32::from(self.quality - tunables.quality_min);
        BASE_SEGMENTS + level * SEGMENTS_PER_LEVEL
    }
}

fn median(ring: &VecDeque<f32>) -> f32 {
    let mut samples: Vec<f32> = ring.iter().copied().collect();
    samples.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = samples.len() / 2;
    if samples.len() % 2 == 0 {
        (samples[mid - 1] + samples[mid]) / 2.0
    } else {
        samples[mid]
    }
}
