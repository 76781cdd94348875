//! The LOD Scheduler: the central state machine deciding which artists get
//! geometry instances and labels, and when to notify the Playback Director.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::commands::DrawBatchBuilder;
use crate::embedding::EmbeddingStore;
use crate::ident::ArtistId;
use crate::playback::PlaybackDirector;
use crate::spatial::SpatialIndex;
use crate::tunables::Tunables;
use crate::vec3::Vec3;

/// Replaces the duck-typed `is_fly_mode` boolean threaded through the
/// original call sites with a small enum the policy functions dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Predictive, popularity-scaled admission around the camera.
    Fly,
    /// Fixed-size top-K by popularity, no predictive prefetch.
    Orbit,
}

/// One camera observation driving a scheduler evaluation.
#[derive(Debug, Clone, Copy)]
pub struct CameraSample {
    /// Current camera position.
    pub pos: Vec3,
    /// Where the camera is projected to be shortly, used for fly-mode
    /// predictive prefetch. Equal to `pos` when no prediction is available.
    pub projected_next_pos: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LabelState {
    Pending,
    Shown,
}

/// Owns the set of currently-rendered geometry and labels, and decides
/// admission/eviction each time the camera (or highlight set, or mode)
/// changes. Fully recomputable from `(camera, highlighted, playing, mode,
/// quality)`, so a worker restart that reconstructs this state from scratch
/// is a valid recovery path.
#[derive(Debug)]
pub struct LodScheduler {
    rendered_geometry: FxHashSet<ArtistId>,
    label_state: FxHashMap<ArtistId, LabelState>,
    names_known: FxHashSet<ArtistId>,
    highlighted: FxHashSet<ArtistId>,
    last_eval_pos: Option<Vec3>,
}

impl Default for LodScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl LodScheduler {
    /// Creates a scheduler with nothing rendered.
    pub fn new() -> Self {
        Self {
            rendered_geometry: FxHashSet::default(),
            label_state: FxHashMap::default(),
            names_known: FxHashSet::default(),
            highlighted: FxHashSet::default(),
            last_eval_pos: None,
        }
    }

    /// Ids with geometry currently instanced.
    pub fn rendered_geometry(&self) -> &FxHashSet<ArtistId> {
        &self.rendered_geometry
    }

    /// Runs the fly-mode policy (§4.4): predictive, popularity-scaled
    /// admission around `sample`, hysteresis-protected eviction, and an
    /// autoplay notification for the closest eligible candidate.
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate_fly(
        &mut self,
        embedding: &EmbeddingStore,
        spatial: &SpatialIndex,
        tunables: &Tunables,
        sample: CameraSample,
        playback: &mut PlaybackDirector,
        now_secs: f64,
        out: &mut DrawBatchBuilder,
    ) {
        if !self.should_reevaluate(sample.pos, tunables) {
            return;
        }

        let max_radius = popularity_scaled_radius(tunables, 100);
        let max_radius_sq = max_radius * max_radius;
        let mut raw: FxHashMap<ArtistId, ()> = FxHashMap::default();
        for (id, _) in spatial.candidates_within(sample.pos, max_radius, max_radius_sq) {
            raw.insert(id, ());
        }
        for (id, _) in spatial.candidates_within(sample.projected_next_pos, max_radius, max_radius_sq) {
            raw.insert(id, ());
        }

        let mut new_candidates = FxHashSet::default();
        for id in raw.keys().copied() {
            let Some(artist) = embedding.get(id) else {
                continue;
            };
            let scaled = popularity_scaled_radius(tunables, artist.popularity);
            let admit_radius = if self.rendered_geometry.contains(&id) {
                scaled * tunables.hysteresis_factor
            } else {
                scaled
            };
            let admit_sq = admit_radius * admit_radius;
            let dist_pos_sq = sample.pos.distance_squared(&artist.position);
            let dist_next_sq = sample.projected_next_pos.distance_squared(&artist.position);
            let admitted = dist_pos_sq <= admit_sq || dist_next_sq <= admit_sq;
            if admitted {
                if self.rendered_geometry.contains(&id) && dist_pos_sq > scaled * scaled {
                    debug!(id = id.raw(), "eviction suppressed by hysteresis band");
                }
                new_candidates.insert(id);
            }
        }
        new_candidates.extend(self.highlighted.iter().copied());

        self.admit_and_evict_geometry(&new_candidates, playback, out);
        self.admit_and_evict_labels(
            embedding,
            tunables,
            sample.pos,
            &new_candidates,
            true,
            playback.current_playing(),
            out,
        );
        self.notify_autoplay(embedding, tunables, sample.pos, &new_candidates, playback, now_secs, out);
    }

    /// Runs the orbit-mode policy (§4.4): a fixed-size top-K by popularity,
    /// admitted regardless of camera distance, with labels admitted purely
    /// by distance order (no popularity-weighted threshold).
    pub fn evaluate_orbit(
        &mut self,
        embedding: &EmbeddingStore,
        tunables: &Tunables,
        camera_pos: Vec3,
        playback: &mut PlaybackDirector,
        out: &mut DrawBatchBuilder,
    ) {
        let mut by_popularity: Vec<_> = embedding.iter().collect();
        by_popularity.sort_unstable_by(|a, b| b.popularity.cmp(&a.popularity).then(a.id.raw().cmp(&b.id.raw())));
        let mut new_candidates: FxHashSet<ArtistId> =
            by_popularity.into_iter().take(tunables.orbit_top_k).map(|a| a.id).collect();
        new_candidates.extend(self.highlighted.iter().copied());

        self.admit_and_evict_geometry(&new_candidates, playback, out);
        self.admit_and_evict_labels(
            embedding,
            tunables,
            camera_pos,
            &new_candidates,
            false,
            playback.current_playing(),
            out,
        );
    }

    /// Special one-shot transition: every currently-shown label is removed,
    /// then the orbit-mode top-K is (re-)admitted from scratch.
    pub fn transition_to_orbit(
        &mut self,
        embedding: &EmbeddingStore,
        tunables: &Tunables,
        camera_pos: Vec3,
        playback: &mut PlaybackDirector,
        out: &mut DrawBatchBuilder,
    ) {
        let shown: Vec<ArtistId> = self
            .label_state
            .iter()
            .filter(|(_, state)| **state == LabelState::Shown)
            .map(|(id, _)| *id)
            .collect();
        for id in shown {
            if Some(id) == playback.current_playing() {
                continue;
            }
            out.label_change(id, false);
            self.label_state.remove(&id);
        }
        self.last_eval_pos = None;
        self.evaluate_orbit(embedding, tunables, camera_pos, playback, out);
    }

    /// Replaces the highlighted set wholesale and re-runs the appropriate
    /// policy so newly-highlighted artists are admitted and no-longer
    /// highlighted ones become eligible for normal eviction again.
    #[allow(clippy::too_many_arguments)]
    pub fn set_highlighted(
        &mut self,
        ids: &[ArtistId],
        embedding: &EmbeddingStore,
        spatial: &SpatialIndex,
        tunables: &Tunables,
        mode: Mode,
        sample: CameraSample,
        playback: &mut PlaybackDirector,
        now_secs: f64,
        out: &mut DrawBatchBuilder,
    ) {
        self.highlighted = ids.iter().copied().collect();
        self.last_eval_pos = None;
        match mode {
            Mode::Fly => self.evaluate_fly(embedding, spatial, tunables, sample, playback, now_secs, out),
            Mode::Orbit => self.evaluate_orbit(embedding, tunables, sample.pos, playback, out),
        }
    }

    /// A name fetch resolved for `id`. If `id` is still in view and was
    /// awaiting a name, shows the label now.
    pub fn note_name_known(&mut self, id: ArtistId, out: &mut DrawBatchBuilder) {
        self.names_known.insert(id);
        if self.rendered_geometry.contains(&id) && self.label_state.get(&id) == Some(&LabelState::Pending) {
            out.label_change(id, true);
            self.label_state.insert(id, LabelState::Shown);
        }
    }

    /// Forces a label for `id` regardless of distance/popularity,
    /// admitting geometry first if it isn't already rendered (an
    /// `AddLabel` must never precede its geometry).
    pub fn force_render_label(&mut self, id: ArtistId, out: &mut DrawBatchBuilder) {
        if !self.rendered_geometry.contains(&id) {
            self.rendered_geometry.insert(id);
            out.geometry_change(id, true);
        }
        match self.label_state.get(&id) {
            Some(LabelState::Shown) => {}
            _ if self.names_known.contains(&id) => {
                out.label_change(id, true);
                self.label_state.insert(id, LabelState::Shown);
            }
            _ => {
                out.fetch_label(id);
                self.label_state.insert(id, LabelState::Pending);
            }
        }
    }

    fn should_reevaluate(&mut self, pos: Vec3, tunables: &Tunables) -> bool {
        if let Some(last) = self.last_eval_pos {
            if last.distance_squared(&pos) < tunables.min_reevaluation_distance_squared {
                return false;
            }
        }
        self.last_eval_pos = Some(pos);
        true
    }

    fn admit_and_evict_geometry(
        &mut self,
        new_candidates: &FxHashSet<ArtistId>,
        playback: &mut PlaybackDirector,
        out: &mut DrawBatchBuilder,
    ) {
        let to_remove: Vec<ArtistId> = self
            .rendered_geometry
            .iter()
            .copied()
            .filter(|id| {
                !new_candidates.contains(id)
                    && playback.current_playing() != Some(*id)
                    && !self.highlighted.contains(id)
            })
            .collect();
        for id in to_remove {
            if let Some(LabelState::Shown) = self.label_state.get(&id) {
                out.label_change(id, false);
            }
            self.label_state.remove(&id);
            self.rendered_geometry.remove(&id);
            out.geometry_change(id, false);
        }

        for id in new_candidates.iter().copied() {
            if self.rendered_geometry.insert(id) {
                out.geometry_change(id, true);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn admit_and_evict_labels(
        &mut self,
        embedding: &EmbeddingStore,
        tunables: &Tunables,
        camera_pos: Vec3,
        new_candidates: &FxHashSet<ArtistId>,
        gate_by_distance: bool,
        currently_playing: Option<ArtistId>,
        out: &mut DrawBatchBuilder,
    ) {
        for id in new_candidates.iter().copied() {
            let Some(artist) = embedding.get(id) else {
                continue;
            };
            let dist_sq = camera_pos.distance_squared(&artist.position);
            let already = self.label_state.get(&id).copied();
            let admit_radius = match already {
                Some(_) => tunables.r_label * tunables.hysteresis_factor,
                None => tunables.r_label,
            };
            // Orbit mode admits every rendered candidate's label without a
            // distance/popularity gate (§4.4: "label admission uses only
            // distance-sorted order", i.e. no threshold function at all);
            // fly mode keeps the popularity-weighted distance threshold. A
            // playing artist's label is never gated either (invariant 4).
            let eligible = Some(id) == currently_playing
                || (self.highlighted.contains(&id) && tunables.orbit_highlight_labels_symmetric)
                || !gate_by_distance
                || (dist_sq <= admit_radius * admit_radius
                    && f32::from(artist.popularity) >= tunables.label_popularity_threshold(dist_sq.sqrt()));

            match (eligible, already) {
                (true, None) if self.names_known.contains(&id) => {
                    out.label_change(id, true);
                    self.label_state.insert(id, LabelState::Shown);
                }
                (true, None) => {
                    out.fetch_label(id);
                    self.label_state.insert(id, LabelState::Pending);
                }
                (false, Some(LabelState::Shown)) => {
                    out.label_change(id, false);
                    self.label_state.remove(&id);
                }
                (false, Some(LabelState::Pending)) => {
                    self.label_state.remove(&id);
                }
                _ => {}
            }
        }

        let stale: Vec<ArtistId> = self
            .label_state
            .keys()
            .copied()
            .filter(|id| !new_candidates.contains(id) && Some(*id) != currently_playing)
            .collect();
        for id in stale {
            if self.label_state.get(&id) == Some(&LabelState::Shown) {
                out.label_change(id, false);
            }
            self.label_state.remove(&id);
        }
    }

    fn notify_autoplay(
        &self,
        embedding: &EmbeddingStore,
        tunables: &Tunables,
        camera_pos: Vec3,
        new_candidates: &FxHashSet<ArtistId>,
        playback: &mut PlaybackDirector,
        now_secs: f64,
        out: &mut DrawBatchBuilder,
    ) {
        // Always offers its pick, even while something is already playing —
        // the Playback Director is what gates a mid-playback switch behind
        // the cooldown (§4.5); gating here too would make that transition
        // unreachable.
        let closest = new_candidates
            .iter()
            .filter_map(|id| embedding.get(*id).map(|a| (a.id, camera_pos.distance_squared(&a.position))))
            .filter(|(_, dist_sq)| *dist_sq <= tunables.r_autoplay * tunables.r_autoplay)
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        if let Some((id, _)) = closest {
            if Some(id) != playback.last_stopped() {
                playback.scheduler_pick(id, now_secs, out);
            }
        }
    }
}

fn popularity_scaled_radius(tunables: &Tunables, popularity: u8) -> f32 {
    tunables.r_render * (1.0 + f32::from(popularity) / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(points: &[(u32, [f32; 3], u8)]) -> EmbeddingStore {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(points.len() as u32).to_le_bytes());
        for (id, pos, pop) in points {
            buf.extend_from_slice(&id.to_le_bytes());
            buf.extend_from_slice(&pos[0].to_le_bytes());
            buf.extend_from_slice(&pos[1].to_le_bytes());
            buf.extend_from_slice(&pos[2].to_le_bytes());
            buf.extend_from_slice(&u32::from(*pop).to_le_bytes());
        }
        EmbeddingStore::decode_packed(&buf, true).unwrap()
    }

    fn sample_at(pos: Vec3) -> CameraSample {
        CameraSample {
            pos,
            projected_next_pos: pos,
        }
    }

    #[test]
    fn scenario_one_init_idle_orbit_admits_geometry_then_fetches_labels() {
        let embedding = store_with(&[(1, [0.0, 0.0, 0.0], 50), (2, [100.0, 0.0, 0.0], 40)]);
        let spatial = SpatialIndex::build(&embedding, 1_000.0);
        let tunables = Tunables::default();
        let mut scheduler = LodScheduler::new();
        let mut playback = PlaybackDirector::new(tunables.playback_cooldown_seconds);
        let mut out = DrawBatchBuilder::new();
        scheduler.evaluate_fly(
            &embedding,
            &spatial,
            &tunables,
            sample_at(Vec3::new(0.0, 0.0, 0.0)),
            &mut playback,
            0.0,
            &mut out,
        );
        assert_eq!(scheduler.rendered_geometry().len(), 2);
    }

    #[test]
    fn scenario_three_fly_mode_cull_evicts_both_artists() {
        let embedding = store_with(&[(1, [0.0, 0.0, 0.0], 50), (2, [100.0, 0.0, 0.0], 40)]);
        let spatial = SpatialIndex::build(&embedding, 1_000.0);
        let tunables = Tunables::default();
        let mut scheduler = LodScheduler::new();
        let mut playback = PlaybackDirector::new(tunables.playback_cooldown_seconds);
        let mut out = DrawBatchBuilder::new();
        scheduler.evaluate_fly(
            &embedding,
            &spatial,
            &tunables,
            sample_at(Vec3::new(0.0, 0.0, 0.0)),
            &mut playback,
            0.0,
            &mut out,
        );

        let mut out2 = DrawBatchBuilder::new();
        scheduler.evaluate_fly(
            &embedding,
            &spatial,
            &tunables,
            sample_at(Vec3::new(1_000.0, 0.0, 0.0)),
            &mut playback,
            0.0,
            &mut out2,
        );
        assert!(scheduler.rendered_geometry().is_empty());
    }

    #[test]
    fn scenario_four_autoplay_trigger_starts_closest_within_radius() {
        let embedding = store_with(&[
            (1, [0.0, 0.0, 0.0], 50),
            (2, [100.0, 0.0, 0.0], 40),
            (3, [5.0, 0.0, 0.0], 80),
        ]);
        let spatial = SpatialIndex::build(&embedding, 1_000.0);
        let tunables = Tunables::default();
        let mut scheduler = LodScheduler::new();
        let mut playback = PlaybackDirector::new(tunables.playback_cooldown_seconds);
        let mut out = DrawBatchBuilder::new();
        scheduler.evaluate_fly(
            &embedding,
            &spatial,
            &tunables,
            sample_at(Vec3::new(4.0, 0.0, 0.0)),
            &mut playback,
            0.0,
            &mut out,
        );
        assert_eq!(playback.pending(), Some(ArtistId(3)));
    }

    #[test]
    fn highlighted_geometry_survives_eviction() {
        let embedding = store_with(&[(1, [0.0, 0.0, 0.0], 50), (2, [100.0, 0.0, 0.0], 40)]);
        let spatial = SpatialIndex::build(&embedding, 1_000.0);
        let tunables = Tunables::default();
        let mut scheduler = LodScheduler::new();
        let mut playback = PlaybackDirector::new(tunables.playback_cooldown_seconds);
        let mut out = DrawBatchBuilder::new();
        scheduler.set_highlighted(
            &[ArtistId(1)],
            &embedding,
            &spatial,
            &tunables,
            Mode::Fly,
            sample_at(Vec3::new(0.0, 0.0, 0.0)),
            &mut playback,
            0.0,
            &mut out,
        );

        let mut out2 = DrawBatchBuilder::new();
        scheduler.evaluate_fly(
            &embedding,
            &spatial,
            &tunables,
            sample_at(Vec3::new(10_000.0, 0.0, 0.0)),
            &mut playback,
            0.0,
            &mut out2,
        );
        assert!(scheduler.rendered_geometry().contains(&ArtistId(1)));
    }

    #[test]
    fn transition_to_orbit_clears_labels_before_readmitting() {
        let embedding = store_with(&[(1, [0.0, 0.0, 0.0], 90), (2, [10.0, 0.0, 0.0], 10)]);
        let tunables = Tunables::default();
        let mut scheduler = LodScheduler::new();
        scheduler.note_name_known(ArtistId(1), &mut DrawBatchBuilder::new());
        let mut out = DrawBatchBuilder::new();
        let mut playback = PlaybackDirector::new(tunables.playback_cooldown_seconds);
        scheduler.transition_to_orbit(&embedding, &tunables, Vec3::new(0.0, 0.0, 0.0), &mut playback, &mut out);
        assert!(scheduler.rendered_geometry().contains(&ArtistId(1)));
    }
}
