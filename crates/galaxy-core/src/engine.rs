//! Top-level orchestrator wiring the embedding, spatial index, scheduler,
//! playback director, quality controller, and relationship store behind the
//! engine-API surface the worker boundary exposes.

use std::collections::{HashSet, VecDeque};

use crate::commands::DrawBatchBuilder;
use crate::embedding::EmbeddingStore;
use crate::errors::EngineError;
use crate::ident::ArtistId;
use crate::playback::PlaybackDirector;
use crate::quality::QualityController;
use crate::relationships::RelationshipStore;
use crate::scheduler::{CameraSample, LodScheduler, Mode};
use crate::spatial::SpatialIndex;
use crate::tunables::Tunables;
use crate::vec3::Vec3;

/// A starting quality in the middle of the default `4..11` band; the
/// controller steps it up or down from here as frame timings come in.
const DEFAULT_INITIAL_QUALITY: u8 = 7;

/// The whole engine. `ctx_handle` in the external interface is realized as
/// ownership of a value of this type — see SPEC_FULL.md §6.
pub struct Engine {
    tunables: Tunables,
    embedding: Option<EmbeddingStore>,
    spatial: Option<SpatialIndex>,
    relationships: RelationshipStore,
    scheduler: LodScheduler,
    playback: PlaybackDirector,
    quality: QualityController,
    mode: Mode,
    last_camera_pos: Vec3,
    elapsed_secs: f64,
    pending_batches: VecDeque<Vec<u32>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Creates an engine with default tunables and no embedding decoded
    /// yet (mirrors `create_ctx()`; the embedding arrives via a later
    /// `decode_packed_positions` call).
    pub fn new() -> Self {
        Self::with_tunables(Tunables::default())
    }

    /// Creates an engine with caller-supplied tunables, for tests and
    /// downstream tuning without recompiling policy logic.
    pub fn with_tunables(tunables: Tunables) -> Self {
        let quality = QualityController::new(&tunables, DEFAULT_INITIAL_QUALITY);
        let playback = PlaybackDirector::new(tunables.playback_cooldown_seconds);
        Self {
            tunables,
            embedding: None,
            spatial: None,
            relationships: RelationshipStore::new(),
            scheduler: LodScheduler::new(),
            playback,
            quality,
            mode: Mode::Fly,
            last_camera_pos: Vec3::default(),
            elapsed_secs: 0.0,
            pending_batches: VecDeque::new(),
        }
    }

    /// Decodes a packed embedding buffer and (re)builds the spatial index
    /// over it, returning the per-artist colors view.
    pub fn decode_packed_positions(&mut self, bytes: &[u8], is_mobile: bool) -> Result<Vec<f32>, EngineError> {
        let store = EmbeddingStore::decode_packed(bytes, is_mobile)?;
        self.spatial = Some(SpatialIndex::build(&store, self.tunables.grid_cell_size));
        let colors = store.colors_view();
        self.embedding = Some(store);
        Ok(colors)
    }

    /// Bulk `(id, x, y, z, popularity)` transfer buffer for every decoded
    /// artist.
    pub fn all_artist_data(&self) -> Vec<u32> {
        self.embedding.as_ref().map_or_else(Vec::new, EmbeddingStore::all_artist_data)
    }

    /// True while a prior call left batches undrained; new
    /// `handle_new_position` calls are dropped at the boundary while this
    /// holds, per SPEC_FULL.md §5's backpressure rule.
    pub fn is_busy(&self) -> bool {
        !self.pending_batches.is_empty()
    }

    /// Drains one leftover batch from a prior split, or an empty vec once
    /// drained.
    pub fn drain_pending_batch(&mut self) -> Vec<u32> {
        self.pending_batches.pop_front().unwrap_or_default()
    }

    /// A new camera sample. Dropped (empty batch) while `is_busy` or before
    /// an embedding has been decoded.
    pub fn handle_new_position(
        &mut self,
        pos: Vec3,
        projected_next_pos: Vec3,
        is_fly_mode: bool,
    ) -> Vec<u32> {
        if self.is_busy() {
            return Vec::new();
        }
        let (Some(embedding), Some(spatial)) = (self.embedding.as_ref(), self.spatial.as_ref()) else {
            return Vec::new();
        };

        self.last_camera_pos = pos;
        let mut out = DrawBatchBuilder::new();
        let sample = CameraSample { pos, projected_next_pos };
        if is_fly_mode {
            self.mode = Mode::Fly;
            self.scheduler.evaluate_fly(
                embedding,
                spatial,
                &self.tunables,
                sample,
                &mut self.playback,
                self.elapsed_secs,
                &mut out,
            );
        } else {
            self.mode = Mode::Orbit;
            self.scheduler
                .evaluate_orbit(embedding, &self.tunables, pos, &mut self.playback, &mut out);
        }
        self.emit(out)
    }

    /// Name-fetch results arrived for `ids`.
    pub fn handle_received_artist_names(&mut self, ids: &[ArtistId]) -> Vec<u32> {
        let mut out = DrawBatchBuilder::new();
        for &id in ids {
            self.scheduler.note_name_known(id, &mut out);
        }
        self.emit(out)
    }

    /// One relationship chunk arrived. Edge buffers are refreshed in
    /// place; the caller fetches them via the buffer accessors below.
    pub fn handle_artist_relationship_data(&mut self, chunk_ix: u32, chunk_bytes: &[u8]) {
        if let Some(embedding) = self.embedding.as_ref() {
            self.relationships.apply_chunk(embedding, chunk_ix, chunk_bytes);
        }
    }

    /// Replaces the highlighted set wholesale.
    pub fn handle_set_highlighted_artists(
        &mut self,
        ids: &[ArtistId],
        pos: Vec3,
        projected_next_pos: Vec3,
        is_fly_mode: bool,
    ) -> Vec<u32> {
        let (Some(embedding), Some(spatial)) = (self.embedding.as_ref(), self.spatial.as_ref()) else {
            return Vec::new();
        };
        let mode = if is_fly_mode { Mode::Fly } else { Mode::Orbit };
        let mut out = DrawBatchBuilder::new();
        self.scheduler.set_highlighted(
            ids,
            embedding,
            spatial,
            &self.tunables,
            mode,
            CameraSample { pos, projected_next_pos },
            &mut self.playback,
            self.elapsed_secs,
            &mut out,
        );
        self.emit(out)
    }

    /// User explicitly chose an artist to play.
    pub fn handle_artist_manual_play(&mut self, id: ArtistId) -> Vec<u32> {
        let mut out = DrawBatchBuilder::new();
        self.playback.manual_play(id, &mut out);
        self.emit(out)
    }

    /// The external fetch client resolved preview URLs for the pending
    /// artist: `Pending(id) -> Playing(id)`, no draw command (§4.5).
    pub fn handle_preview_urls_resolved(&mut self, id: ArtistId) {
        self.playback.preview_resolved(id, self.elapsed_secs);
    }

    /// The external fetch client found no preview URLs for the pending
    /// artist: `Pending(id) -> Idle`, emits `StopPlayingMusic(id)`.
    pub fn handle_preview_urls_unavailable(&mut self, id: ArtistId) -> Vec<u32> {
        let mut out = DrawBatchBuilder::new();
        self.playback.preview_unavailable(id, &mut out);
        self.emit(out)
    }

    /// Preview playback for `id` finished naturally.
    pub fn on_music_finished_playing(&mut self, id: ArtistId) -> Vec<u32> {
        let mut out = DrawBatchBuilder::new();
        self.playback.playback_ended(id, &mut out);
        self.emit(out)
    }

    /// Switches to orbit mode: removes every currently-shown label, then
    /// re-admits the orbit-mode top-K from the last known camera position.
    pub fn transition_to_orbit_mode(&mut self) -> Vec<u32> {
        let Some(embedding) = self.embedding.as_ref() else {
            return Vec::new();
        };
        self.mode = Mode::Orbit;
        let mut out = DrawBatchBuilder::new();
        self.scheduler.transition_to_orbit(
            embedding,
            &self.tunables,
            self.last_camera_pos,
            &mut self.playback,
            &mut out,
        );
        self.emit(out)
    }

    /// Forces a label for `id` regardless of distance/popularity.
    pub fn force_render_artist_label(&mut self, id: ArtistId) -> Vec<u32> {
        let mut out = DrawBatchBuilder::new();
        self.scheduler.force_render_label(id, &mut out);
        self.emit(out)
    }

    /// Directly overrides quality. Edge buffers must be re-fetched by the
    /// caller afterward; this method only updates the level.
    pub fn set_quality(&mut self, quality: u8) {
        self.quality.set_quality(quality, &self.tunables);
    }

    /// Re-issues playback for the most recently stopped artist.
    pub fn play_last_artist(&mut self) -> Vec<u32> {
        let mut out = DrawBatchBuilder::new();
        self.playback.play_last(&mut out);
        self.emit(out)
    }

    /// Feeds one frame's delta time to the Quality Controller.
    pub fn record_frame_time(&mut self, dt_seconds: f32) {
        self.elapsed_secs += f64::from(dt_seconds);
        self.quality.record_frame_time(dt_seconds, &self.tunables);
    }

    /// Tells the engine whether its window currently has focus.
    pub fn set_focused(&mut self, focused: bool) {
        self.quality.set_focused(focused);
    }

    /// Current quality level.
    pub fn quality(&self) -> u8 {
        self.quality.quality()
    }

    /// Current edge opacity scalar for the renderer.
    pub fn edge_opacity(&self) -> f32 {
        self.quality.edge_opacity(&self.tunables)
    }

    /// Current sphere tessellation hint for the renderer.
    pub fn sphere_tessellation_hint(&self) -> u32 {
        self.quality.sphere_tessellation_hint(&self.tunables)
    }

    /// Bloomed edge positions buffer at the current quality.
    pub fn connections_buffer(&self) -> Vec<f32> {
        let Some(embedding) = self.embedding.as_ref() else {
            return Vec::new();
        };
        self.relationships.positions_buffer(embedding, &self.tunables, self.quality())
    }

    /// Bloomed edge colors buffer at the current quality.
    pub fn connections_color_buffer(&self) -> Vec<f32> {
        let Some(embedding) = self.embedding.as_ref() else {
            return Vec::new();
        };
        self.relationships.colors_buffer(embedding, &self.tunables, self.quality())
    }

    /// Per-artist colors buffer.
    pub fn artist_colors_buffer(&self) -> Vec<f32> {
        self.embedding.as_ref().map_or_else(Vec::new, EmbeddingStore::colors_view)
    }

    /// Ids with geometry currently instanced. Exposed for introspection in
    /// tests; the renderer itself tracks state from draw commands alone.
    pub fn rendered_artist_ids(&self) -> Vec<ArtistId> {
        self.scheduler.rendered_geometry().iter().copied().collect()
    }

    /// Highlighted-set backbone (`intra` or `inter`) for `ids`.
    pub fn connections_for_artists(&self, ids: &[ArtistId], intra: bool) -> Vec<f32> {
        let Some(embedding) = self.embedding.as_ref() else {
            return Vec::new();
        };
        let set: HashSet<ArtistId> = ids.iter().copied().collect();
        self.relationships.connections_for_artists(embedding, &set, intra)
    }

    fn emit(&mut self, out: DrawBatchBuilder) -> Vec<u32> {
        let mut batches = out.finish(&self.tunables);
        let first = batches.pop_front().unwrap_or_default();
        self.pending_batches.extend(batches);
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed_embedding(points: &[(u32, [f32; 3], u8)]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(points.len() as u32).to_le_bytes());
        for (id, pos, pop) in points {
            buf.extend_from_slice(&id.to_le_bytes());
            buf.extend_from_slice(&pos[0].to_le_bytes());
            buf.extend_from_slice(&pos[1].to_le_bytes());
            buf.extend_from_slice(&pos[2].to_le_bytes());
            buf.extend_from_slice(&u32::from(*pop).to_le_bytes());
        }
        buf
    }

    #[test]
    fn scenario_one_through_four_end_to_end() {
        let mut engine = Engine::new();
        engine
            .decode_packed_positions(
                &packed_embedding(&[(1, [0.0, 0.0, 0.0], 50), (2, [100.0, 0.0, 0.0], 40)]),
                true,
            )
            .unwrap();

        let batch = engine.handle_new_position(Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 0.0), false);
        assert!(!batch.is_empty());

        let batch2 = engine.handle_received_artist_names(&[ArtistId(1)]);
        assert_eq!(batch2, vec![0, 1]);
    }

    #[test]
    fn calls_before_decode_are_inert_not_panicking() {
        let mut engine = Engine::new();
        let batch = engine.handle_new_position(Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 0.0), true);
        assert!(batch.is_empty());
    }

    #[test]
    fn scenario_six_quality_downshift_shrinks_edges_and_raises_opacity() {
        let mut engine = Engine::new();
        let mut points = vec![(0u32, [0.0, 0.0, 0.0], 10u8)];
        for i in 1..1000u32 {
            points.push((i, [i as f32, 0.0, 0.0], 10));
        }
        engine.decode_packed_positions(&packed_embedding(&points), true).unwrap();
        let targets: Vec<u32> = (1..1000).collect();
        let chunk = {
            let mut buf = Vec::new();
            buf.extend_from_slice(&0u32.to_le_bytes());
            buf.extend_from_slice(&1u32.to_le_bytes());
            buf.extend_from_slice(&(targets.len() as u16).to_le_bytes());
            for t in &targets {
                buf.extend_from_slice(&t.to_le_bytes());
            }
            buf
        };
        engine.handle_artist_relationship_data(0, &chunk);

        engine.set_quality(7);
        let at_seven = engine.connections_buffer().len();
        let opacity_seven = engine.edge_opacity();

        engine.set_quality(5);
        let at_five = engine.connections_buffer().len();
        let opacity_five = engine.edge_opacity();

        assert!((at_five as f32) <= 0.7 * at_seven as f32);
        assert!(opacity_five > opacity_seven);
    }

    #[test]
    fn busy_engine_drops_new_position_calls() {
        let mut engine = Engine::with_tunables(Tunables {
            max_commands_per_batch: 1,
            ..Tunables::default()
        });
        let mut points = Vec::new();
        for i in 0..10u32 {
            points.push((i, [i as f32, 0.0, 0.0], 10u8));
        }
        engine.decode_packed_positions(&packed_embedding(&points), true).unwrap();
        let _ = engine.handle_new_position(Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 0.0), false);
        assert!(engine.is_busy());
        let dropped = engine.handle_new_position(Vec3::new(1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0), false);
        assert!(dropped.is_empty());
        while engine.is_busy() {
            engine.drain_pending_batch();
        }
    }
}
