//! wasm-bindgen bindings exposing the galaxy engine to the renderer worker.
//!
//! The exported `WasmEngine` mirrors the worker-boundary API: `ctx_handle`
//! is realized as ownership of this value (see SPEC_FULL.md §6), every
//! other entry point is an inherent method, and draw batches cross the
//! boundary as plain `Vec<u32>`/`Vec<f32>` (wasm-bindgen hands these to JS
//! as typed arrays).
#![deny(missing_docs)]

use std::cell::RefCell;
use std::rc::Rc;

use galaxy_core::{ArtistId, Engine, Vec3};
use wasm_bindgen::prelude::*;

#[cfg(feature = "console-panic")]
#[wasm_bindgen(start)]
/// Installs a panic hook that forwards Rust panics to the JS console.
pub fn init_console_panic_hook() {
    console_error_panic_hook::set_once();
}

struct Inner {
    engine: Engine,
    connections_positions: Vec<f32>,
    connections_colors: Vec<f32>,
    artist_colors: Vec<f32>,
}

impl Inner {
    fn refresh_connection_buffers(&mut self) {
        self.connections_positions = self.engine.connections_buffer();
        self.connections_colors = self.engine.connections_color_buffer();
    }
}

fn ids_from_js(ids: &[u32]) -> Vec<ArtistId> {
    ids.iter().copied().map(ArtistId).collect()
}

/// The `ctx_handle`: a JS-owned wrapper around one [`Engine`].
#[wasm_bindgen]
pub struct WasmEngine {
    inner: Rc<RefCell<Inner>>,
}

impl Default for WasmEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[wasm_bindgen]
impl WasmEngine {
    #[wasm_bindgen(constructor)]
    /// Creates a new engine context (`create_ctx()`). No embedding is
    /// decoded yet.
    pub fn new() -> WasmEngine {
        WasmEngine {
            inner: Rc::new(RefCell::new(Inner {
                engine: Engine::new(),
                connections_positions: Vec::new(),
                connections_colors: Vec::new(),
                artist_colors: Vec::new(),
            })),
        }
    }

    /// Decodes a packed embedding buffer and returns the per-artist colors
    /// view.
    pub fn decode_packed_positions(&self, bytes: &[u8], is_mobile: bool) -> Result<Vec<f32>, JsValue> {
        let mut inner = self.inner.borrow_mut();
        let colors = inner
            .engine
            .decode_packed_positions(bytes, is_mobile)
            .map_err(|err| JsValue::from_str(&err.to_string()))?;
        inner.artist_colors = colors.clone();
        Ok(colors)
    }

    /// Bulk `(id, x, y, z, popularity)` transfer buffer for every decoded
    /// artist.
    pub fn get_all_artist_data(&self) -> Vec<u32> {
        self.inner.borrow().engine.all_artist_data()
    }

    /// A new camera sample.
    #[allow(clippy::too_many_arguments)]
    pub fn handle_new_position(
        &self,
        x: f32,
        y: f32,
        z: f32,
        nx: f32,
        ny: f32,
        nz: f32,
        is_fly_mode: bool,
    ) -> Vec<u32> {
        self.inner.borrow_mut().engine.handle_new_position(
            Vec3::new(x, y, z),
            Vec3::new(nx, ny, nz),
            is_fly_mode,
        )
    }

    /// Name-fetch results arrived for `ids`.
    pub fn handle_received_artist_names(&self, ids: &[u32]) -> Vec<u32> {
        self.inner
            .borrow_mut()
            .engine
            .handle_received_artist_names(&ids_from_js(ids))
    }

    /// One relationship chunk arrived; refreshes the cached edge buffers.
    pub fn handle_artist_relationship_data(&self, chunk_ix: u32, chunk_bytes: &[u8]) {
        let mut inner = self.inner.borrow_mut();
        inner.engine.handle_artist_relationship_data(chunk_ix, chunk_bytes);
        inner.refresh_connection_buffers();
    }

    /// Replaces the highlighted set wholesale.
    #[allow(clippy::too_many_arguments)]
    pub fn handle_set_highlighted_artists(
        &self,
        ids: &[u32],
        x: f32,
        y: f32,
        z: f32,
        nx: f32,
        ny: f32,
        nz: f32,
        is_fly_mode: bool,
    ) -> Vec<u32> {
        self.inner.borrow_mut().engine.handle_set_highlighted_artists(
            &ids_from_js(ids),
            Vec3::new(x, y, z),
            Vec3::new(nx, ny, nz),
            is_fly_mode,
        )
    }

    /// User explicitly chose an artist to play.
    pub fn handle_artist_manual_play(&self, id: u32) -> Vec<u32> {
        self.inner.borrow_mut().engine.handle_artist_manual_play(ArtistId(id))
    }

    /// The fetch client resolved preview URLs for the pending artist.
    pub fn handle_preview_urls_resolved(&self, id: u32) {
        self.inner.borrow_mut().engine.handle_preview_urls_resolved(ArtistId(id));
    }

    /// The fetch client found no preview URLs for the pending artist.
    pub fn handle_preview_urls_unavailable(&self, id: u32) -> Vec<u32> {
        self.inner
            .borrow_mut()
            .engine
            .handle_preview_urls_unavailable(ArtistId(id))
    }

    /// Preview playback finished naturally.
    pub fn on_music_finished_playing(&self, id: u32) -> Vec<u32> {
        self.inner.borrow_mut().engine.on_music_finished_playing(ArtistId(id))
    }

    /// Switches to orbit mode.
    pub fn transition_to_orbit_mode(&self) -> Vec<u32> {
        self.inner.borrow_mut().engine.transition_to_orbit_mode()
    }

    /// Forces a label for `id` regardless of distance/popularity.
    pub fn force_render_artist_label(&self, id: u32) -> Vec<u32> {
        self.inner.borrow_mut().engine.force_render_artist_label(ArtistId(id))
    }

    /// Directly overrides quality; refreshes the cached edge buffers.
    pub fn set_quality(&self, quality: u8) {
        let mut inner = self.inner.borrow_mut();
        inner.engine.set_quality(quality);
        inner.refresh_connection_buffers();
    }

    /// Re-issues playback for the most recently stopped artist.
    pub fn play_last_artist(&self) -> Vec<u32> {
        self.inner.borrow_mut().engine.play_last_artist()
    }

    /// Feeds one frame's delta time to the Quality Controller.
    pub fn record_frame_time(&self, dt_seconds: f32) {
        let mut inner = self.inner.borrow_mut();
        let before = inner.engine.quality();
        inner.engine.record_frame_time(dt_seconds);
        if inner.engine.quality() != before {
            inner.refresh_connection_buffers();
        }
    }

    /// Tells the engine whether its window currently has focus.
    pub fn set_focused(&self, focused: bool) {
        self.inner.borrow_mut().engine.set_focused(focused);
    }

    /// True while a prior call left batches undrained.
    pub fn is_busy(&self) -> bool {
        self.inner.borrow().engine.is_busy()
    }

    /// Drains one leftover batch from a prior split.
    pub fn drain_pending_batch(&self) -> Vec<u32> {
        self.inner.borrow_mut().engine.drain_pending_batch()
    }

    /// Pointer into wasm linear memory for the cached connections-positions
    /// buffer. Valid until the next call that refreshes it.
    pub fn get_connections_buffer_ptr(&self) -> *const f32 {
        self.inner.borrow().connections_positions.as_ptr()
    }

    /// Length, in `f32` elements, of the connections-positions buffer.
    pub fn get_connections_buffer_length(&self) -> usize {
        self.inner.borrow().connections_positions.len()
    }

    /// Pointer into wasm linear memory for the cached connections-colors
    /// buffer.
    pub fn get_connections_color_buffer_ptr(&self) -> *const f32 {
        self.inner.borrow().connections_colors.as_ptr()
    }

    /// Length, in `f32` elements, of the connections-colors buffer.
    pub fn get_connections_color_buffer_length(&self) -> usize {
        self.inner.borrow().connections_colors.len()
    }

    /// Pointer into wasm linear memory for the cached artist-colors buffer.
    pub fn get_artist_colors_buffer_ptr(&self) -> *const f32 {
        self.inner.borrow().artist_colors.as_ptr()
    }

    /// Length, in `f32` elements, of the artist-colors buffer.
    pub fn get_artist_colors_buffer_length(&self) -> usize {
        self.inner.borrow().artist_colors.len()
    }

    /// Highlighted-set backbone (`intra` or `inter`) for `ids`.
    pub fn get_connections_for_artists(&self, ids: &[u32], intra: bool) -> Vec<f32> {
        self.inner
            .borrow()
            .engine
            .connections_for_artists(&ids_from_js(ids), intra)
    }
}
