//! Policy constants for the LOD scheduler, playback director, and quality
//! controller, gathered in one place so they can be overridden in tests
//! without touching policy logic.

/// Lower/upper median-FPS bounds for one quality level. Below `lower` the
/// controller steps quality down; above `upper` it steps up.
#[derive(Debug, Clone, Copy)]
pub struct QualityBand {
    /// Step down below this median FPS.
    pub lower_fps: f32,
    /// Step up above this median FPS.
    pub upper_fps: f32,
}

/// All tunable thresholds for one engine instance.
#[derive(Debug, Clone)]
pub struct Tunables {
    /// Base render radius in fly mode, before popularity scaling.
    pub r_render: f32,
    /// Radius within which a candidate is eligible for a label.
    pub r_label: f32,
    /// Radius within which the closest eligible artist can trigger autoplay.
    pub r_autoplay: f32,
    /// An artist must leave the candidate set by more than `r_render *
    /// hysteresis_factor` before it is evicted (and symmetrically for
    /// labels against `r_label`).
    pub hysteresis_factor: f32,
    /// Popularity (0..100) required to earn a label at distance zero.
    pub label_popularity_floor: f32,
    /// Extra popularity required per unit of distance beyond zero, i.e. the
    /// slope of `threshold(dist)`.
    pub label_popularity_slope: f32,
    /// Fixed-size top-K (by popularity) maintained as geometry in orbit mode.
    pub orbit_top_k: usize,
    /// Whether a highlighted-but-distant artist earns a label in orbit mode
    /// the same way it does in fly mode (resolves an asymmetry the
    /// distilled spec left open; see SPEC_FULL.md §9).
    pub orbit_highlight_labels_symmetric: bool,
    /// Minimum seconds a track must play before the scheduler (not the
    /// user) may stop it.
    pub playback_cooldown_seconds: f32,
    /// Number of per-frame timing samples retained by the quality ring.
    pub fps_ring_capacity: usize,
    /// Seconds of accumulated (focused) frame time between quality
    /// reconsiderations.
    pub quality_reconsider_seconds: f32,
    /// Per-quality-level FPS bands, indexed by `quality - quality_min`.
    pub quality_bands: [QualityBand; 8],
    /// Inclusive minimum quality level.
    pub quality_min: u8,
    /// Inclusive maximum quality level.
    pub quality_max: u8,
    /// Edge stride at each quality level (every Nth edge per source is
    /// retained), indexed the same way as `quality_bands`.
    pub edge_stride: [u32; 8],
    /// Hard upper bound on the number of edges the relationship store will
    /// ever materialize into a buffer, applied after the per-source stride
    /// (§4.3's "global caps apply"). Keeps quality 11 / stride 1 bounded
    /// even against the full ~70k-source graph.
    pub max_rendered_edges: usize,
    /// Uniform grid cell edge length used by the spatial index.
    pub grid_cell_size: f32,
    /// Maximum `(op, id)` pairs per emitted draw batch before the encoder
    /// splits into multiple batches.
    pub max_commands_per_batch: usize,
    /// Camera must move at least this far (squared distance) since the
    /// last fly-mode evaluation before the scheduler re-queries the
    /// spatial index.
    pub min_reevaluation_distance_squared: f32,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            r_render: 60.0,
            r_label: 45.0,
            r_autoplay: 12.0,
            hysteresis_factor: 1.07,
            label_popularity_floor: 20.0,
            label_popularity_slope: 0.6,
            orbit_top_k: 200,
            orbit_highlight_labels_symmetric: true,
            playback_cooldown_seconds: 0.8,
            fps_ring_capacity: 120,
            quality_reconsider_seconds: 3.0,
            quality_min: 4,
            quality_max: 11,
            quality_bands: [
                QualityBand { lower_fps: 20.0, upper_fps: 200.0 },
                QualityBand { lower_fps: 22.0, upper_fps: 200.0 },
                QualityBand { lower_fps: 24.0, upper_fps: 58.0 },
                QualityBand { lower_fps: 26.0, upper_fps: 56.0 },
                QualityBand { lower_fps: 28.0, upper_fps: 54.0 },
                QualityBand { lower_fps: 30.0, upper_fps: 52.0 },
                QualityBand { lower_fps: 32.0, upper_fps: 50.0 },
                QualityBand { lower_fps: 34.0, upper_fps: 200.0 },
            ],
            edge_stride: [16, 12, 9, 7, 5, 3, 2, 1],
            max_rendered_edges: 20_000,
            grid_cell_size: 2_000.0,
            max_commands_per_batch: 4_096,
            min_reevaluation_distance_squared: 4.0,
        }
    }
}

impl Tunables {
    /// The popularity threshold a candidate at `dist` must meet to earn a
    /// label: an increasing function of distance, so far-away artists must
    /// be more popular to show their name.
    pub fn label_popularity_threshold(&self, dist: f32) -> f32 {
        self.label_popularity_floor + self.label_popularity_slope * dist
    }

    /// Looks up the FPS band for a quality level, clamping to the
    /// configured range.
    pub fn band_for_quality(&self, quality: u8) -> QualityBand {
        let clamped = quality.clamp(self.quality_min, self.quality_max);
        let index = usize::from(clamped - self.quality_min);
        self.quality_bands[index]
    }

    /// Looks up the edge stride for a quality level, clamping to the
    /// configured range.
    pub fn stride_for_quality(&self, quality: u8) -> u32 {
        let clamped = quality.clamp(self.quality_min, self.quality_max);
        let index = usize::from(clamped - self.quality_min);
        self.edge_stride[index]
    }
}
