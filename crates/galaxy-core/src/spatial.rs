//! Read-only uniform-grid spatial index over the artist embedding.

use rustc_hash::FxHashMap;

use crate::embedding::EmbeddingStore;
use crate::ident::ArtistId;
use crate::vec3::Vec3;

type Cell = (i32, i32, i32);

/// Uniform-grid index built once over an [`EmbeddingStore`]. Cell edge
/// length is a [`crate::tunables::Tunables::grid_cell_size`]; the embedding
/// spans roughly ±2e5 units so a 1-5k unit cell keeps per-cell occupancy
/// low without the bookkeeping of a kd-tree.
pub struct SpatialIndex {
    cell_size: f32,
    cells: FxHashMap<Cell, Vec<usize>>,
    positions: Vec<Vec3>,
    ids: Vec<ArtistId>,
}

impl SpatialIndex {
    /// Builds the index over every artist currently in `store`.
    pub fn build(store: &EmbeddingStore, cell_size: f32) -> Self {
        let mut cells: FxHashMap<Cell, Vec<usize>> = FxHashMap::default();
        let mut positions = Vec::with_capacity(store.count());
        let mut ids = Vec::with_capacity(store.count());

        for (index, artist) in store.iter().enumerate() {
            positions.push(artist.position);
            ids.push(artist.id);
            let cell = cell_of(artist.position, cell_size);
            cells.entry(cell).or_default().push(index);
        }

        Self {
            cell_size,
            cells,
            positions,
            ids,
        }
    }

    /// Returns up to `k` artist ids within `radius` of `point`, ordered by
    /// ascending distance (ties broken by ascending id).
    pub fn k_nearest_in_radius(&self, point: Vec3, radius: f32, k: usize) -> Vec<ArtistId> {
        let radius_sq = radius * radius;
        let mut candidates = self.candidates_within(point, radius, radius_sq);
        candidates.sort_unstable_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.raw().cmp(&b.0.raw()))
        });
        candidates.truncate(k);
        candidates.into_iter().map(|(id, _)| id).collect()
    }

    /// Single nearest artist within a small radius, or `None` if nothing
    /// qualifies. Used by upstream fly-mode ray picks.
    pub fn nearest_in_radius(&self, point: Vec3, radius: f32) -> Option<ArtistId> {
        self.k_nearest_in_radius(point, radius, 1).into_iter().next()
    }

    /// Unordered bulk extraction of every id within `radius`, with its
    /// squared distance to `point`. Used by callers that need a candidate
    /// set (e.g. the scheduler's fly-mode union query) without paying for a
    /// full sort up front.
    pub fn candidates_within(
        &self,
        point: Vec3,
        radius: f32,
        radius_sq: f32,
    ) -> Vec<(ArtistId, f32)> {
        let span = (radius / self.cell_size).ceil() as i32 + 1;
        let center = cell_of(point, self.cell_size);
        let mut out = Vec::new();

        for dx in -span..=span {
            for dy in -span..=span {
                for dz in -span..=span {
                    let cell = (center.0 + dx, center.1 + dy, center.2 + dz);
                    let Some(indices) = self.cells.get(&cell) else {
                        continue;
                    };
                    for &index in indices {
                        let dist_sq = point.distance_squared(&self.positions[index]);
                        if dist_sq <= radius_sq {
                            out.push((self.ids[index], dist_sq));
                        }
                    }
                }
            }
        }
        out
    }
}

fn cell_of(position: Vec3, cell_size: f32) -> Cell {
    (
        (position.x() / cell_size).floor() as i32,
        (position.y() / cell_size).floor() as i32,
        (position.z() / cell_size).floor() as i32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(points: &[(u32, [f32; 3])]) -> EmbeddingStore {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(points.len() as u32).to_le_bytes());
        for (id, pos) in points {
            buf.extend_from_slice(&id.to_le_bytes());
            buf.extend_from_slice(&pos[0].to_le_bytes());
            buf.extend_from_slice(&pos[1].to_le_bytes());
            buf.extend_from_slice(&pos[2].to_le_bytes());
            buf.extend_from_slice(&0u32.to_le_bytes());
        }
        EmbeddingStore::decode_packed(&buf, true).unwrap()
    }

    #[test]
    fn k_nearest_orders_by_distance_then_id() {
        let store = store_with(&[
            (3, [10.0, 0.0, 0.0]),
            (1, [1.0, 0.0, 0.0]),
            (2, [1.0, 0.0, 0.0]),
        ]);
        let index = SpatialIndex::build(&store, 1_000.0);
        let found = index.k_nearest_in_radius(Vec3::new(0.0, 0.0, 0.0), 50.0, 10);
        assert_eq!(found, vec![ArtistId(1), ArtistId(2), ArtistId(3)]);
    }

    #[test]
    fn radius_excludes_far_points() {
        let store = store_with(&[(1, [0.0, 0.0, 0.0]), (2, [10_000.0, 0.0, 0.0])]);
        let index = SpatialIndex::build(&store, 1_000.0);
        let found = index.k_nearest_in_radius(Vec3::new(0.0, 0.0, 0.0), 50.0, 10);
        assert_eq!(found, vec![ArtistId(1)]);
    }

    #[test]
    fn k_truncates_result_set() {
        let store = store_with(&[(1, [0.0, 0.0, 0.0]), (2, [1.0, 0.0, 0.0]), (3, [2.0, 0.0, 0.0])]);
        let index = SpatialIndex::build(&store, 1_000.0);
        let found = index.k_nearest_in_radius(Vec3::new(0.0, 0.0, 0.0), 50.0, 2);
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn nearest_in_radius_returns_single_closest() {
        let store = store_with(&[(1, [5.0, 0.0, 0.0]), (2, [1.0, 0.0, 0.0])]);
        let index = SpatialIndex::build(&store, 1_000.0);
        assert_eq!(
            index.nearest_in_radius(Vec3::new(0.0, 0.0, 0.0), 50.0),
            Some(ArtistId(2))
        );
    }

    #[test]
    fn query_spans_multiple_grid_cells() {
        // Cell size of 10 with points straddling a cell boundary must still
        // be found within a large-enough radius.
        let store = store_with(&[(1, [-5.0, 0.0, 0.0]), (2, [5.0, 0.0, 0.0])]);
        let index = SpatialIndex::build(&store, 10.0);
        let found = index.k_nearest_in_radius(Vec3::new(0.0, 0.0, 0.0), 20.0, 10);
        assert_eq!(found.len(), 2);
    }
}
