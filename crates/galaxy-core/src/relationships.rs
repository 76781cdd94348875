//! Streamed artist-relationship chunks and the rendered edge buffers derived
//! from them.

use std::collections::HashSet;

use rustc_hash::FxHashMap;
use tracing::warn;

use crate::embedding::EmbeddingStore;
use crate::ident::ArtistId;
use crate::tunables::Tunables;
use crate::vec3::Vec3;

/// One directed source→target relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Edge {
    source: ArtistId,
    target: ArtistId,
}

/// Accumulates relationship chunks and derives the bloomed edge buffers the
/// renderer binds as line geometry.
///
/// Chunks may arrive out of order and are keyed by `chunk_ix`, so a repeat
/// delivery of the same index is naturally idempotent: decoding identical
/// bytes twice produces an identical edge list for that slot, and the
/// flattened edge set is rebuilt from the keyed chunks rather than appended
/// to.
#[derive(Debug, Default)]
pub struct RelationshipStore {
    chunks: FxHashMap<u32, Vec<Edge>>,
    edges: Vec<Edge>,
}

impl RelationshipStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes and applies one relationship chunk. Targets (and sources)
    /// not present in `embedding` are dropped and logged as `UnknownArtist`;
    /// the rest of the chunk is still applied.
    pub fn apply_chunk(&mut self, embedding: &EmbeddingStore, chunk_ix: u32, bytes: &[u8]) {
        let mut edges = Vec::new();
        let mut cursor = 0usize;

        let Some(source_id_base) = read_u32(bytes, &mut cursor) else {
            warn!(chunk_ix, "relationship chunk shorter than header, dropped");
            return;
        };
        let Some(source_count) = read_u32(bytes, &mut cursor) else {
            warn!(chunk_ix, "relationship chunk missing source_count, dropped");
            return;
        };

        for j in 0..source_count {
            let Some(target_count) = read_u16(bytes, &mut cursor) else {
                warn!(chunk_ix, "relationship chunk truncated mid-source, dropped remainder");
                break;
            };
            let source_id = ArtistId(source_id_base.wrapping_add(j));
            let source_known = embedding.get(source_id).is_some();

            for _ in 0..target_count {
                let Some(target_raw) = read_u32(bytes, &mut cursor) else {
                    warn!(chunk_ix, "relationship chunk truncated mid-target list, dropped remainder");
                    break;
                };
                let target_id = ArtistId(target_raw);
                if !source_known {
                    warn!(source = source_id.raw(), "UnknownArtist source in relationship chunk, edge dropped");
                    continue;
                }
                if embedding.get(target_id).is_none() {
                    warn!(target = target_id.raw(), "UnknownArtist target in relationship chunk, edge dropped");
                    continue;
                }
                edges.push(Edge {
                    source: source_id,
                    target: target_id,
                });
            }
        }

        self.chunks.insert(chunk_ix, edges);
        self.rebuild();
    }

    fn rebuild(&mut self) {
        let mut chunk_ixs: Vec<u32> = self.chunks.keys().copied().collect();
        chunk_ixs.sort_unstable();
        self.edges = chunk_ixs
            .into_iter()
            .flat_map(|ix| self.chunks[&ix].iter().copied())
            .collect();
    }

    /// Total edges currently held, before quality-driven stride selection.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Edges retained at `quality`: every `stride(quality)`-th edge per
    /// source, sources visited in ascending id order, truncated to
    /// `tunables.max_rendered_edges` (§4.3's global cap, on top of the
    /// per-source stride).
    fn selected(&self, tunables: &Tunables, quality: u8) -> Vec<Edge> {
        let stride = tunables.stride_for_quality(quality).max(1) as usize;
        let mut by_source: FxHashMap<ArtistId, Vec<Edge>> = FxHashMap::default();
        for edge in &self.edges {
            by_source.entry(edge.source).or_default().push(*edge);
        }
        let mut sources: Vec<ArtistId> = by_source.keys().copied().collect();
        sources.sort_unstable_by_key(ArtistId::raw);

        let mut out = Vec::new();
        for source in sources {
            if out.len() >= tunables.max_rendered_edges {
                break;
            }
            for (j, edge) in by_source[&source].iter().enumerate() {
                if j % stride == 0 {
                    out.push(*edge);
                    if out.len() >= tunables.max_rendered_edges {
                        break;
                    }
                }
            }
        }
        out
    }

    /// Exact edge count retained at `quality`, for callers (e.g. the
    /// Quality Controller) that need the count without materializing
    /// buffers.
    pub fn edges_selected(&self, tunables: &Tunables, quality: u8) -> usize {
        self.selected(tunables, quality).len()
    }

    /// Bloomed edge positions: concatenated `(src.pos, dst.pos)` f32×3
    /// pairs for every currently-selected edge.
    pub fn positions_buffer(&self, embedding: &EmbeddingStore, tunables: &Tunables, quality: u8) -> Vec<f32> {
        let mut out = Vec::new();
        for edge in self.selected(tunables, quality) {
            push_position_pair(&mut out, embedding, edge);
        }
        out
    }

    /// Bloomed edge colors: a linear-RGB two-stop gradient per edge, source
    /// endpoint color followed by destination endpoint color.
    pub fn colors_buffer(&self, embedding: &EmbeddingStore, tunables: &Tunables, quality: u8) -> Vec<f32> {
        let mut out = Vec::new();
        for edge in self.selected(tunables, quality) {
            push_color_pair(&mut out, embedding, edge);
        }
        out
    }

    /// Highlighted-set backbone: edges with both endpoints in `highlighted`
    /// (`intra = true`) or exactly one endpoint in it (`intra = false`).
    /// Drawn from the full edge set, independent of quality stride, so a
    /// highlighted artist's connections are never thinned away.
    pub fn connections_for_artists(
        &self,
        embedding: &EmbeddingStore,
        highlighted: &HashSet<ArtistId>,
        intra: bool,
    ) -> Vec<f32> {
        let mut out = Vec::new();
        for edge in &self.edges {
            let source_in = highlighted.contains(&edge.source);
            let target_in = highlighted.contains(&edge.target);
            let matches = if intra {
                source_in && target_in
            } else {
                source_in != target_in
            };
            if matches {
                push_position_pair(&mut out, embedding, *edge);
            }
        }
        out
    }
}

fn push_position_pair(out: &mut Vec<f32>, embedding: &EmbeddingStore, edge: Edge) {
    let (Some(src), Some(dst)) = (embedding.get(edge.source), embedding.get(edge.target)) else {
        return;
    };
    push_vec3(out, src.position);
    push_vec3(out, dst.position);
}

fn push_color_pair(out: &mut Vec<f32>, embedding: &EmbeddingStore, edge: Edge) {
    let (Some(src), Some(dst)) = (embedding.get(edge.source), embedding.get(edge.target)) else {
        return;
    };
    out.extend_from_slice(&src.color);
    out.extend_from_slice(&dst.color);
}

fn push_vec3(out: &mut Vec<f32>, v: Vec3) {
    out.push(v.x());
    out.push(v.y());
    out.push(v.z());
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Option<u32> {
    let end = *cursor + 4;
    let slice = bytes.get(*cursor..end)?;
    *cursor = end;
    Some(u32::from_le_bytes(slice.try_into().ok()?))
}

fn read_u16(bytes: &[u8], cursor: &mut usize) -> Option<u16> {
    let end = *cursor + 2;
    let slice = bytes.get(*cursor..end)?;
    *cursor = end;
    Some(u16::from_le_bytes(slice.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding_with(points: &[(u32, [f32; 3])]) -> EmbeddingStore {
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

    fn chunk(source_id_base: u32, targets_per_source: &[&[u32]]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&source_id_base.to_le_bytes());
        buf.extend_from_slice(&(targets_per_source.len() as u32).to_le_bytes());
        for targets in targets_per_source {
            buf.extend_from_slice(&(targets.len() as u16).to_le_bytes());
            for t in *targets {
                buf.extend_from_slice(&t.to_le_bytes());
            }
        }
        buf
    }

    #[test]
    fn decodes_and_counts_edges() {
        let embedding = embedding_with(&[(1, [0.0; 3]), (2, [1.0; 3]), (3, [2.0; 3])]);
        let mut store = RelationshipStore::new();
        store.apply_chunk(&embedding, 0, &chunk(1, &[&[2, 3]]));
        assert_eq!(store.edge_count(), 2);
    }

    #[test]
    fn unknown_target_is_dropped_not_fatal() {
        let embedding = embedding_with(&[(1, [0.0; 3]), (2, [1.0; 3])]);
        let mut store = RelationshipStore::new();
        store.apply_chunk(&embedding, 0, &chunk(1, &[&[2, 999]]));
        assert_eq!(store.edge_count(), 1);
    }

    #[test]
    fn reapplying_same_chunk_index_is_idempotent() {
        let embedding = embedding_with(&[(1, [0.0; 3]), (2, [1.0; 3])]);
        let mut store = RelationshipStore::new();
        let bytes = chunk(1, &[&[2]]);
        store.apply_chunk(&embedding, 5, &bytes);
        store.apply_chunk(&embedding, 5, &bytes);
        assert_eq!(store.edge_count(), 1);
    }

    #[test]
    fn out_of_order_chunks_all_apply() {
        let embedding = embedding_with(&[(1, [0.0; 3]), (2, [1.0; 3]), (11, [3.0; 3])]);
        let mut store = RelationshipStore::new();
        store.apply_chunk(&embedding, 1, &chunk(10, &[&[11]]));
        store.apply_chunk(&embedding, 0, &chunk(1, &[&[2]]));
        assert_eq!(store.edge_count(), 2);
    }

    #[test]
    fn stride_thins_edges_per_source() {
        let embedding = embedding_with(&[
            (1, [0.0; 3]),
            (2, [1.0; 3]),
            (3, [2.0; 3]),
            (4, [3.0; 3]),
            (5, [4.0; 3]),
        ]);
        let mut store = RelationshipStore::new();
        store.apply_chunk(&embedding, 0, &chunk(1, &[&[2, 3, 4, 5]]));
        let tunables = Tunables::default();
        let full = store.edges_selected(&tunables, tunables.quality_max);
        let thinned = store.edges_selected(&tunables, tunables.quality_min);
        assert!(thinned < full);
    }

    #[test]
    fn global_cap_bounds_edge_count_regardless_of_stride() {
        let mut points = vec![(1u32, [0.0f32; 3])];
        let mut targets = Vec::new();
        for id in 2..=21u32 {
            points.push((id, [1.0; 3]));
            targets.push(id);
        }
        let embedding = embedding_with(&points);
        let mut store = RelationshipStore::new();
        store.apply_chunk(&embedding, 0, &chunk(1, &[targets.as_slice()]));
        let mut tunables = Tunables::default();
        tunables.max_rendered_edges = 5;
        let selected = store.edges_selected(&tunables, tunables.quality_max);
        assert_eq!(selected, 5);
    }

    #[test]
    fn positions_buffer_has_six_floats_per_edge() {
        let embedding = embedding_with(&[(1, [0.0; 3]), (2, [1.0; 3])]);
        let mut store = RelationshipStore::new();
        store.apply_chunk(&embedding, 0, &chunk(1, &[&[2]]));
        let tunables = Tunables::default();
        let buf = store.positions_buffer(&embedding, &tunables, tunables.quality_max);
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn colors_buffer_is_source_then_destination() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&0.0f32.to_le_bytes());
        buf.extend_from_slice(&0.0f32.to_le_bytes());
        buf.extend_from_slice(&0.0f32.to_le_bytes());
        let packed_red = 0u32 | (255 << 8);
        buf.extend_from_slice(&packed_red.to_le_bytes());
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&1.0f32.to_le_bytes());
        buf.extend_from_slice(&0.0f32.to_le_bytes());
        buf.extend_from_slice(&0.0f32.to_le_bytes());
        let packed_green = 0u32 | (255 << 16);
        buf.extend_from_slice(&packed_green.to_le_bytes());
        let embedding = EmbeddingStore::decode_packed(&buf, true).unwrap();

        let mut store = RelationshipStore::new();
        store.apply_chunk(&embedding, 0, &chunk(1, &[&[2]]));
        let tunables = Tunables::default();
        let colors = store.colors_buffer(&embedding, &tunables, tunables.quality_max);
        assert_eq!(&colors[0..3], &[1.0, 0.0, 0.0]);
        assert_eq!(&colors[3..6], &[0.0, 1.0, 0.0]);
    }

    #[test]
    fn backbone_splits_intra_and_inter() {
        let embedding = embedding_with(&[(1, [0.0; 3]), (2, [1.0; 3]), (3, [2.0; 3])]);
        let mut store = RelationshipStore::new();
        store.apply_chunk(&embedding, 0, &chunk(1, &[&[2, 3]]));

        let highlighted: HashSet<ArtistId> = [ArtistId(1), ArtistId(2)].into_iter().collect();
        let intra = store.connections_for_artists(&embedding, &highlighted, true);
        let inter = store.connections_for_artists(&embedding, &highlighted, false);
        assert_eq!(intra.len(), 6);
        assert_eq!(inter.len(), 6);
    }
}
