//! Decodes and owns the immutable artist embedding.

use crate::errors::EngineError;
use crate::ident::ArtistId;
use crate::vec3::Vec3;

/// Size in bytes of one packed artist record: `u32 id, f32 x, f32 y, f32 z,
/// u32 popularity_and_color`.
const RECORD_SIZE: usize = 4 + 4 + 4 + 4 + 4;
/// Size in bytes of the buffer header: `u32 artist_count`.
const HEADER_SIZE: usize = 4;

/// One decoded artist. Immutable once the embedding is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Artist {
    /// Dense external identifier.
    pub id: ArtistId,
    /// World-space position.
    pub position: Vec3,
    /// Listener-popularity percentile, 0..100.
    pub popularity: u8,
    /// RGB color, either carried in the packed byte or derived from
    /// position, each channel in `0.0..=1.0`.
    pub color: [f32; 3],
}

/// Owns the decoded, never-mutated artist set.
#[derive(Debug, Default)]
pub struct EmbeddingStore {
    artists: Vec<Artist>,
    /// Maps external id -> index into `artists`, for O(1) lookup.
    index_by_id: rustc_hash::FxHashMap<u32, usize>,
}

impl EmbeddingStore {
    /// Decodes a packed embedding buffer.
    ///
    /// `is_mobile` selects the color-derivation strategy: mobile devices use
    /// the cheap packed RGB byte triplet directly; desktop re-derives color
    /// from normalized position for a richer gradient (see SPEC_FULL.md
    /// §4.1). Fails with [`EngineError::CorruptEmbedding`] if the length is
    /// inconsistent with the declared count, an id repeats, or a coordinate
    /// is non-finite.
    pub fn decode_packed(bytes: &[u8], is_mobile: bool) -> Result<Self, EngineError> {
        if bytes.len() < HEADER_SIZE {
            return Err(EngineError::CorruptEmbedding(
                "buffer shorter than header".into(),
            ));
        }
        let count = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let expected_len = HEADER_SIZE + count * RECORD_SIZE;
        if bytes.len() != expected_len {
            return Err(EngineError::CorruptEmbedding(format!(
                "declared count {count} implies {expected_len} bytes, got {}",
                bytes.len()
            )));
        }

        let mut artists = Vec::with_capacity(count);
        let mut index_by_id = rustc_hash::FxHashMap::default();
        index_by_id.reserve(count);

        for i in 0..count {
            let base = HEADER_SIZE + i * RECORD_SIZE;
            let record = &bytes[base..base + RECORD_SIZE];

            let id = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
            let x = f32::from_le_bytes([record[4], record[5], record[6], record[7]]);
            let y = f32::from_le_bytes([record[8], record[9], record[10], record[11]]);
            let z = f32::from_le_bytes([record[12], record[13], record[14], record[15]]);
            let packed = u32::from_le_bytes([record[16], record[17], record[18], record[19]]);

            let position = Vec3::new(x, y, z);
            if !position.is_finite() {
                return Err(EngineError::CorruptEmbedding(format!(
                    "artist {id} has a non-finite coordinate"
                )));
            }

            if index_by_id.insert(id, i).is_some() {
                return Err(EngineError::CorruptEmbedding(format!(
                    "duplicate artist id {id}"
                )));
            }

            let popularity = (packed & 0xff) as u8;
            let packed_color = [
                ((packed >> 8) & 0xff) as f32 / 255.0,
                ((packed >> 16) & 0xff) as f32 / 255.0,
                ((packed >> 24) & 0xff) as f32 / 255.0,
            ];
            let color = if is_mobile {
                packed_color
            } else {
                derive_color_from_position(position)
            };

            artists.push(Artist {
                id: ArtistId(id),
                position,
                popularity,
                color,
            });
        }

        Ok(Self {
            artists,
            index_by_id,
        })
    }

    /// Number of decoded artists.
    pub fn count(&self) -> usize {
        self.artists.len()
    }

    /// Looks up an artist by external id.
    pub fn get(&self, id: ArtistId) -> Option<&Artist> {
        self.index_by_id.get(&id.0).map(|&i| &self.artists[i])
    }

    /// Iterates artists in decode order.
    pub fn iter(&self) -> impl Iterator<Item = &Artist> {
        self.artists.iter()
    }

    /// Bulk `(u32 id, f32 x, f32 y, f32 z, u32 popularity)` transfer buffer
    /// for `get_all_artist_data`. Popularity is widened to `u32` to keep a
    /// uniform element stride for the JS side.
    pub fn all_artist_data(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.artists.len() * 5);
        for artist in &self.artists {
            out.push(artist.id.raw());
            out.push(artist.position.x().to_bits());
            out.push(artist.position.y().to_bits());
            out.push(artist.position.z().to_bits());
            out.push(u32::from(artist.popularity));
        }
        out
    }

    /// Bulk color-transfer buffer: concatenated `(id-as-f32-bits, r, g, b)`
    /// quadruples, one per artist, in decode order.
    pub fn colors_view(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.artists.len() * 4);
        for artist in &self.artists {
            out.push(f32::from_bits(artist.id.raw()));
            out.extend_from_slice(&artist.color);
        }
        out
    }
}

/// Projects a world-space position onto a deterministic RGB gradient.
/// Each axis is squashed into `0.0..=1.0` independently so the resulting
/// color varies smoothly with position without needing a palette table.
fn derive_color_from_position(position: Vec3) -> [f32; 3] {
    const SPAN: f32 = 2.0e5;
    let squash = |v: f32| (v / SPAN).clamp(-1.0, 1.0).mul_add(0.5, 0.5);
    [
        squash(position.x()),
        squash(position.y()),
        squash(position.z()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_record(out: &mut Vec<u8>, id: u32, pos: [f32; 3], popularity: u8, rgb: [u8; 3]) {
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(&pos[0].to_le_bytes());
        out.extend_from_slice(&pos[1].to_le_bytes());
        out.extend_from_slice(&pos[2].to_le_bytes());
        let packed = u32::from(popularity)
            | (u32::from(rgb[0]) << 8)
            | (u32::from(rgb[1]) << 16)
            | (u32::from(rgb[2]) << 24);
        out.extend_from_slice(&packed.to_le_bytes());
    }

    fn two_artist_buffer() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&2u32.to_le_bytes());
        encode_record(&mut buf, 1, [0.0, 0.0, 0.0], 50, [255, 0, 0]);
        encode_record(&mut buf, 2, [100.0, 0.0, 0.0], 40, [0, 255, 0]);
        buf
    }

    #[test]
    fn decodes_mobile_colors_from_packed_bytes() {
        let store = EmbeddingStore::decode_packed(&two_artist_buffer(), true).unwrap();
        assert_eq!(store.count(), 2);
        let a = store.get(ArtistId(1)).unwrap();
        assert_eq!(a.popularity, 50);
        assert_eq!(a.color, [1.0, 0.0, 0.0]);
    }

    #[test]
    fn desktop_colors_are_derived_not_packed() {
        let store = EmbeddingStore::decode_packed(&two_artist_buffer(), false).unwrap();
        let a = store.get(ArtistId(1)).unwrap();
        // Position (0,0,0) squashes to (0.5, 0.5, 0.5), not the packed red.
        assert_eq!(a.color, [0.5, 0.5, 0.5]);
    }

    #[test]
    fn rejects_length_mismatch() {
        let mut buf = two_artist_buffer();
        buf.pop();
        let err = EmbeddingStore::decode_packed(&buf, true).unwrap_err();
        assert!(matches!(err, EngineError::CorruptEmbedding(_)));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&2u32.to_le_bytes());
        encode_record(&mut buf, 7, [0.0, 0.0, 0.0], 1, [0, 0, 0]);
        encode_record(&mut buf, 7, [1.0, 1.0, 1.0], 1, [0, 0, 0]);
        let err = EmbeddingStore::decode_packed(&buf, true).unwrap_err();
        assert!(matches!(err, EngineError::CorruptEmbedding(_)));
    }

    #[test]
    fn rejects_non_finite_coordinates() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_le_bytes());
        encode_record(&mut buf, 1, [f32::NAN, 0.0, 0.0], 1, [0, 0, 0]);
        let err = EmbeddingStore::decode_packed(&buf, true).unwrap_err();
        assert!(matches!(err, EngineError::CorruptEmbedding(_)));
    }

    #[test]
    fn colors_view_layout_is_four_floats_per_artist() {
        let store = EmbeddingStore::decode_packed(&two_artist_buffer(), true).unwrap();
        let view = store.colors_view();
        assert_eq!(view.len(), store.count() * 4);
        assert_eq!(view[0].to_bits(), 1u32);
        assert_eq!(&view[1..4], &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn all_artist_data_layout_is_five_u32_per_artist() {
        let store = EmbeddingStore::decode_packed(&two_artist_buffer(), true).unwrap();
        let data = store.all_artist_data();
        assert_eq!(data.len(), store.count() * 5);
        assert_eq!(data[0], 1);
        assert_eq!(data[4], 50);
    }
}
