//! galaxy-core: the spatial LOD and playback-scheduling engine for the
//! artist-galaxy renderer.
//!
//! Owns the decoded artist embedding, the spatial index built over it, the
//! streamed relationship graph, and the three cooperating state machines
//! (LOD scheduler, playback director, quality controller) that decide what
//! the renderer should draw each tick. Platform-agnostic: nothing here
//! depends on wasm-bindgen or any particular host; see `galaxy-wasm` for
//! the worker-boundary shim.

pub mod commands;
pub mod embedding;
pub mod engine;
pub mod errors;
pub mod ident;
pub mod playback;
pub mod quality;
pub mod relationships;
pub mod scheduler;
pub mod spatial;
pub mod tunables;
pub mod vec3;

pub use commands::{DrawBatchBuilder, DrawOp};
pub use embedding::{Artist, EmbeddingStore};
pub use engine::Engine;
pub use errors::EngineError;
pub use ident::ArtistId;
pub use playback::PlaybackDirector;
pub use quality::QualityController;
pub use relationships::RelationshipStore;
pub use scheduler::{CameraSample, LodScheduler, Mode};
pub use spatial::SpatialIndex;
pub use tunables::{QualityBand, Tunables};
pub use vec3::Vec3;
