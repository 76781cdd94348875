//! At-most-one auto-play selection, cooldown, and user-intent overrides.

use crate::commands::{DrawBatchBuilder, DrawOp};
use crate::ident::ArtistId;

/// Playback Director state, mirroring SPEC_FULL.md §4.5's transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Pending(ArtistId),
    Playing { id: ArtistId, started_at_secs: f64 },
}

/// Owns `current_playing`/`pending` and enforces the scheduler cooldown.
/// All timing is driven by an explicit `now_secs` the caller supplies (see
/// [`crate::quality::QualityController`] for why the engine has no
/// wall-clock of its own): this keeps cooldown behavior deterministic and
/// independently testable.
#[derive(Debug)]
pub struct PlaybackDirector {
    state: State,
    last_stopped: Option<ArtistId>,
    cooldown_secs: f32,
}

impl PlaybackDirector {
    /// Creates an idle director with the given scheduler cooldown.
    pub fn new(cooldown_secs: f32) -> Self {
        Self {
            state: State::Idle,
            last_stopped: None,
            cooldown_secs,
        }
    }

    /// The artist currently playing, if any.
    pub fn current_playing(&self) -> Option<ArtistId> {
        match self.state {
            State::Playing { id, .. } => Some(id),
            _ => None,
        }
    }

    /// The artist awaiting preview-URL resolution, if any.
    pub fn pending(&self) -> Option<ArtistId> {
        match self.state {
            State::Pending(id) => Some(id),
            _ => None,
        }
    }

    /// True if nothing is playing or queued, i.e. the scheduler may trigger
    /// a new autoplay pick.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle)
    }

    /// The most recently stopped artist, if any. Used by the scheduler to
    /// avoid immediately re-triggering autoplay for a track that just
    /// ended or was displaced.
    pub fn last_stopped(&self) -> Option<ArtistId> {
        self.last_stopped
    }

    /// The LOD scheduler found a new closest-eligible-within-`R_autoplay`
    /// candidate. Respects the scheduler cooldown: a track started less
    /// than `cooldown_secs` ago cannot be displaced by this path.
    pub fn scheduler_pick(&mut self, id: ArtistId, now_secs: f64, out: &mut DrawBatchBuilder) {
        match self.state {
            State::Idle => self.start(id, out),
            State::Pending(current) if current != id => self.switch(id, out),
            State::Playing {
                id: current,
                started_at_secs,
            } if current != id => {
                let elapsed = now_secs - started_at_secs;
                if elapsed >= f64::from(self.cooldown_secs) {
                    self.switch(id, out);
                }
                // Otherwise: cooldown not elapsed yet, ignore the pick.
            }
            _ => {}
        }
    }

    /// The external fetch client resolved preview URLs for the pending
    /// artist.
    pub fn preview_resolved(&mut self, id: ArtistId, now_secs: f64) {
        if self.pending() == Some(id) {
            self.state = State::Playing {
                id,
                started_at_secs: now_secs,
            };
        }
    }

    /// The external fetch client found no preview URLs for the pending
    /// artist.
    pub fn preview_unavailable(&mut self, id: ArtistId, out: &mut DrawBatchBuilder) {
        if self.pending() == Some(id) {
            self.stop(id, out);
            self.state = State::Idle;
        }
    }

    /// Playback for the current artist finished naturally.
    pub fn playback_ended(&mut self, id: ArtistId, out: &mut DrawBatchBuilder) {
        if self.current_playing() == Some(id) {
            self.stop(id, out);
            self.state = State::Idle;
        }
    }

    /// The user explicitly chose an artist to play. Always bypasses the
    /// cooldown.
    pub fn manual_play(&mut self, id: ArtistId, out: &mut DrawBatchBuilder) {
        match self.state {
            State::Idle => self.start(id, out),
            State::Pending(current) | State::Playing { id: current, .. } if current != id => {
                self.switch(id, out)
            }
            _ => {}
        }
    }

    /// Re-issues `StartPlayingMusic` for the most recently stopped artist,
    /// or is a no-op if none exists yet.
    pub fn play_last(&mut self, out: &mut DrawBatchBuilder) {
        if let Some(last) = self.last_stopped {
            self.manual_play(last, out);
        }
    }

    fn start(&mut self, id: ArtistId, out: &mut DrawBatchBuilder) {
        self.state = State::Pending(id);
        out.playback(DrawOp::StartPlayingMusic, id);
    }

    fn switch(&mut self, id: ArtistId, out: &mut DrawBatchBuilder) {
        let departing = match self.state {
            State::Pending(current) | State::Playing { id: current, .. } => current,
            State::Idle => unreachable_idle(),
        };
        self.stop(departing, out);
        self.state = State::Pending(id);
        out.playback(DrawOp::StartPlayingMusic, id);
    }

    fn stop(&mut self, id: ArtistId, out: &mut DrawBatchBuilder) {
        out.playback(DrawOp::StopPlayingMusic, id);
        self.last_stopped = Some(id);
    }
}

#[allow(clippy::panic)]
#[track_caller]
fn unreachable_idle() -> ArtistId {
    panic!("switch() called while Idle; callers must only invoke it from Pending/Playing")
}
