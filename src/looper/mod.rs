//! Single-track looper: record, play, overdub and clear

mod buffer;
mod player;
mod take;

pub use buffer::{make_playable, Commit, LoopBuffer, TransportState};
pub use player::{player_pair, LoopPlayer, PlayerCommand, PlayerHandle};
pub use take::{Take, TakeId, TakeKind, WriteOutcome};
