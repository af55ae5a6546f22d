//! Rating domain: Elo arithmetic and the rating table it mutates.

pub mod book;
pub mod elo;

pub use book::{
    DEFAULT_CONFIDENCE, RatingBook, RatingHistoryEntry, RatingUpdate, SeedTable, SideUpdate,
    UpdateContext,
};
pub use elo::{KFactorInputs, KFactorPolicy, OutcomeLabel, expected_score, next_confidence};
