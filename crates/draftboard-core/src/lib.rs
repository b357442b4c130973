pub mod draft;
pub mod game;
pub mod ids;

pub use draft::{Board, Draft};
pub use game::{Game, GameError, GameState, Side};
