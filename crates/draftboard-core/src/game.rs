use std::fmt;

use serde::{Deserialize, Serialize};

use crate::draft::{Board, Draft};

/// Number of joiners who get a seat; everyone after them spectates.
pub const PLAYER_SEATS: u32 = 2;

/// Errors raised when a game mutation is not allowed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("game is {actual}, expected {expected}")]
    WrongState {
        expected: GameState,
        actual: GameState,
    },
    #[error("{0} has already submitted a draft")]
    DraftAlreadySubmitted(Side),
    #[error("invalid draft: {0}")]
    InvalidDraft(String),
    #[error("failed to encode board: {0}")]
    Encode(String),
}

/// Lifecycle of a game record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameState {
    Waiting,
    Drafting,
    Active,
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Drafting => write!(f, "drafting"),
            Self::Active => write!(f, "active"),
        }
    }
}

/// A player's colour. Travels as `1` (white) or `-1` (black), the same sign
/// convention the piece codes use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }

    pub fn sign(self) -> i8 {
        match self {
            Self::White => 1,
            Self::Black => -1,
        }
    }
}

impl From<Side> for i8 {
    fn from(side: Side) -> Self {
        side.sign()
    }
}

impl TryFrom<i8> for Side {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::White),
            -1 => Ok(Self::Black),
            other => Err(format!("side must be 1 or -1, got {other}")),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::White => write!(f, "white"),
            Self::Black => write!(f, "black"),
        }
    }
}

/// The durable record of one game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub game_id: String,
    pub game_state: GameState,
    /// Side handed to the next player who takes a seat.
    pub waiting_for: Side,
    pub times_joined: u32,
    pub current_turn: Side,
    /// Latest serialized board; opaque to the server once the game is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub white_draft: Option<Draft>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub black_draft: Option<Draft>,
}

impl Game {
    pub fn new(game_id: String, created_by: Side) -> Self {
        Self {
            game_id,
            game_state: GameState::Waiting,
            waiting_for: created_by,
            times_joined: 0,
            current_turn: Side::White,
            board: None,
            white_draft: None,
            black_draft: None,
        }
    }

    /// Record a visit to the game page. Callers that already hold the game
    /// cookie are returning players and leave the record untouched. The
    /// first two cookie-less callers take the `waiting_for` side in turn;
    /// the second one moves the game into drafting.
    pub fn join(&mut self, has_cookie: bool) -> Option<Side> {
        if has_cookie {
            return None;
        }
        let seated = self.times_joined < PLAYER_SEATS;
        self.times_joined = self.times_joined.saturating_add(1);
        if !seated {
            return None;
        }

        let side = self.waiting_for;
        self.waiting_for = side.opposite();
        if self.times_joined == PLAYER_SEATS && self.game_state == GameState::Waiting {
            self.game_state = GameState::Drafting;
        }
        Some(side)
    }

    pub fn draft_for(&self, side: Side) -> Option<&Draft> {
        match side {
            Side::White => self.white_draft.as_ref(),
            Side::Black => self.black_draft.as_ref(),
        }
    }

    /// Store `side`'s draft. Returns `true` when this submission completed
    /// the pair: the board is then assembled and the game becomes active.
    pub fn submit_draft(&mut self, side: Side, draft: Draft) -> Result<bool, GameError> {
        if self.game_state != GameState::Drafting {
            return Err(GameError::WrongState {
                expected: GameState::Drafting,
                actual: self.game_state,
            });
        }
        if self.draft_for(side).is_some() {
            return Err(GameError::DraftAlreadySubmitted(side));
        }
        draft.validate(side)?;

        match side {
            Side::White => self.white_draft = Some(draft),
            Side::Black => self.black_draft = Some(draft),
        }

        let (Some(white), Some(black)) = (&self.white_draft, &self.black_draft) else {
            return Ok(false);
        };
        let board = Board::assemble(white, black);
        self.board = Some(board.to_json()?);
        self.game_state = GameState::Active;
        Ok(true)
    }
}
