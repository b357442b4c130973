use serde::{Deserialize, Serialize};

use crate::game::{GameError, Side};

/// Squares per rank.
pub const BOARD_WIDTH: usize = 8;

/// Ranks on the assembled board.
pub const BOARD_HEIGHT: usize = 8;

/// Piece codes shared with the client. Positive codes are white, negative
/// codes are the same piece for black.
pub mod piece {
    pub const EMPTY: i8 = 0;
    pub const PAWN: i8 = 1;
    pub const KNIGHT: i8 = 2;
    pub const BISHOP: i8 = 3;
    pub const ROOK: i8 = 4;
    pub const QUEEN: i8 = 5;
    pub const KING: i8 = 6;
    pub const ELEPHANT: i8 = 7;
}

/// One side's setup: row 0 is the pawn row, row 1 the back rank, both as
/// seen from that player's chair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Draft(pub [[i8; BOARD_WIDTH]; 2]);

impl Draft {
    pub const PAWN_ROW: usize = 0;
    pub const BACK_ROW: usize = 1;

    /// Check that every square holds a known piece of `side`'s colour.
    pub fn validate(&self, side: Side) -> Result<(), GameError> {
        for (row, ranks) in self.0.iter().enumerate() {
            for (col, &code) in ranks.iter().enumerate() {
                if code == piece::EMPTY {
                    continue;
                }
                if code.unsigned_abs() > piece::ELEPHANT.unsigned_abs() {
                    return Err(GameError::InvalidDraft(format!(
                        "unknown piece code {code} at row {row}, column {col}"
                    )));
                }
                if code.signum() != side.sign() {
                    return Err(GameError::InvalidDraft(format!(
                        "piece {code} at row {row}, column {col} does not belong to {side}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn row(&self, row: usize) -> [i8; BOARD_WIDTH] {
        self.0[row]
    }

    fn mirrored_row(&self, row: usize) -> [i8; BOARD_WIDTH] {
        let mut out = self.0[row];
        out.reverse();
        out
    }
}

/// The full 8x8 board, black's back rank at row 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Board(pub [[i8; BOARD_WIDTH]; BOARD_HEIGHT]);

impl Board {
    pub fn empty() -> Self {
        Self([[piece::EMPTY; BOARD_WIDTH]; BOARD_HEIGHT])
    }

    /// Place both drafts on their home ranks. Black's rows are mirrored
    /// because black submits its draft from the far side of the board.
    pub fn assemble(white: &Draft, black: &Draft) -> Self {
        let mut board = Self::empty();
        board.0[0] = black.mirrored_row(Draft::BACK_ROW);
        board.0[1] = black.mirrored_row(Draft::PAWN_ROW);
        board.0[BOARD_HEIGHT - 2] = white.row(Draft::PAWN_ROW);
        board.0[BOARD_HEIGHT - 1] = white.row(Draft::BACK_ROW);
        board
    }

    pub fn to_json(&self) -> Result<String, GameError> {
        serde_json::to_string(self).map_err(|e| GameError::Encode(e.to_string()))
    }

    pub fn piece_at(&self, row: usize, col: usize) -> Option<i8> {
        self.0.get(row).and_then(|r| r.get(col)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn white_draft() -> Draft {
        Draft([[1, 1, 1, 1, 1, 1, 1, 1], [4, 2, 3, 5, 6, 3, 2, 4]])
    }

    fn black_draft() -> Draft {
        // Black's view: king at column 3, queen at column 4.
        Draft([[-1, -1, -1, -1, -1, -1, -1, -1], [-4, -2, -3, -6, -5, -3, -2, -4]])
    }

    #[test]
    fn assembled_board_matches_standard_setup() {
        let board = Board::assemble(&white_draft(), &black_draft());
        assert_eq!(board.0[0], [-4, -2, -3, -5, -6, -3, -2, -4]);
        assert_eq!(board.0[1], [-1; 8]);
        for row in 2..6 {
            assert_eq!(board.0[row], [0; 8]);
        }
        assert_eq!(board.0[6], [1; 8]);
        assert_eq!(board.0[7], [4, 2, 3, 5, 6, 3, 2, 4]);
    }

    #[test]
    fn kings_face_each_other() {
        let board = Board::assemble(&white_draft(), &black_draft());
        assert_eq!(board.piece_at(0, 4), Some(-piece::KING));
        assert_eq!(board.piece_at(7, 4), Some(piece::KING));
        assert_eq!(board.piece_at(8, 0), None);
    }

    #[test]
    fn board_serializes_as_nested_arrays() {
        let json = Board::empty().to_json().unwrap();
        let parsed: Vec<Vec<i8>> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 8);
        assert!(parsed.iter().all(|r| r.len() == 8));
    }

    #[test]
    fn draft_parses_from_client_json() {
        let draft: Draft =
            serde_json::from_str("[[0,0,0,0,0,0,0,0],[0,0,0,0,6,0,0,0]]").unwrap();
        assert_eq!(draft.0[Draft::BACK_ROW][4], piece::KING);
        assert!(draft.validate(Side::White).is_ok());
    }

    #[test]
    fn draft_with_wrong_row_count_fails_to_parse() {
        let result = serde_json::from_str::<Draft>("[[0,0,0,0,0,0,0,0]]");
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_opponent_pieces() {
        let err = black_draft().validate(Side::White).unwrap_err();
        assert!(matches!(err, GameError::InvalidDraft(_)));
        assert!(white_draft().validate(Side::Black).is_err());
    }

    #[test]
    fn validate_rejects_unknown_codes() {
        let mut draft = white_draft();
        draft.0[0][0] = 9;
        assert!(draft.validate(Side::White).is_err());
    }

    #[test]
    fn elephant_is_a_known_piece() {
        let mut draft = white_draft();
        draft.0[1][0] = piece::ELEPHANT;
        assert!(draft.validate(Side::White).is_ok());
    }
}
