use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use draftboard_core::{Draft, Game, Side};

use crate::error::AppError;
use crate::hub::{HubError, HubMessage};
use crate::state::AppState;
use crate::store;

/// GET / — liveness text.
pub async fn root() -> &'static str {
    "root"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGameBody {
    pub created_by: Side,
}

/// POST /create — allocate an unused game id and store a waiting game.
pub async fn create_game(
    State(state): State<AppState>,
    Json(body): Json<CreateGameBody>,
) -> Result<(StatusCode, Json<Game>), AppError> {
    let attempts = state.config.limits.max_id_attempts;
    for attempt in 1..=attempts {
        let game = Game::new(state.ids.game_id(), body.created_by);
        let candidate = game.clone();
        if store::blocking(&state.store, move |s| s.insert_new(&candidate)).await? {
            tracing::info!(game_id = %game.game_id, created_by = %body.created_by, "Created game");
            return Ok((StatusCode::CREATED, Json(game)));
        }
        tracing::debug!(game_id = %game.game_id, attempt, "Game id collision");
    }
    Err(AppError::Unavailable(format!(
        "no free game id after {attempts} attempts"
    )))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinQuery {
    #[serde(default)]
    pub cookie_present: bool,
}

#[derive(Debug, Serialize)]
pub struct JoinResponse {
    pub game: Game,
    /// Seat handed to this caller; `null` for spectators and returning players.
    pub side: Option<Side>,
}

/// GET /join/{game_id} — take a seat if one is free.
pub async fn join_game(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    Query(query): Query<JoinQuery>,
) -> Result<Json<JoinResponse>, AppError> {
    if query.cookie_present {
        let game = load_game(&state, &game_id).await?;
        return Ok(Json(JoinResponse { game, side: None }));
    }

    let id = game_id.clone();
    let (game, side) = store::blocking(&state.store, move |s| {
        let mut side = None;
        let game = s.update(&id, &mut |g| {
            side = g.join(false);
            Ok(())
        })?;
        Ok((game, side))
    })
    .await?;

    match side {
        Some(side) => {
            tracing::info!(game_id = %game_id, %side, state = %game.game_state, "Player seated");
        },
        None => {
            tracing::debug!(
                game_id = %game_id,
                times_joined = game.times_joined,
                "Spectator joined"
            );
        },
    }
    Ok(Json(JoinResponse { game, side }))
}

/// GET /game/{game_id}
pub async fn get_game(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
) -> Result<Json<Game>, AppError> {
    load_game(&state, &game_id).await.map(Json)
}

#[derive(Debug, Deserialize)]
pub struct DraftBody {
    pub side: Side,
    pub draft: Draft,
}

/// POST /draft/{game_id} — record one side's setup. The second draft
/// assembles the board and pushes it to everyone connected to the game.
pub async fn submit_draft(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    Json(body): Json<DraftBody>,
) -> Result<Json<Game>, AppError> {
    let DraftBody { side, draft } = body;
    let id = game_id.clone();
    let (game, completed) = store::blocking(&state.store, move |s| {
        let mut completed = false;
        let game = s.update(&id, &mut |g| {
            completed = g.submit_draft(side, draft)?;
            Ok(())
        })?;
        Ok((game, completed))
    })
    .await?;
    tracing::info!(game_id = %game_id, %side, completed, "Draft submitted");

    if completed
        && let Some(board) = game.board.clone()
        && let Some(hub) = state.directory.get(&game_id)
    {
        match hub.broadcast_and_wait(HubMessage::from_server(board)).await {
            Ok(delivered) => {
                tracing::info!(game_id = %game_id, delivered, "Broadcast assembled board");
            },
            Err(HubError::Persist(e)) => {
                return Err(AppError::Unavailable(format!(
                    "draft saved but board could not be broadcast: {e}"
                )));
            },
            Err(e) => {
                tracing::debug!(
                    game_id = %game_id,
                    error = %e,
                    "Hub went away before board broadcast"
                );
            },
        }
    }
    Ok(Json(game))
}

async fn load_game(state: &AppState, game_id: &str) -> Result<Game, AppError> {
    let id = game_id.to_string();
    store::blocking(&state.store, move |s| s.get(&id))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("game {game_id} not found")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_body_accepts_side_integers() {
        let body: CreateGameBody = serde_json::from_str(r#"{"createdBy":-1}"#).unwrap();
        assert_eq!(body.created_by, Side::Black);
        assert!(serde_json::from_str::<CreateGameBody>(r#"{"createdBy":2}"#).is_err());
    }

    #[test]
    fn join_response_serializes_spectator_side_as_null() {
        let resp = JoinResponse {
            game: Game::new("aB3dE5gH".to_string(), Side::White),
            side: None,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json["side"].is_null());
        assert_eq!(json["game"]["gameId"], "aB3dE5gH");
    }

    #[test]
    fn draft_body_parses() {
        let body: DraftBody = serde_json::from_str(
            r#"{"side":1,"draft":[[1,1,1,1,1,1,1,1],[4,2,3,5,6,3,2,4]]}"#,
        )
        .unwrap();
        assert_eq!(body.side, Side::White);
        assert_eq!(body.draft.0[Draft::BACK_ROW][4], 6);
    }
}
