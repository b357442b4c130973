use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use draftboard_core::ids::is_valid_game_id;
use draftboard_core::{Game, GameError};

/// Failures reported by a [`GameStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("game {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Rejected(#[from] GameError),
    #[error("board payload is not valid UTF-8")]
    InvalidBoard,
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store encoding: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether retrying the same call might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Unavailable(_))
    }
}

/// Durable record of every game's metadata and board.
///
/// Calls are synchronous; async callers run them on the blocking pool.
pub trait GameStore: Send + Sync {
    fn get(&self, game_id: &str) -> Result<Option<Game>, StoreError>;

    /// Insert a game unless its id is already taken. Returns `false` on a
    /// collision so the caller can pick another id.
    fn insert_new(&self, game: &Game) -> Result<bool, StoreError>;

    /// Atomically read, mutate and write back one game. An `Err` from
    /// `apply` aborts the write.
    fn update(
        &self,
        game_id: &str,
        apply: &mut dyn FnMut(&mut Game) -> Result<(), GameError>,
    ) -> Result<Game, StoreError>;

    /// Mirror the latest board for a game.
    fn persist_board(&self, game_id: &str, board: &[u8]) -> Result<(), StoreError> {
        let text = std::str::from_utf8(board).map_err(|_| StoreError::InvalidBoard)?;
        self.update(game_id, &mut |game| {
            game.board = Some(text.to_string());
            Ok(())
        })
        .map(|_| ())
    }
}

/// Run a store call on the blocking pool.
pub async fn blocking<T, F>(store: &Arc<dyn GameStore>, call: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&dyn GameStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || call(store.as_ref()))
        .await
        .unwrap_or_else(|e| Err(StoreError::Unavailable(e.to_string())))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process store, lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    games: Mutex<HashMap<String, Game>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.games).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GameStore for MemoryStore {
    fn get(&self, game_id: &str) -> Result<Option<Game>, StoreError> {
        Ok(lock(&self.games).get(game_id).cloned())
    }

    fn insert_new(&self, game: &Game) -> Result<bool, StoreError> {
        let mut games = lock(&self.games);
        if games.contains_key(&game.game_id) {
            return Ok(false);
        }
        games.insert(game.game_id.clone(), game.clone());
        Ok(true)
    }

    fn update(
        &self,
        game_id: &str,
        apply: &mut dyn FnMut(&mut Game) -> Result<(), GameError>,
    ) -> Result<Game, StoreError> {
        let mut games = lock(&self.games);
        let stored = games
            .get_mut(game_id)
            .ok_or_else(|| StoreError::NotFound(game_id.to_string()))?;
        let mut next = stored.clone();
        apply(&mut next)?;
        *stored = next.clone();
        Ok(next)
    }
}

/// One JSON document per game under a data directory.
pub struct FileStore {
    root: PathBuf,
    /// Serializes read-modify-write cycles across handlers and hubs.
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        tracing::info!(path = %root.display(), "Opened file game store");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, game_id: &str) -> Result<PathBuf, StoreError> {
        if !is_valid_game_id(game_id) {
            return Err(StoreError::NotFound(game_id.to_string()));
        }
        Ok(self.root.join(format!("{game_id}.json")))
    }

    fn read(path: &Path) -> Result<Option<Game>, StoreError> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write through a temp file so readers never observe a torn document.
    fn write(path: &Path, game: &Game) -> Result<(), StoreError> {
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(game)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl GameStore for FileStore {
    fn get(&self, game_id: &str) -> Result<Option<Game>, StoreError> {
        if !is_valid_game_id(game_id) {
            return Ok(None);
        }
        Self::read(&self.path_for(game_id)?)
    }

    fn insert_new(&self, game: &Game) -> Result<bool, StoreError> {
        let path = self.path_for(&game.game_id)?;
        let _guard = lock(&self.write_lock);
        if path.exists() {
            return Ok(false);
        }
        Self::write(&path, game)?;
        Ok(true)
    }

    fn update(
        &self,
        game_id: &str,
        apply: &mut dyn FnMut(&mut Game) -> Result<(), GameError>,
    ) -> Result<Game, StoreError> {
        let path = self.path_for(game_id)?;
        let _guard = lock(&self.write_lock);
        let mut game = Self::read(&path)?.ok_or_else(|| StoreError::NotFound(game_id.to_string()))?;
        apply(&mut game)?;
        Self::write(&path, &game)?;
        Ok(game)
    }
}
