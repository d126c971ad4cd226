use anyhow::{
    Context,
    Result,
    anyhow,
};
use serde_json::{
    Map,
    Value,
};
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};

pub const DEFAULT_STATE_DIR: &str = "~/.battle-arena";
pub const STATE_FILE: &str = "local_state.json";
pub const HIGH_SCORE_KEY: &str = "battleArenaHighScore";

pub fn resolve_state_dir(dir: Option<&str>) -> PathBuf {
    let raw = dir.unwrap_or(DEFAULT_STATE_DIR);
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

/// Flat key/value file shared by everything the client keeps between runs.
/// Keys it does not know about are preserved on write.
#[derive(Debug)]
pub struct LocalStateStore {
    path: PathBuf,
}

impl LocalStateStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let path = ensure_store(dir.as_ref())?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut entries = read_entries(&self.path)?;
        Ok(entries.remove(key))
    }

    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = read_entries(&self.path)?;
        entries.insert(key.to_string(), value);
        write_entries(&self.path, &entries)
    }
}

fn ensure_store(dir: &Path) -> Result<PathBuf> {
    if !dir.exists() {
        fs::create_dir_all(dir).with_context(|| {
            format!("Failed to create local state directory {}", dir.display())
        })?;
    }
    let file_path = dir.join(STATE_FILE);
    if !file_path.exists() {
        fs::write(&file_path, b"").with_context(|| {
            format!("Failed to create local state file at {:?}", file_path)
        })?;
    }
    Ok(file_path)
}

fn read_entries(path: &Path) -> Result<Map<String, Value>> {
    let data = fs::read(path).context("Failed to read local state")?;
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(&data).context("Failed to parse local state JSON")? {
        Value::Object(entries) => Ok(entries),
        _ => Err(anyhow!("Local state must be a JSON object")),
    }
}

fn write_entries(path: &Path, entries: &Map<String, Value>) -> Result<()> {
    let json =
        serde_json::to_vec_pretty(entries).context("Failed to serialize local state")?;
    fs::write(path, json).context("Failed to write local state")?;
    Ok(())
}

/// Personal best, stored under [`HIGH_SCORE_KEY`].
#[derive(Debug)]
pub struct HighScoreStore {
    store: LocalStateStore,
}

impl HighScoreStore {
    pub fn new(store: LocalStateStore) -> Self {
        Self { store }
    }

    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        LocalStateStore::open(dir).map(Self::new)
    }

    /// Stored best, or 0 when nothing usable has been written yet.
    pub fn load(&self) -> Result<u64> {
        let value = self.store.get(HIGH_SCORE_KEY)?;
        Ok(match value {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        })
    }

    /// Persist `score` if it beats the stored best. Returns whether it did.
    pub fn record(&self, score: u64) -> Result<bool> {
        if score <= self.load()? {
            return Ok(false);
        }
        self.store.set(HIGH_SCORE_KEY, Value::from(score))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn open__missing_directory__creates_blank_store() {
        // given
        let temp_dir = TempDir::new("local_state_open").unwrap();
        let dir = temp_dir.path().join("nested");

        // when
        let store = LocalStateStore::open(&dir).unwrap();

        // then
        assert!(store.path().exists());
        assert_eq!(store.get(HIGH_SCORE_KEY).unwrap(), None);
    }

    #[test]
    fn record__only_persists_new_personal_best() {
        // given
        let temp_dir = TempDir::new("local_state_best").unwrap();
        let scores = HighScoreStore::open(temp_dir.path()).unwrap();
        assert_eq!(scores.load().unwrap(), 0);

        // when
        let first = scores.record(300).unwrap();
        let lower = scores.record(120).unwrap();
        let equal = scores.record(300).unwrap();

        // then
        assert!(first);
        assert!(!lower);
        assert!(!equal);
        let reopened = HighScoreStore::open(temp_dir.path()).unwrap();
        assert_eq!(reopened.load().unwrap(), 300);
    }

    #[test]
    fn set__preserves_unrelated_keys() {
        // given
        let temp_dir = TempDir::new("local_state_keys").unwrap();
        fs::write(
            temp_dir.path().join(STATE_FILE),
            br#"{"theme":"dark","battleArenaHighScore":"42"}"#,
        )
        .unwrap();
        let scores = HighScoreStore::open(temp_dir.path()).unwrap();
        assert_eq!(scores.load().unwrap(), 42);

        // when
        scores.record(50).unwrap();

        // then
        let store = LocalStateStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.get("theme").unwrap(), Some(Value::from("dark")));
        assert_eq!(store.get(HIGH_SCORE_KEY).unwrap(), Some(Value::from(50u64)));
    }

    #[test]
    fn load__non_object_file__is_an_error() {
        let temp_dir = TempDir::new("local_state_bad").unwrap();
        fs::write(temp_dir.path().join(STATE_FILE), b"[1,2,3]").unwrap();
        let scores = HighScoreStore::open(temp_dir.path()).unwrap();

        assert!(scores.load().is_err());
    }

    #[test]
    fn resolve_state_dir__explicit_path_is_used_verbatim() {
        assert_eq!(
            resolve_state_dir(Some("/tmp/arena")),
            PathBuf::from("/tmp/arena")
        );
    }
}
