//! Manuscript store boundary: exported sessions land here as entries.

use chrono::{DateTime, Local};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::Profile;
use crate::error::{LinkError, Result};
use crate::session::turns::{Speaker, Turn};

pub trait ManuscriptStore {
    fn append_entry(&mut self, title: &str, body: &str) -> Result<()>;
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ManuscriptEntry {
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Local>,
}

/// Appends entries to a JSON array on disk.
pub struct JsonManuscriptStore {
    path: PathBuf,
}

impl JsonManuscriptStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> Result<Vec<ManuscriptEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        if data.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&data).map_err(|e| {
            LinkError::Store(format!("{} is not a manuscript file: {}", self.path.display(), e))
        })
    }
}

impl ManuscriptStore for JsonManuscriptStore {
    fn append_entry(&mut self, title: &str, body: &str) -> Result<()> {
        // A corrupt file is refused rather than overwritten
        let mut entries = self.entries()?;
        entries.push(ManuscriptEntry {
            title: title.to_string(),
            body: body.to_string(),
            created_at: Local::now(),
        });

        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        info!("[Manuscript] Appended \"{}\" ({} entries)", title, entries.len());
        Ok(())
    }
}

pub fn session_title(at: DateTime<Local>) -> String {
    format!("Voice session {}", at.format("%Y-%m-%d %H:%M:%S"))
}

/// One line per turn, named by speaker.
pub fn format_history(turns: &[Turn], profile: &Profile) -> String {
    turns
        .iter()
        .map(|turn| {
            let name = match turn.speaker {
                Speaker::Author => &profile.author_name,
                Speaker::Agent => &profile.agent_name,
            };
            if turn.provisional {
                format!("{}: {} (unfinished)", name, turn.text)
            } else {
                format!("{}: {}", name, turn.text)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Write one entry for `turns`. Returns the title used, or `None` when there
/// was nothing to write.
pub fn export_session(
    store: &mut dyn ManuscriptStore,
    turns: &[Turn],
    profile: &Profile,
    at: DateTime<Local>,
) -> Result<Option<String>> {
    if turns.is_empty() {
        return Ok(None);
    }
    let title = session_title(at);
    store.append_entry(&title, &format_history(turns, profile))?;
    Ok(Some(title))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn turns() -> Vec<Turn> {
        vec![
            Turn {
                speaker: Speaker::Agent,
                text: "Where did it start?".into(),
                provisional: false,
            },
            Turn {
                speaker: Speaker::Author,
                text: "In the county".into(),
                provisional: true,
            },
        ]
    }

    #[test]
    fn history_lines_name_speakers_and_mark_unfinished() {
        let body = format_history(&turns(), &Profile::default());
        assert_eq!(
            body,
            "Scribe: Where did it start?\nAuthor: In the county (unfinished)"
        );
    }

    #[test]
    fn title_carries_local_timestamp() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        assert_eq!(session_title(at), "Voice session 2024-03-09 14:05:00");
    }

    #[test]
    fn checkpoint_in_the_same_minute_gets_its_own_title() {
        let started = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 3).unwrap();
        let checkpoint = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 41).unwrap();
        assert_ne!(session_title(started), session_title(checkpoint));
    }

    #[test]
    fn json_store_appends_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonManuscriptStore::new(dir.path().join("data").join("manuscript.json"));
        store.append_entry("one", "a").unwrap();
        store.append_entry("two", "b").unwrap();

        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "one");
        assert_eq!(entries[1].body, "b");
    }

    #[test]
    fn json_store_refuses_to_clobber_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manuscript.json");
        std::fs::write(&path, "{\"not\": \"a list\"}").unwrap();
        let mut store = JsonManuscriptStore::new(&path);
        assert!(matches!(store.append_entry("t", "b"), Err(LinkError::Store(_))));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"not\": \"a list\"}");
    }

    #[test]
    fn empty_history_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonManuscriptStore::new(dir.path().join("manuscript.json"));
        let title = export_session(&mut store, &[], &Profile::default(), Local::now()).unwrap();
        assert!(title.is_none());
        assert!(!store.path().exists());

        let title = export_session(&mut store, &turns(), &Profile::default(), Local::now())
            .unwrap();
        assert!(title.unwrap().starts_with("Voice session "));
        assert_eq!(store.entries().unwrap().len(), 1);
    }
}
