//! Personality records and the on-disk profile sets that hold them.
//!
//! A profile set is a directory with one YAML file per personality plus a
//! metadata file. Records are validated when loaded so a malformed profile
//! fails with a field name instead of deep inside prompt formatting.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{LEGACY_METADATA_FILE, PROFILE_METADATA_FILE};
use crate::util::sanitize_text;

// ── Records ──────────────────────────────────────────────────────────

/// Behavioural profile of one agent. Read-only once loaded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Personality {
    pub name: String,
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub mood: String,
    pub interests: Interests,
    #[serde(default)]
    pub quirks: Vec<String>,
    #[serde(default)]
    pub speech_pattern: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interests {
    #[serde(default)]
    pub primary_topics: Vec<String>,
    #[serde(default)]
    pub key_figures: Vec<String>,
    #[serde(default)]
    pub specific_focus: String,
}

/// Metadata written alongside a profile set when it is generated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    pub num_agents: usize,
    #[serde(default)]
    pub field_of_focus: Option<String>,
    #[serde(default)]
    pub profile_generation_session_id: Option<String>,
    #[serde(default)]
    pub personalities: Vec<String>,
}

#[derive(Debug, Error)]
pub enum PersonalityError {
    #[error("read personality {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse personality {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("personality {name:?}: `{field}` {problem}")]
    Invalid {
        name: String,
        field: &'static str,
        problem: &'static str,
    },
    #[error("personality name {name:?} is already used by {first}")]
    DuplicateName { name: String, first: PathBuf },
}

impl Personality {
    /// Check the shape the prompts rely on.
    pub fn validate(&self) -> Result<(), PersonalityError> {
        let invalid = |field, problem| PersonalityError::Invalid {
            name: self.name.clone(),
            field,
            problem,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name", "must not be blank"));
        }
        // The name is the author of every post; it must survive the bus codec.
        if sanitize_text(&self.name) != self.name {
            return Err(invalid("name", "contains control or replacement characters"));
        }
        if self.mood.trim().is_empty() {
            return Err(invalid("mood", "must not be blank"));
        }
        if self.speech_pattern.trim().is_empty() {
            return Err(invalid("speech_pattern", "must not be blank"));
        }
        if self.interests.specific_focus.trim().is_empty() {
            return Err(invalid("interests.specific_focus", "must not be blank"));
        }
        if self.traits.is_empty() {
            return Err(invalid("traits", "must list at least one trait"));
        }
        if self.interests.primary_topics.is_empty() {
            return Err(invalid("interests.primary_topics", "must list at least one topic"));
        }

        let lists: [(&'static str, &[String]); 4] = [
            ("traits", &self.traits),
            ("quirks", &self.quirks),
            ("interests.primary_topics", &self.interests.primary_topics),
            ("interests.key_figures", &self.interests.key_figures),
        ];
        for (field, entries) in lists {
            if entries.iter().any(|entry| entry.trim().is_empty()) {
                return Err(invalid(field, "contains a blank entry"));
            }
        }
        Ok(())
    }

    /// YAML rendering used when a prompt needs the whole profile.
    pub fn to_yaml(&self) -> String {
        serde_yaml::to_string(self).unwrap_or_else(|_| format!("name: {}", self.name))
    }
}

impl Interests {
    /// Compact multi-line rendering for the relevance prompt.
    pub fn describe(&self) -> String {
        let mut lines = vec![format!("Primary topics: {}", self.primary_topics.join(", "))];
        if !self.key_figures.is_empty() {
            lines.push(format!("Key figures: {}", self.key_figures.join(", ")));
        }
        lines.push(format!("Specific focus: {}", self.specific_focus));
        lines.join("\n")
    }
}

/// Load and validate one personality file.
pub fn load_personality(path: &Path) -> Result<Personality, PersonalityError> {
    let contents = fs::read_to_string(path).map_err(|source| PersonalityError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let personality: Personality =
        serde_yaml::from_str(&contents).map_err(|source| PersonalityError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    personality.validate()?;
    Ok(personality)
}

// ── Profile sets ─────────────────────────────────────────────────────

/// One generated set of personalities on disk.
#[derive(Clone, Debug)]
pub struct ProfileSet {
    pub id: String,
    pub dir: PathBuf,
    pub metadata: ProfileMetadata,
}

impl ProfileSet {
    /// Open `<profiles_dir>/<id>` and read its metadata.
    pub fn open(profiles_dir: &Path, id: &str) -> Result<Self> {
        let dir = profiles_dir.join(id);
        if !dir.is_dir() {
            bail!("profile set {id:?} not found at {}", dir.display());
        }

        let metadata_path = [PROFILE_METADATA_FILE, LEGACY_METADATA_FILE]
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
            .with_context(|| format!("no metadata file in {}", dir.display()))?;
        let contents = fs::read_to_string(&metadata_path)
            .with_context(|| format!("read {}", metadata_path.display()))?;
        let metadata: ProfileMetadata = serde_yaml::from_str(&contents)
            .with_context(|| format!("parse {}", metadata_path.display()))?;

        Ok(ProfileSet {
            id: id.to_string(),
            dir,
            metadata,
        })
    }

    /// Every personality file in the set, sorted by file name. Metadata
    /// files and anything that is not YAML are skipped.
    pub fn personality_files(&self) -> Result<Vec<PathBuf>> {
        let entries =
            fs::read_dir(&self.dir).with_context(|| format!("list {}", self.dir.display()))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry.with_context(|| format!("list {}", self.dir.display()))?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if file_name == PROFILE_METADATA_FILE || file_name == LEGACY_METADATA_FILE {
                continue;
            }
            let is_yaml = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            );
            if is_yaml && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Load every personality, pairing each file with its outcome. A name
    /// seen before in the same set is reported as a duplicate.
    pub fn load_all(&self) -> Result<Vec<(PathBuf, Result<Personality, PersonalityError>)>> {
        let mut first_seen: HashMap<String, PathBuf> = HashMap::new();
        let mut loaded = Vec::new();

        for path in self.personality_files()? {
            let outcome = load_personality(&path).and_then(|personality| {
                if let Some(first) = first_seen.get(&personality.name) {
                    return Err(PersonalityError::DuplicateName {
                        name: personality.name,
                        first: first.clone(),
                    });
                }
                first_seen.insert(personality.name.clone(), path.clone());
                Ok(personality)
            });
            loaded.push((path, outcome));
        }
        Ok(loaded)
    }
}
