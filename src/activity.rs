//! Agent activity logs: one append-only JSONL file per agent session.
//!
//! Every model call an agent makes while handling a message is recorded,
//! along with the decisions it took, so a run can be replayed afterwards.
//! A [`SessionLog`] owns its file: dropping it (normal return, `?`, panic
//! unwinding, or a cancelled task) flushes and closes the handle.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Pipeline stage a model call belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    RelevanceCheck,
    PromptGeneration,
    TweetGeneration,
    CringeCheck,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Prompt,
    Decision,
}

/// One line of a session log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub session_id: String,
    pub log_idx: u64,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: RecordKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub data: Value,
}

/// Hands out session logs for one agent.
#[derive(Clone, Debug)]
pub struct AgentLogger {
    dir: PathBuf,
}

impl AgentLogger {
    /// Logs go to `<log_dir>/<agent>/`; the directory is created up front.
    pub fn new(log_dir: &Path, agent_name: &str) -> Result<Self> {
        let dir = log_dir.join(file_safe(agent_name));
        fs::create_dir_all(&dir)
            .with_context(|| format!("create log directory {}", dir.display()))?;
        Ok(AgentLogger { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Open the log for one session. The file lives until the returned
    /// value is dropped or [`SessionLog::finish`]ed.
    pub fn session(&self, session_id: &str) -> Result<SessionLog> {
        let path = self.dir.join(format!("{}.jsonl", file_safe(session_id)));
        let file = File::create(&path)
            .with_context(|| format!("open session log {}", path.display()))?;
        Ok(SessionLog {
            session_id: session_id.to_string(),
            path,
            next_idx: 0,
            writer: Some(BufWriter::new(file)),
        })
    }
}

pub struct SessionLog {
    session_id: String,
    path: PathBuf,
    next_idx: u64,
    writer: Option<BufWriter<File>>,
}

impl SessionLog {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records written so far.
    pub fn len(&self) -> u64 {
        self.next_idx
    }

    /// Record one model call and its output.
    pub fn log_prompt(
        &mut self,
        stage: Stage,
        system: &str,
        prompt: &str,
        response: &str,
    ) -> Result<()> {
        self.append(
            RecordKind::Prompt,
            Some(stage),
            json!({"system": system, "prompt": prompt, "response": response}),
        )
    }

    /// Record a pipeline decision (`skip`, `respond`, `attempt`, `publish`, …).
    pub fn log_decision(&mut self, decision: &str, mut data: Value) -> Result<()> {
        if let Value::Object(map) = &mut data {
            map.insert("decision".to_string(), Value::String(decision.to_string()));
        } else {
            data = json!({"decision": decision, "detail": data});
        }
        self.append(RecordKind::Decision, None, data)
    }

    /// Flush and close the file, surfacing any I/O error.
    pub fn finish(mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .with_context(|| format!("flush session log {}", self.path.display()))?;
        }
        Ok(())
    }

    fn append(&mut self, kind: RecordKind, stage: Option<Stage>, data: Value) -> Result<()> {
        let record = LogRecord {
            session_id: self.session_id.clone(),
            log_idx: self.next_idx,
            timestamp: Local::now().to_rfc3339(),
            kind,
            stage,
            data,
        };
        let line = serde_json::to_string(&record).context("serialize log record")?;

        let writer = self
            .writer
            .as_mut()
            .with_context(|| format!("session log {} is closed", self.path.display()))?;
        writeln!(writer, "{line}")
            .and_then(|_| writer.flush())
            .with_context(|| format!("write session log {}", self.path.display()))?;
        self.next_idx += 1;
        Ok(())
    }
}

impl Drop for SessionLog {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
    }
}

/// Keep a name usable as a single path segment.
fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}
