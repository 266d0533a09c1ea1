//! Fixtures and fakes shared by the unit tests.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Notify;

use crate::activity::LogRecord;
use crate::constants::PROFILE_METADATA_FILE;
use crate::openai::{Completion, LanguageModel, Schema};
use crate::personality::{Interests, Personality, ProfileMetadata};
use crate::prompts::{PROMPT_GENERATION_SYSTEM, RELEVANCE_SYSTEM, TWEET_GENERATION_SYSTEM};

pub fn sample_personality(name: &str) -> Personality {
    Personality {
        name: name.to_string(),
        traits: vec!["meticulous".to_string(), "dramatic".to_string()],
        mood: "restless".to_string(),
        interests: Interests {
            primary_topics: vec!["antique door hinges".to_string()],
            key_figures: vec!["Joseph Bramah".to_string()],
            specific_focus: "the decline of the cast iron butt hinge".to_string(),
        },
        quirks: vec!["oils everything".to_string()],
        speech_pattern: "Speaks like a film noir detective".to_string(),
    }
}

/// Write a profile set with metadata under `root/id` and return its path.
pub fn write_profile_set(root: &Path, id: &str, personalities: &[Personality]) -> PathBuf {
    let dir = root.join(id);
    fs::create_dir_all(&dir).unwrap();
    for personality in personalities {
        let file = dir.join(format!("{}.yaml", personality.name.replace(' ', "_")));
        fs::write(file, serde_yaml::to_string(personality).unwrap()).unwrap();
    }
    let metadata = ProfileMetadata {
        num_agents: personalities.len(),
        field_of_focus: None,
        profile_generation_session_id: Some(id.to_string()),
        personalities: personalities.iter().map(|p| p.name.clone()).collect(),
    };
    fs::write(
        dir.join(PROFILE_METADATA_FILE),
        serde_yaml::to_string(&metadata).unwrap(),
    )
    .unwrap();
    dir
}

/// Read a session log back, one record per line.
pub fn read_records(path: &Path) -> Vec<LogRecord> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// Which stage a recorded call belonged to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallKind {
    Relevance,
    PromptGeneration,
    TweetGeneration,
    Structured,
    Other,
}

/// A language model that answers from scripts and records every call.
///
/// Calls are routed by their system instructions: relevance replies come
/// from a queue (falling back to a default), drafting prompts are numbered,
/// tweets come from a queue (falling back to `tweet #n`), and structured
/// calls pop cringe scores.
pub struct ScriptedModel {
    default_relevance: String,
    hang_tweets: bool,
    tweet_started: Notify,
    relevance: Mutex<VecDeque<Result<String, String>>>,
    tweets: Mutex<VecDeque<String>>,
    scores: Mutex<VecDeque<Value>>,
    calls: Mutex<Vec<(CallKind, String)>>,
}

impl ScriptedModel {
    fn answering(relevance: &str) -> Self {
        ScriptedModel {
            default_relevance: relevance.to_string(),
            hang_tweets: false,
            tweet_started: Notify::new(),
            relevance: Mutex::new(VecDeque::new()),
            tweets: Mutex::new(VecDeque::new()),
            scores: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every relevance check says yes.
    pub fn relevant() -> Self {
        Self::answering("YES: right up my alley")
    }

    /// Every relevance check says no with `reason`.
    pub fn irrelevant(reason: &str) -> Self {
        Self::answering(&format!("NO: {reason}"))
    }

    /// The next relevance check fails with a transport-style error.
    pub fn failing_relevance_once(self, error: &str) -> Self {
        self.relevance
            .lock()
            .unwrap()
            .push_back(Err(error.to_string()));
        self
    }

    /// Tweet generation never returns; callers can wait for it to begin
    /// with [`ScriptedModel::tweet_started`].
    pub fn hanging_tweets(mut self) -> Self {
        self.hang_tweets = true;
        self
    }

    pub async fn tweet_started(&self) {
        self.tweet_started.notified().await;
    }

    pub fn with_tweets<const N: usize>(self, tweets: [&str; N]) -> Self {
        self.tweets
            .lock()
            .unwrap()
            .extend(tweets.iter().map(|t| t.to_string()));
        self
    }

    pub fn with_scores<const N: usize>(self, scores: [f64; N]) -> Self {
        self.scores.lock().unwrap().extend(
            scores
                .iter()
                .map(|score| json!({"score": score, "reason": format!("scored {score}")})),
        );
        self
    }

    pub fn with_raw_scores<const N: usize>(self, replies: [Value; N]) -> Self {
        self.scores.lock().unwrap().extend(replies);
        self
    }

    pub fn count(&self, kind: CallKind) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn prompts(&self, kind: CallKind) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }

    fn record(&self, kind: CallKind, prompt: &str) -> usize {
        let mut calls = self.calls.lock().unwrap();
        calls.push((kind, prompt.to_string()));
        calls.iter().filter(|(k, _)| *k == kind).count()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: Completion<'_>) -> Result<String> {
        let kind = match request.system {
            RELEVANCE_SYSTEM => CallKind::Relevance,
            PROMPT_GENERATION_SYSTEM => CallKind::PromptGeneration,
            TWEET_GENERATION_SYSTEM => CallKind::TweetGeneration,
            _ => CallKind::Other,
        };
        let n = self.record(kind, request.prompt);

        match kind {
            CallKind::Relevance => match self.relevance.lock().unwrap().pop_front() {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(error)) => Err(anyhow!(error)),
                None => Ok(self.default_relevance.clone()),
            },
            CallKind::PromptGeneration => Ok(format!("drafting prompt #{n}")),
            CallKind::TweetGeneration if self.hang_tweets => {
                self.tweet_started.notify_one();
                std::future::pending().await
            }
            CallKind::TweetGeneration => Ok(self
                .tweets
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| format!("tweet #{n}"))),
            _ => Err(anyhow!("unexpected completion call")),
        }
    }

    async fn complete_structured(&self, prompt: &str, _schema: &Schema) -> Result<Value> {
        self.record(CallKind::Structured, prompt);
        self.scores
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted cringe score left"))
    }
}
