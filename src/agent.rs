//! One simulated personality and the pipeline it runs for every message.
//!
//! For each message on the feed an agent:
//!
//! 1. drops its own posts without calling the model,
//! 2. asks the model whether the message touches its interests,
//! 3. drafts a reply in two calls (a tailored drafting prompt, then the
//!    tweet itself), optionally re-drafting while the cringe filter rejects
//!    the result,
//! 4. posts the final text back to the feed.
//!
//! Every model call and decision for one message lands in that message's
//! session log.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::activity::{AgentLogger, SessionLog, Stage};
use crate::bus::{Feed, Message, Subscription};
use crate::config::CringeSettings;
use crate::constants::TWEET_MAX_OUTPUT_TOKENS;
use crate::cringe::QualityGate;
use crate::openai::{Completion, LanguageModel};
use crate::personality::Personality;
use crate::prompts::{
    PROMPT_GENERATION_SYSTEM, RELEVANCE_SYSTEM, TWEET_GENERATION_SYSTEM, cringe_prompt,
    parse_relevance, prompt_generation_prompt, relevance_prompt,
};
use crate::util::sanitize_text;

/// One rejected draft, fed back into the next drafting prompt.
#[derive(Clone, Debug, PartialEq)]
pub struct Attempt {
    pub prompt: String,
    pub response: String,
    pub cringe_score: f64,
    pub cringe_reason: String,
}

/// What happened to one message.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Discarded(Discard),
    Published {
        text: String,
        attempts: usize,
        delivered: usize,
    },
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Discard {
    SelfAuthored,
    /// Carries the model's rationale.
    Irrelevant(String),
}

struct Draft {
    text: String,
    attempts: usize,
}

pub struct Agent {
    personality: Personality,
    model: Arc<dyn LanguageModel>,
    gate: Option<QualityGate>,
    max_attempts: usize,
    feed: Feed,
    logger: AgentLogger,
    receive_timeout: Option<Duration>,
}

impl Agent {
    pub fn new(
        personality: Personality,
        model: Arc<dyn LanguageModel>,
        feed: Feed,
        logger: AgentLogger,
        cringe: &CringeSettings,
    ) -> Self {
        let gate = cringe
            .enabled
            .then(|| QualityGate::new(model.clone(), cringe.threshold));
        Agent {
            personality,
            model,
            gate,
            max_attempts: cringe.attempt_budget(),
            feed,
            logger,
            receive_timeout: None,
        }
    }

    /// Stop listening once no message arrives for `timeout`.
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.personality.name
    }

    /// Consume the feed until it closes, times out, or `cancel` fires.
    /// A message that fails is logged and skipped.
    pub async fn run(&self, mut subscription: Box<dyn Subscription>, cancel: CancellationToken) {
        info!(agent = %self.name(), logs = %self.logger.dir().display(), "listening");
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = subscription.next(self.receive_timeout) => next,
            };
            let Some(payload) = next else {
                debug!(agent = %self.name(), "feed ended");
                break;
            };

            match self.handle_payload(&payload, &cancel).await {
                Ok(Outcome::Cancelled) => break,
                Ok(outcome) => debug!(agent = %self.name(), ?outcome, "message handled"),
                Err(err) => error!(agent = %self.name(), "failed to process message: {err:#}"),
            }
        }
        info!(agent = %self.name(), "stopped");
    }

    async fn handle_payload(&self, payload: &[u8], cancel: &CancellationToken) -> Result<Outcome> {
        let message = Message::from_payload(payload)?;
        self.process_message(&message, cancel).await
    }

    /// Run the full pipeline for one message.
    pub async fn process_message(
        &self,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        if message.author == self.personality.name {
            return Ok(Outcome::Discarded(Discard::SelfAuthored));
        }

        let session_id = Uuid::new_v4().to_string();
        let mut log = self.logger.session(&session_id)?;
        let outcome = self.respond(message, &mut log, cancel).await;
        let closing = match &outcome {
            Ok(Outcome::Cancelled) => Some(log.log_decision("cancelled", json!({}))),
            Err(err) => Some(log.log_decision("error", json!({"error": format!("{err:#}")}))),
            Ok(_) => None,
        };
        if let Some(Err(log_err)) = closing {
            warn!(
                agent = %self.name(),
                session = %session_id,
                "session log write failed: {log_err:#}"
            );
        }
        debug!(
            agent = %self.name(),
            session = log.session_id(),
            records = log.len(),
            path = %log.path().display(),
            "session closed"
        );
        log.finish()?;
        outcome
    }

    async fn respond(
        &self,
        message: &Message,
        log: &mut SessionLog,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let prompt = relevance_prompt(&message.content, &self.personality.interests);
        let Some(reply) = unless_cancelled(
            cancel,
            self.model.complete(Completion::new(RELEVANCE_SYSTEM, &prompt)),
        )
        .await
        .context("relevance check")?
        else {
            return Ok(Outcome::Cancelled);
        };
        log.log_prompt(Stage::RelevanceCheck, RELEVANCE_SYSTEM, &prompt, &reply)?;

        let relevance = parse_relevance(&reply);
        if !relevance.relevant {
            log.log_decision("skip", json!({"rationale": relevance.rationale}))?;
            debug!(agent = %self.name(), author = %message.author, "not relevant");
            return Ok(Outcome::Discarded(Discard::Irrelevant(relevance.rationale)));
        }
        log.log_decision("respond", json!({"rationale": relevance.rationale}))?;

        let Some(draft) = self.draft(message, log, cancel).await? else {
            return Ok(Outcome::Cancelled);
        };
        let text = sanitize_text(&draft.text);
        if text.trim().is_empty() {
            bail!("final draft is empty after sanitizing");
        }
        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        let delivered = self.feed.post(&self.personality.name, &text).await?;
        log.log_decision(
            "publish",
            json!({"text": text, "attempts": draft.attempts, "delivered": delivered}),
        )?;
        info!(
            agent = %self.name(),
            replying_to = %message.author,
            attempts = draft.attempts,
            "posted reply"
        );
        Ok(Outcome::Published {
            text,
            attempts: draft.attempts,
            delivered,
        })
    }

    /// Draft until the gate passes a reply or the budget runs out. `None`
    /// means the agent was cancelled mid-way.
    async fn draft(
        &self,
        message: &Message,
        log: &mut SessionLog,
        cancel: &CancellationToken,
    ) -> Result<Option<Draft>> {
        let mut history: Vec<Attempt> = Vec::new();

        for attempt in 1..=self.max_attempts {
            let request = prompt_generation_prompt(&self.personality, message, &history);
            let Some(drafting_prompt) = unless_cancelled(
                cancel,
                self.model
                    .complete(Completion::new(PROMPT_GENERATION_SYSTEM, &request)),
            )
            .await
            .context("prompt generation")?
            else {
                return Ok(None);
            };
            log.log_prompt(
                Stage::PromptGeneration,
                PROMPT_GENERATION_SYSTEM,
                &request,
                &drafting_prompt,
            )?;

            let Some(tweet) = unless_cancelled(
                cancel,
                self.model.complete(
                    Completion::new(TWEET_GENERATION_SYSTEM, &drafting_prompt)
                        .max_output_tokens(TWEET_MAX_OUTPUT_TOKENS),
                ),
            )
            .await
            .context("tweet generation")?
            else {
                return Ok(None);
            };
            log.log_prompt(
                Stage::TweetGeneration,
                TWEET_GENERATION_SYSTEM,
                &drafting_prompt,
                &tweet,
            )?;
            if tweet.trim().is_empty() {
                bail!("tweet generation returned no text");
            }

            let Some(gate) = &self.gate else {
                return Ok(Some(Draft {
                    text: tweet,
                    attempts: attempt,
                }));
            };

            let Some(verdict) = unless_cancelled(cancel, gate.evaluate(&tweet)).await? else {
                return Ok(None);
            };
            log.log_prompt(
                Stage::CringeCheck,
                "",
                &cringe_prompt(&tweet),
                &json!({"score": verdict.score, "reason": verdict.reason}).to_string(),
            )?;
            log.log_decision(
                "attempt",
                json!({
                    "attempt": attempt,
                    "score": verdict.score,
                    "threshold": gate.threshold(),
                    "rejected": verdict.rejected,
                }),
            )?;

            if !verdict.rejected {
                return Ok(Some(Draft {
                    text: tweet,
                    attempts: attempt,
                }));
            }
            debug!(agent = %self.name(), attempt, score = verdict.score, "draft rejected");
            history.push(Attempt {
                prompt: drafting_prompt,
                response: tweet,
                cringe_score: verdict.score,
                cringe_reason: verdict.reason,
            });
        }

        let best = select_least_cringe(&history).context("no drafting attempt was made")?;
        let chosen = &history[best];
        warn!(
            agent = %self.name(),
            attempts = history.len(),
            score = chosen.cringe_score,
            "attempt budget exhausted, posting least cringe draft"
        );
        log.log_decision(
            "budget_exhausted",
            json!({"chosen_attempt": best + 1, "score": chosen.cringe_score}),
        )?;
        Ok(Some(Draft {
            text: chosen.response.clone(),
            attempts: history.len(),
        }))
    }
}

/// Index of the attempt with the lowest score; the earliest wins a tie.
pub fn select_least_cringe(history: &[Attempt]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, attempt) in history.iter().enumerate() {
        match best {
            Some(b) if history[b].cringe_score <= attempt.cringe_score => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Await `call` unless `cancel` fires first. `Ok(None)` means cancelled.
async fn unless_cancelled<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = Result<T>>,
) -> Result<Option<T>> {
    if cancel.is_cancelled() {
        return Ok(None);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(None),
        result = call => result.map(Some),
    }
}
