//! Runs one agent task per personality of a profile set.
//!
//! Agents share nothing except the feed and the model-call limiter. Each
//! gets a child of the orchestrator's cancellation token, so [`stop`]
//! winds them all down together.
//!
//! [`stop`]: Orchestrator::stop

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::activity::AgentLogger;
use crate::agent::Agent;
use crate::bus::{Feed, Message, MessageBus};
use crate::config::Config;
use crate::constants::MAX_SHUTDOWN_GRACE_SECS;
use crate::openai::{LanguageModel, Throttled};
use crate::personality::ProfileSet;

pub struct Orchestrator {
    config: Config,
    profile_set: String,
    model: Arc<dyn LanguageModel>,
    feed: Feed,
    cancel: CancellationToken,
    agents: HashMap<String, JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
    started: bool,
}

impl Orchestrator {
    /// `model` is wrapped so that at most `config.max_concurrent_calls`
    /// calls are in flight across every agent.
    pub fn new(
        config: Config,
        profile_set: impl Into<String>,
        model: Arc<dyn LanguageModel>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        let model: Arc<dyn LanguageModel> =
            Arc::new(Throttled::new(model, config.max_concurrent_calls));
        let feed = Feed::new(bus, config.bus.topic.clone());
        Orchestrator {
            config,
            profile_set: profile_set.into(),
            model,
            feed,
            cancel: CancellationToken::new(),
            agents: HashMap::new(),
            monitor: None,
            started: false,
        }
    }

    /// Load the profile set and spawn an agent for every valid
    /// personality. Returns how many agents are running.
    pub async fn start(&mut self) -> Result<usize> {
        if self.started {
            bail!("simulation already started");
        }
        let set = ProfileSet::open(&self.config.profiles_dir, &self.profile_set)?;
        self.started = true;

        let log_dir = self.config.session_log_dir();
        for (path, loaded) in set.load_all()? {
            let personality = match loaded {
                Ok(personality) => personality,
                Err(err) => {
                    error!(path = %path.display(), "skipping personality: {err}");
                    continue;
                }
            };
            let name = personality.name.clone();
            let logger = match AgentLogger::new(&log_dir, &name) {
                Ok(logger) => logger,
                Err(err) => {
                    error!(agent = %name, "skipping agent: {err:#}");
                    continue;
                }
            };

            // Subscribe before spawning so nothing posted after `start`
            // returns is missed.
            let subscription = self.feed.subscribe().await?;
            let mut agent = Agent::new(
                personality,
                self.model.clone(),
                self.feed.clone(),
                logger,
                &self.config.cringe,
            );
            if let Some(timeout) = self.config.receive_timeout {
                agent = agent.with_receive_timeout(timeout);
            }
            let cancel = self.cancel.child_token();
            let handle = tokio::spawn(async move { agent.run(subscription, cancel).await });
            self.agents.insert(name, handle);
        }

        let started = self.agents.len();
        if started != set.metadata.num_agents {
            warn!(
                expected = set.metadata.num_agents,
                started, "profile set metadata disagrees with the agents started"
            );
        }
        info!(
            profile_set = %set.id,
            topic = self.feed.topic(),
            simulation = %self.config.simulation_id,
            agents = started,
            "simulation started"
        );
        Ok(started)
    }

    /// Echo every message on the feed to the log until the simulation stops.
    pub async fn watch_feed(&mut self) -> Result<()> {
        if self.monitor.is_some() {
            return Ok(());
        }
        let mut subscription = self.feed.subscribe().await?;
        let cancel = self.cancel.child_token();
        self.monitor = Some(tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = subscription.next(None) => next,
                };
                let Some(payload) = next else { break };
                match Message::from_payload(&payload) {
                    Ok(message) => info!(author = %message.author, "{}", message.content),
                    Err(err) => warn!("unreadable message on the feed: {err:#}"),
                }
            }
        }));
        Ok(())
    }

    /// Post a message into the running simulation.
    pub async fn inject(&self, author: &str, content: &str) -> Result<usize> {
        self.feed.post(author, content).await
    }

    /// Names of the running agents, sorted.
    pub fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn running(&self) -> usize {
        self.agents.len()
    }

    /// Cancel every agent, wait up to the shutdown grace period, then abort
    /// whatever is still running. No agent task outlives this call.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        let now = Instant::now();
        let deadline = now
            .checked_add(self.config.shutdown_grace)
            .unwrap_or_else(|| now + Duration::from_secs(MAX_SHUTDOWN_GRACE_SECS));

        let mut aborted = 0;
        for (name, mut handle) in self.agents.drain() {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) if err.is_panic() => error!(agent = %name, "agent task panicked"),
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!(agent = %name, "agent did not stop in time, aborting");
                    handle.abort();
                    let _ = handle.await;
                    aborted += 1;
                }
            }
        }
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
            let _ = monitor.await;
        }
        info!(aborted, "simulation stopped");
    }
}
