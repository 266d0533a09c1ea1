//! Prompt templates for every model call an agent makes, plus the parser
//! for the relevance reply.

use crate::agent::Attempt;
use crate::bus::Message;
use crate::personality::{Interests, Personality};

// ── Relevance ────────────────────────────────────────────────────────

pub const RELEVANCE_SYSTEM: &str =
    "You must respond with either 'YES: <explanation>' or 'NO: <explanation>'";

pub fn relevance_prompt(content: &str, interests: &Interests) -> String {
    format!(
        "Given this tweet: \"{content}\"\n\n\
         You are an AI with the following interests:\n\
         {interests}\n\n\
         Determine if this tweet is relevant to your interests. Think step by step:\n\
         1. What is the main topic of the tweet?\n\
         2. Does it relate to any of your interests?\n\
         3. How strongly does it align with your interests?\n\n\
         Respond with either YES or NO, followed by a brief explanation.",
        interests = interests.describe(),
    )
}

/// Decision parsed from a relevance reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relevance {
    pub relevant: bool,
    pub rationale: String,
}

/// Parse a `YES: …` / `NO: …` reply. Only a reply whose first word is
/// `yes` counts as relevant; anything else, including empty or hedged
/// replies, is treated as not relevant.
pub fn parse_relevance(reply: &str) -> Relevance {
    let trimmed = reply.trim();
    let first_word: String = trimmed
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .chars()
        .take_while(|c| c.is_alphanumeric())
        .collect();
    let relevant = first_word.eq_ignore_ascii_case("yes");

    let rationale = match trimmed.split_once(':') {
        Some((_, rest)) => rest.trim(),
        None => trimmed,
    };

    Relevance {
        relevant,
        rationale: rationale.to_string(),
    }
}

// ── Drafting ─────────────────────────────────────────────────────────

pub const PROMPT_GENERATION_SYSTEM: &str = "You design prompts for a writer who voices a social \
     media persona. Think about the tweet, the persona and any earlier attempts, then output only \
     the prompt the writer should follow.";

/// First drafting stage: ask for a prompt tailored to this persona, this
/// message and everything tried so far.
pub fn prompt_generation_prompt(
    personality: &Personality,
    message: &Message,
    history: &[Attempt],
) -> String {
    let mut prompt = format!(
        "Given this tweet by @{author}: \"{content}\"\n\n\
         You are writing for an AI with the following personality:\n\
         {profile}\n\
         Write a prompt that makes a writer reply to the tweet as {name}. \
         The reply must match the traits, mood, quirks and speech pattern above, \
         stay tweet-length, and be the kind of post that gets lots of engagement.",
        author = message.author,
        content = message.content,
        profile = personality.to_yaml(),
        name = personality.name,
    );

    if !history.is_empty() {
        prompt.push_str(
            "\n\nEarlier attempts were rejected as too cringe. \
             Learn from them and steer the writer away from what went wrong:\n",
        );
        prompt.push_str(&render_history(history));
    }
    prompt
}

pub const TWEET_GENERATION_SYSTEM: &str =
    "Generate a tweet response. Output only the tweet text, without quotes or commentary.";

/// Render the attempt history as numbered blocks.
pub fn render_history(history: &[Attempt]) -> String {
    history
        .iter()
        .enumerate()
        .map(|(i, attempt)| {
            format!(
                "Attempt {n}:\nPrompt: {prompt}\nResponse: {response}\nCringe score: {score:.2}\nReason: {reason}\n",
                n = i + 1,
                prompt = attempt.prompt,
                response = attempt.response,
                score = attempt.cringe_score,
                reason = attempt.cringe_reason,
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Cringe filter ────────────────────────────────────────────────────

pub fn cringe_prompt(tweet: &str) -> String {
    format!(
        "Rate this tweet on level of cringeness, from 0 to 1 and provide a concise reason as to why:\n\n{tweet}"
    )
}
