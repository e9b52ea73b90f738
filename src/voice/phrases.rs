//! Control phrase matching

use crate::config::ConversationConfig;

/// What a transcript asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Shut the agent down
    Terminate,
    /// End the current conversation
    EndConversation,
    /// The wake phrase
    Wake,
    /// Anything else; goes to the chat model
    Utterance(String),
}

/// Wake, end and terminate phrases
#[derive(Debug, Clone)]
pub struct PhraseBook {
    wake: Vec<String>,
    end: Vec<String>,
    terminate: Vec<String>,
}

impl PhraseBook {
    /// Build from conversation settings
    #[must_use]
    pub fn new(config: &ConversationConfig) -> Self {
        Self {
            wake: normalize_all(&config.wake_phrases),
            end: normalize_all(&config.end_phrases),
            terminate: normalize_all(&config.terminate_phrases),
        }
    }

    /// Classify a transcript
    ///
    /// Matching is case-insensitive and ignores punctuation. Terminate wins
    /// over end, end over wake.
    #[must_use]
    pub fn classify(&self, transcript: &str) -> Intent {
        let text = normalize(transcript);

        if contains_any(&text, &self.terminate) {
            Intent::Terminate
        } else if contains_any(&text, &self.end) {
            Intent::EndConversation
        } else if contains_any(&text, &self.wake) {
            Intent::Wake
        } else {
            Intent::Utterance(transcript.trim().to_string())
        }
    }

    /// Whether the transcript holds a wake phrase
    #[must_use]
    pub fn is_wake(&self, transcript: &str) -> bool {
        contains_any(&normalize(transcript), &self.wake)
    }

    /// Whether the transcript holds an end or terminate phrase
    #[must_use]
    pub fn is_exit(&self, transcript: &str) -> bool {
        let text = normalize(transcript);
        contains_any(&text, &self.end) || contains_any(&text, &self.terminate)
    }
}

fn contains_any(text: &str, phrases: &[String]) -> bool {
    phrases.iter().any(|p| !p.is_empty() && text.contains(p.as_str()))
}

fn normalize_all(phrases: &[String]) -> Vec<String> {
    phrases.iter().map(|p| normalize(p)).collect()
}

/// Lowercase, strip punctuation, collapse whitespace
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
