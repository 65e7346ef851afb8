use serde::{Deserialize, Serialize};

const STOPWORDS: &[&str] = &["and", "the", "with", "from", "that", "this", "others", "into"];

/// The persona's declared interests, matched case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Interests {
    topics: Vec<Topic>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Topic {
    phrase: String,
    keywords: Vec<String>,
}

impl Interests {
    pub fn new<I, S>(interests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let topics = interests
            .into_iter()
            .map(|s| s.as_ref().trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .map(|phrase| {
                let keywords = words(&phrase)
                    .filter(|w| w.len() >= 3 && !STOPWORDS.contains(w))
                    .map(String::from)
                    .collect();
                Topic { phrase, keywords }
            })
            .collect();
        Self { topics }
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// How many interests the text touches. An interest counts when its whole
    /// phrase appears, or any of its keywords appears as a word.
    pub fn matches(&self, text: &str) -> usize {
        let lowered = text.to_lowercase();
        let text_words: Vec<&str> = words(&lowered).collect();
        self.topics
            .iter()
            .filter(|topic| {
                lowered.contains(&topic.phrase)
                    || topic.keywords.iter().any(|k| text_words.contains(&k.as_str()))
            })
            .count()
    }

    pub fn is_relevant(&self, text: &str) -> bool {
        self.matches(text) > 0
    }

    /// 0.0 when nothing matches, otherwise 0.5 plus 0.25 per matched interest, capped at 1.0.
    pub fn score(&self, text: &str) -> f64 {
        match self.matches(text) {
            0 => 0.0,
            n => (0.5 + 0.25 * n as f64).min(1.0),
        }
    }
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|w| !w.is_empty())
}
