//! Lexicon sentiment scoring for inbound messages.
//!
//! Scored independently of intent; the orchestrator forces an automatic
//! escalation when the score drops below its threshold.

/// Scores text into [-1, 1]; below `ESCALATION_THRESHOLD` the conversation
/// is handed to a human regardless of which path produced the reply.
pub trait SentimentAnalyzer: Send + Sync {
    fn score(&self, text: &str) -> f64;
}

pub const ESCALATION_THRESHOLD: f64 = -0.7;

const NEGATIVE: &[&str] = &[
    "angry", "awful", "broken", "cancel", "complaint", "disappointed", "fraud", "furious",
    "hate", "horrible", "never", "refund", "scam", "terrible", "unacceptable", "useless",
    "worst", "wrong",
    // Spanish
    "enojado", "estafa", "fatal", "fraude", "furioso", "horrible", "inaceptable", "malo",
    "molesto", "nunca", "pesimo", "queja", "reembolso", "roto", "terrible",
];

const POSITIVE: &[&str] = &[
    "amazing", "excellent", "good", "great", "happy", "love", "perfect", "thanks", "thank",
    "wonderful",
    // Spanish
    "bueno", "excelente", "feliz", "genial", "gracias", "increible", "perfecto",
];

#[derive(Clone, Debug, Default)]
pub struct LexiconSentimentAnalyzer;

impl LexiconSentimentAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl SentimentAnalyzer for LexiconSentimentAnalyzer {
    fn score(&self, text: &str) -> f64 {
        let mut positive = 0u32;
        let mut negative = 0u32;

        for token in tokenize(text) {
            if NEGATIVE.contains(&token.as_str()) {
                negative += 1;
            } else if POSITIVE.contains(&token.as_str()) {
                positive += 1;
            }
        }

        let total = positive + negative;
        if total == 0 {
            return 0.0;
        }
        (f64::from(positive) - f64::from(negative)) / f64::from(total)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(strip_accents)
        .collect()
}

fn strip_accents(token: &str) -> String {
    token
        .chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' | 'ü' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}
