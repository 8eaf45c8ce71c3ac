//! Prompt classification.
//!
//! [`RuleClassifier`] is a deterministic, pure function of the prompt text:
//! keyword presence picks the intent type (fixed precedence), length
//! thresholds pick complexity, and keyword triggers add capability features.
//! It never fails — any input, including the empty string, yields a usable
//! [`ClassifiedIntent`].
//!
//! The [`Classifier`] trait is the seam: an ML- or LLM-backed implementation
//! can be swapped in as long as it produces the same output schema.

use serde::{Deserialize, Serialize};

use crate::types::estimate_tokens;

/// Intent type, ordered by detection precedence (code wins over creative,
/// creative over analytical, and so on down to general).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentType {
    General,
    Code,
    Creative,
    Factual,
    Analytical,
    Mathematical,
    Conversational,
}

impl IntentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Code => "code",
            Self::Creative => "creative",
            Self::Factual => "factual",
            Self::Analytical => "analytical",
            Self::Mathematical => "mathematical",
            Self::Conversational => "conversational",
        }
    }
}

/// Prompt complexity bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
    VeryComplex,
}

impl Complexity {
    fn bump(self) -> Self {
        match self {
            Self::Simple => Self::Medium,
            Self::Medium => Self::Complex,
            Self::Complex | Self::VeryComplex => Self::VeryComplex,
        }
    }
}

/// Routing priority derived from complexity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// Token estimates attached to a classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TokenEstimate {
    pub estimated: u32,
    pub completion: u32,
}

/// The feature vector that drives routing and cache TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedIntent {
    #[serde(rename = "type")]
    pub intent: IntentType,
    pub complexity: Complexity,
    /// Capability tags; always contains `text-generation`.
    pub features: Vec<String>,
    pub priority: Priority,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub tokens: TokenEstimate,
}

/// Classification seam. Implementations must be total: every prompt maps to
/// an intent, no errors.
pub trait Classifier: Send + Sync {
    fn classify(&self, prompt: &str) -> ClassifiedIntent;
}

/// Keyword- and length-driven classifier.
pub struct RuleClassifier;

const CODE_KEYWORDS: &[&str] = &[
    "code", "function", "program", "script", "algorithm", "compile", "debug", "bug",
    "implement", "refactor", "class ", "api", "regex", "sql", "python", "javascript", "rust",
];
const CREATIVE_KEYWORDS: &[&str] = &[
    "story", "poem", "write a song", "imagine", "creative", "fiction", "haiku", "lyrics",
    "screenplay",
];
const ANALYTICAL_KEYWORDS: &[&str] = &[
    "analyze", "analyse", "compare", "evaluate", "pros and cons", "assess", "examine",
    "trade-off", "tradeoff", "critique",
];
const FACTUAL_KEYWORDS: &[&str] = &[
    "what is", "who is", "who was", "when did", "where is", "define", "definition",
    "history of", "capital of", "fact",
];
const MATH_KEYWORDS: &[&str] = &[
    "calculate", "solve", "equation", "integral", "derivative", "sum of", "probability",
    "theorem", "math",
];
const CONVERSATIONAL_KEYWORDS: &[&str] = &[
    "hello", "hi there", "how are you", "thanks", "thank you", "good morning", "chat with",
];

const SUMMARIZE_KEYWORDS: &[&str] = &["summarize", "summarise", "summary", "tl;dr"];
const STEP_KEYWORDS: &[&str] = &["step by step", "step-by-step", "walk me through", "explain how"];
const REASONING_KEYWORDS: &[&str] = &["why", "reason", "because", "explain", "prove"];

fn contains_any(haystack: &str, needles: &[&str]) -> usize {
    needles.iter().filter(|n| haystack.contains(*n)).count()
}

impl Classifier for RuleClassifier {
    fn classify(&self, prompt: &str) -> ClassifiedIntent {
        let lower = prompt.to_lowercase();

        // Type: first matching bucket in precedence order.
        let buckets: [(IntentType, &[&str]); 6] = [
            (IntentType::Code, CODE_KEYWORDS),
            (IntentType::Creative, CREATIVE_KEYWORDS),
            (IntentType::Analytical, ANALYTICAL_KEYWORDS),
            (IntentType::Factual, FACTUAL_KEYWORDS),
            (IntentType::Mathematical, MATH_KEYWORDS),
            (IntentType::Conversational, CONVERSATIONAL_KEYWORDS),
        ];
        let mut intent = IntentType::General;
        let mut hits = 0;
        for (candidate, keywords) in buckets {
            let n = contains_any(&lower, keywords);
            if n > 0 {
                intent = candidate;
                hits = n;
                break;
            }
        }

        // Complexity: length thresholds, bumped once when sentences run long.
        let mut complexity = match prompt.len() {
            0..=99 => Complexity::Simple,
            100..=499 => Complexity::Medium,
            500..=999 => Complexity::Complex,
            _ => Complexity::VeryComplex,
        };
        if average_sentence_words(prompt) > 25.0 {
            complexity = complexity.bump();
        }

        // Features: text-generation always; the rest from triggers.
        let mut features = vec!["text-generation".to_string()];
        let mut add = |tag: &str| {
            if !features.iter().any(|f| f == tag) {
                features.push(tag.to_string());
            }
        };
        match intent {
            IntentType::Code => add("code-generation"),
            IntentType::Factual => add("knowledge-retrieval"),
            IntentType::Mathematical => add("equation-solving"),
            _ => {}
        }
        if intent == IntentType::Analytical || complexity >= Complexity::Complex {
            add("reasoning");
        }
        if contains_any(&lower, SUMMARIZE_KEYWORDS) > 0 {
            add("summarization");
        }
        if contains_any(&lower, STEP_KEYWORDS) > 0 || intent == IntentType::Mathematical {
            add("step-by-step");
        }
        if intent != IntentType::Analytical
            && complexity < Complexity::Complex
            && contains_any(&lower, REASONING_KEYWORDS) > 0
        {
            add("reasoning");
        }

        let priority = match complexity {
            Complexity::Simple => Priority::Low,
            Complexity::Medium => Priority::Medium,
            Complexity::Complex | Complexity::VeryComplex => Priority::High,
        };

        let confidence = if prompt.is_empty() || intent == IntentType::General {
            0.5
        } else if hits > 1 {
            0.8
        } else {
            0.7
        };

        let estimated = estimate_tokens(prompt);
        let completion = match intent {
            IntentType::Creative => (estimated.saturating_mul(3)).clamp(256, 2048),
            IntentType::Code => (estimated.saturating_mul(2)).clamp(192, 1536),
            _ => estimated.clamp(128, 1024),
        };

        ClassifiedIntent {
            intent,
            complexity,
            features,
            priority,
            confidence,
            domain: detect_domain(&lower),
            language: detect_language(prompt),
            tokens: TokenEstimate {
                estimated,
                completion,
            },
        }
    }
}

fn average_sentence_words(prompt: &str) -> f64 {
    let sentences: Vec<&str> = prompt
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if sentences.is_empty() {
        return 0.0;
    }
    let words: usize = sentences
        .iter()
        .map(|s| s.split_whitespace().count())
        .sum();
    words as f64 / sentences.len() as f64
}

/// Best-effort domain tag from a small keyword map.
fn detect_domain(lower: &str) -> Option<String> {
    const DOMAINS: &[(&str, &[&str])] = &[
        ("software", &["code", "program", "compile", "api", "debug"]),
        ("finance", &["stock", "invest", "portfolio", "interest rate"]),
        ("medicine", &["symptom", "diagnosis", "medication", "clinical"]),
        ("law", &["contract", "statute", "liability", "plaintiff"]),
    ];
    DOMAINS
        .iter()
        .find(|(_, kws)| kws.iter().any(|k| lower.contains(k)))
        .map(|(tag, _)| (*tag).to_string())
}

/// Best-effort ISO language tag. Mostly-ASCII text is assumed English;
/// anything else is left untagged rather than guessed.
fn detect_language(prompt: &str) -> Option<String> {
    if prompt.is_empty() {
        return None;
    }
    let ascii = prompt.chars().filter(char::is_ascii).count();
    if ascii * 10 >= prompt.chars().count() * 9 {
        Some("en".to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(prompt: &str) -> ClassifiedIntent {
        RuleClassifier.classify(prompt)
    }

    // -----------------------------------------------------------------------
    // Totality and defaults
    // -----------------------------------------------------------------------

    #[test]
    fn empty_prompt_yields_general_simple_default() {
        let c = classify("");
        assert_eq!(c.intent, IntentType::General);
        assert_eq!(c.complexity, Complexity::Simple);
        assert_eq!(c.features, vec!["text-generation"]);
        assert!((c.confidence - 0.5).abs() < f64::EPSILON);
        assert_eq!(c.tokens.estimated, 0);
    }

    #[test]
    fn features_always_contain_text_generation() {
        for prompt in [
            "",
            "hello",
            "Write a Python function to reverse a linked list",
            "Compare the pros and cons of microservices versus monoliths in depth",
            "solve the equation x^2 = 4",
        ] {
            let c = classify(prompt);
            assert!(
                c.features.iter().any(|f| f == "text-generation"),
                "missing text-generation for: {prompt}"
            );
        }
    }

    // -----------------------------------------------------------------------
    // Type precedence
    // -----------------------------------------------------------------------

    #[test]
    fn code_keywords_win_over_everything() {
        let c = classify("Write a story about a function that can debug code");
        assert_eq!(c.intent, IntentType::Code);
        assert!(c.features.iter().any(|f| f == "code-generation"));
    }

    #[test]
    fn creative_beats_factual() {
        let c = classify("Write a poem about what is love");
        assert_eq!(c.intent, IntentType::Creative);
    }

    #[test]
    fn factual_prompt_gets_knowledge_retrieval() {
        let c = classify("What is the capital of France?");
        assert_eq!(c.intent, IntentType::Factual);
        assert!(c.features.iter().any(|f| f == "knowledge-retrieval"));
    }

    #[test]
    fn math_prompt_gets_equation_solving_and_steps() {
        let c = classify("Solve the equation 3x + 4 = 19");
        assert_eq!(c.intent, IntentType::Mathematical);
        assert!(c.features.iter().any(|f| f == "equation-solving"));
        assert!(c.features.iter().any(|f| f == "step-by-step"));
    }

    #[test]
    fn greeting_is_conversational() {
        let c = classify("hello, how are you today?");
        assert_eq!(c.intent, IntentType::Conversational);
    }

    #[test]
    fn weather_smalltalk_is_general() {
        let c = classify("Tell me about the weather");
        assert_eq!(c.intent, IntentType::General);
    }

    // -----------------------------------------------------------------------
    // Complexity thresholds
    // -----------------------------------------------------------------------

    #[test]
    fn complexity_follows_length_thresholds() {
        // Short sentences keep the sentence-length adjustment out of play.
        let sentence = "Tell me. "; // 9 chars, 2 words
        assert_eq!(classify(&sentence.repeat(10)).complexity, Complexity::Simple); // 90 chars
        assert_eq!(classify(&sentence.repeat(30)).complexity, Complexity::Medium); // 270 chars
        assert_eq!(classify(&sentence.repeat(60)).complexity, Complexity::Complex); // 540 chars
        assert_eq!(
            classify(&sentence.repeat(120)).complexity,
            Complexity::VeryComplex
        ); // 1080 chars
    }

    #[test]
    fn long_sentences_bump_complexity() {
        // 30 words, one sentence, under 100 chars would be Simple; the
        // sentence-length adjustment lifts it to Medium.
        let prompt = "aa ".repeat(30);
        assert!(prompt.len() < 100);
        assert_eq!(classify(&prompt).complexity, Complexity::Medium);
    }

    #[test]
    fn complex_prompts_add_reasoning() {
        let c = classify(&"describe this. ".repeat(40)); // 600 chars
        assert_eq!(c.complexity, Complexity::Complex);
        assert!(c.features.iter().any(|f| f == "reasoning"));
        assert_eq!(c.priority, Priority::High);
    }

    // -----------------------------------------------------------------------
    // Token estimates
    // -----------------------------------------------------------------------

    #[test]
    fn estimated_tokens_are_quarter_length() {
        let c = classify(&"x".repeat(200));
        assert_eq!(c.tokens.estimated, 50);
    }

    #[test]
    fn creative_expects_more_completion_than_code_than_general() {
        let text = "z".repeat(400);
        let creative = classify(&format!("write a poem {text}"));
        let code = classify(&format!("write a function {text}"));
        let general = classify(&text);
        assert!(creative.tokens.completion > code.tokens.completion);
        assert!(code.tokens.completion > general.tokens.completion);
    }

    // -----------------------------------------------------------------------
    // Optional tags
    // -----------------------------------------------------------------------

    #[test]
    fn software_domain_detected_for_code_prompts() {
        let c = classify("debug this api handler");
        assert_eq!(c.domain.as_deref(), Some("software"));
    }

    #[test]
    fn ascii_text_is_tagged_english() {
        assert_eq!(classify("plain ascii prompt").language.as_deref(), Some("en"));
        assert_eq!(classify("").language, None);
    }

    #[test]
    fn summarize_trigger_adds_summarization() {
        let c = classify("Summarize this article for me");
        assert!(c.features.iter().any(|f| f == "summarization"));
    }

    // -----------------------------------------------------------------------
    // Determinism
    // -----------------------------------------------------------------------

    #[test]
    fn classification_is_deterministic() {
        let a = serde_json::to_string(&classify("Compare Rust and Go for systems work")).unwrap();
        let b = serde_json::to_string(&classify("Compare Rust and Go for systems work")).unwrap();
        assert_eq!(a, b);
    }
}
