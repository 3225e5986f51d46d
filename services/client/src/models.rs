//! REST Payloads and Responses
//!
//! Request and response shapes of the tutor backend's plain request/response
//! endpoints (user profiles, concepts, practice, answer submission, index
//! administration). The streaming chat protocol lives in `tutor_core::protocol`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashMap, fmt};

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RegisterUserPayload {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct StatusResponse {
    pub status: String,
}

/// Spaced-repetition state the backend keeps per user and concept.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Mastery {
    pub strength: f64,
    pub easiness: f64,
    pub interval: u32,
    pub reviews: u32,
    pub last_practiced: Option<String>,
}

impl Default for Mastery {
    fn default() -> Self {
        Self {
            strength: 0.0,
            easiness: 2.5,
            interval: 1,
            reviews: 0,
            last_practiced: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub mastery: HashMap<String, Mastery>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ConceptsResponse {
    pub concepts: Vec<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PracticePayload {
    pub user_id: String,
    pub concept: String,
    pub n: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    #[default]
    ShortAnswer,
    Essay,
    Mcq,
    Code,
    /// Any type this client does not know how to present specially.
    #[serde(other)]
    Other,
}

impl fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionKind::ShortAnswer => write!(f, "short_answer"),
            QuestionKind::Essay => write!(f, "essay"),
            QuestionKind::Mcq => write!(f, "mcq"),
            QuestionKind::Code => write!(f, "code"),
            QuestionKind::Other => write!(f, "other"),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    #[serde(default)]
    pub stdin: String,
    #[serde(default)]
    pub expected: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Question {
    pub qid: String,
    #[serde(default)]
    pub question: Option<String>,
    pub difficulty: String,
    #[serde(rename = "type", default)]
    pub kind: QuestionKind,
    #[serde(default)]
    pub testcases: Vec<TestCase>,
    #[serde(default)]
    pub language_id: Option<u32>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct PracticeResponse {
    #[serde(default)]
    pub mastery: Mastery,
    pub questions: Vec<Question>,
}

/// A submitted answer: free text for short-answer, essay and MCQ questions,
/// or source code for code questions.
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    Text(String),
    Code {
        source_code: String,
        language_id: Option<u32>,
    },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SubmitAnswerPayload {
    pub user_id: String,
    pub concept: String,
    pub qid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_id: Option<u32>,
}

impl SubmitAnswerPayload {
    pub fn new(user_id: &str, concept: &str, qid: &str, answer: Answer) -> Self {
        let (answer, source_code, language_id) = match answer {
            Answer::Text(text) => (Some(text), None, None),
            Answer::Code {
                source_code,
                language_id,
            } => (None, Some(source_code), language_id),
        };
        Self {
            user_id: user_id.to_string(),
            concept: concept.to_string(),
            qid: qid.to_string(),
            answer,
            source_code,
            language_id,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SubmitAnswerResponse {
    pub qid: String,
    pub score: f64,
    pub quality: u8,
    #[serde(default)]
    pub mastery: Mastery,
    #[serde(default)]
    pub details: Option<Value>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct QueryPayload {
    pub user_id: String,
    pub query: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct QueryResponse {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStatus {
    pub ntotal: u64,
    pub dim: u64,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ReindexResponse {
    #[serde(default)]
    pub status: Option<String>,
    pub started_at: String,
}
