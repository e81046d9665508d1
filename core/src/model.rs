//! Entity graph: petition → surveys → options, signature → responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::public_id::PublicId;

/// Internal row id of a petition. Never exposed in URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PetitionId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurveyId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureId(pub i64);

/// Authenticated user identity, issued by the external session collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for SurveyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who is calling. Public read and signing paths are anonymous; owner-scoped
/// operations need a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Anonymous,
    User(UserId),
}

impl Caller {
    pub fn from_option(user: Option<UserId>) -> Self {
        match user {
            Some(user) => Self::User(user),
            None => Self::Anonymous,
        }
    }

    pub fn user(&self) -> Option<&UserId> {
        match self {
            Self::User(user) => Some(user),
            Self::Anonymous => None,
        }
    }
}

/// Answer cardinality of a survey question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    /// Exactly one option
    Single,
    /// One or more distinct options
    Multiple,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Multiple => "multiple",
        }
    }

    /// Parse from string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "single" => Some(Self::Single),
            "multiple" => Some(Self::Multiple),
            _ => None,
        }
    }
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Petition {
    pub id: PetitionId,
    pub public_id: PublicId,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub creator_id: Option<UserId>,
    pub signature_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyOption {
    pub id: OptionId,
    pub survey_id: SurveyId,
    pub label: String,
    pub order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Survey {
    pub id: SurveyId,
    pub petition_id: PetitionId,
    pub title: String,
    pub question_type: QuestionType,
    pub order: i64,
    /// Ascending display order
    pub options: Vec<SurveyOption>,
}

/// A petition together with its ordered surveys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PetitionDetail {
    pub petition: Petition,
    pub surveys: Vec<Survey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub id: SignatureId,
    pub petition_id: PetitionId,
    pub name: String,
    pub phone: String,
    pub signature_image_ref: String,
    pub created_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Inputs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOption {
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSurvey {
    pub title: String,
    pub question_type: QuestionType,
    pub options: Vec<NewOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPetition {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub surveys: Vec<NewSurvey>,
    #[serde(default)]
    pub activated_at: Option<DateTime<Utc>>,
}

/// Fields an owner may change after creation. Surveys and options are fixed
/// once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PetitionUpdate {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub activated_at: Option<DateTime<Utc>>,
}

/// The options a signer picked for one survey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyAnswer {
    pub survey_id: SurveyId,
    pub option_ids: Vec<OptionId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureSubmission {
    pub petition_id: PublicId,
    pub name: String,
    pub phone: String,
    /// Reference returned by the image store; the image is already persisted.
    pub signature_image_ref: String,
    #[serde(default)]
    pub survey_responses: Vec<SurveyAnswer>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionTally {
    pub option_id: OptionId,
    pub label: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyTally {
    pub survey_id: SurveyId,
    pub title: String,
    pub question_type: QuestionType,
    pub options: Vec<OptionTally>,
    pub total_responses: i64,
}

/// Header of the petition a result set belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsHeader {
    pub public_id: PublicId,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PetitionResults {
    pub petition: ResultsHeader,
    pub total_signatures: i64,
    pub surveys: Vec<SurveyTally>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Timestamp storage
// ─────────────────────────────────────────────────────────────────────────────

/// Timestamps are stored as UTC milliseconds.
pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(column: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(column, millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_type_round_trips_through_str() {
        for qt in [QuestionType::Single, QuestionType::Multiple] {
            assert_eq!(QuestionType::parse(qt.as_str()), Some(qt));
        }
        assert_eq!(QuestionType::parse("ranked"), None);
    }

    #[test]
    fn question_type_serializes_lowercase() {
        let json = serde_json::to_string(&QuestionType::Multiple).unwrap();
        assert_eq!(json, "\"multiple\"");
    }

    #[test]
    fn new_petition_defaults_optional_fields() {
        let parsed: NewPetition =
            serde_json::from_str(r#"{"title":"T","content":"<p>C</p>"}"#).unwrap();
        assert!(parsed.surveys.is_empty());
        assert!(parsed.activated_at.is_none());
    }

    #[test]
    fn millis_round_trip() {
        let now = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(from_millis(0, to_millis(now)).unwrap(), now);
    }
}
