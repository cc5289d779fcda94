use chrono::{DateTime, Duration, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use validator::Validate;

use super::{bson_datetime_as_chrono, bson_datetime_as_chrono_option};

pub const QUIZZES_COLLECTION: &str = "quizzes";
pub const QUIZ_SUBMISSIONS_COLLECTION: &str = "quiz_submissions";

/// Grace period on top of the time limit for network latency
const TIME_LIMIT_GRACE_SECONDS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quiz {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub course_id: ObjectId,
    pub school_id: ObjectId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub questions: Vec<Question>,
    #[serde(default)]
    pub retake_policy: RetakePolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_minutes: Option<u32>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub available_from: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub available_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub published: bool,
    pub created_by: ObjectId,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

impl Quiz {
    pub fn total_points(&self) -> f64 {
        self.questions.iter().map(|q| q.points).sum()
    }

    /// Checks the availability window
    pub fn check_window(&self, now: DateTime<Utc>) -> Result<(), String> {
        if let Some(from) = self.available_from {
            if now < from {
                return Err(format!("Quiz opens at {}", from.to_rfc3339()));
            }
        }
        if let Some(until) = self.available_until {
            if now > until {
                return Err("Quiz is closed".to_string());
            }
        }
        Ok(())
    }

    /// Rejects attempts that took longer than the time limit (plus grace)
    pub fn check_time_limit(
        &self,
        started_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        match (self.time_limit_minutes, started_at) {
            (Some(limit), Some(started)) => {
                let allowed = Duration::minutes(limit as i64)
                    + Duration::seconds(TIME_LIMIT_GRACE_SECONDS);
                if now - started > allowed {
                    Err(format!("Time limit of {} minutes exceeded", limit))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    #[serde(default)]
    pub id: String,
    pub prompt: String,
    pub points: f64,
    pub kind: QuestionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    SingleChoice {
        options: Vec<String>,
        correct: u32,
    },
    MultipleChoice {
        options: Vec<String>,
        correct: Vec<u32>,
    },
    TrueFalse {
        correct: bool,
    },
    ShortAnswer {
        accepted: Vec<String>,
        #[serde(default)]
        case_sensitive: bool,
    },
}

impl QuestionKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            QuestionKind::SingleChoice { .. } => "single_choice",
            QuestionKind::MultipleChoice { .. } => "multiple_choice",
            QuestionKind::TrueFalse { .. } => "true_false",
            QuestionKind::ShortAnswer { .. } => "short_answer",
        }
    }

    pub fn options(&self) -> Vec<String> {
        match self {
            QuestionKind::SingleChoice { options, .. }
            | QuestionKind::MultipleChoice { options, .. } => options.clone(),
            QuestionKind::TrueFalse { .. } => vec!["true".to_string(), "false".to_string()],
            QuestionKind::ShortAnswer { .. } => Vec::new(),
        }
    }
}

/// A student's answer; the shape depends on the question kind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AnswerValue {
    Bool(bool),
    Index(u32),
    Indices(Vec<u32>),
    Text(String),
}

impl Question {
    pub fn validate_definition(&self) -> Result<(), String> {
        if self.prompt.trim().is_empty() {
            return Err("Question prompt cannot be empty".to_string());
        }
        if !self.points.is_finite() || self.points <= 0.0 {
            return Err(format!("Question '{}' must be worth > 0 points", self.prompt));
        }
        match &self.kind {
            QuestionKind::SingleChoice { options, correct } => {
                if options.len() < 2 {
                    return Err(format!("Question '{}' needs at least 2 options", self.prompt));
                }
                if *correct as usize >= options.len() {
                    return Err(format!("Question '{}' has no such option", self.prompt));
                }
            }
            QuestionKind::MultipleChoice { options, correct } => {
                if options.len() < 2 {
                    return Err(format!("Question '{}' needs at least 2 options", self.prompt));
                }
                if correct.is_empty() {
                    return Err(format!(
                        "Question '{}' needs at least one correct option",
                        self.prompt
                    ));
                }
                if correct.iter().any(|i| *i as usize >= options.len()) {
                    return Err(format!("Question '{}' has no such option", self.prompt));
                }
            }
            QuestionKind::TrueFalse { .. } => {}
            QuestionKind::ShortAnswer { accepted, .. } => {
                if accepted.iter().all(|a| a.trim().is_empty()) {
                    return Err(format!(
                        "Question '{}' needs at least one accepted answer",
                        self.prompt
                    ));
                }
            }
        }
        Ok(())
    }

    /// Points earned for an answer. Multiple choice is all-or-nothing.
    pub fn score(&self, answer: Option<&AnswerValue>) -> f64 {
        let correct = match (&self.kind, answer) {
            (QuestionKind::SingleChoice { correct, .. }, Some(AnswerValue::Index(i))) => {
                i == correct
            }
            (QuestionKind::MultipleChoice { correct, .. }, Some(AnswerValue::Indices(given))) => {
                let expected: BTreeSet<u32> = correct.iter().copied().collect();
                let given: BTreeSet<u32> = given.iter().copied().collect();
                expected == given
            }
            // a single pick is a valid answer to a one-correct multiple choice
            (QuestionKind::MultipleChoice { correct, .. }, Some(AnswerValue::Index(i))) => {
                correct.len() == 1 && correct[0] == *i
            }
            (QuestionKind::TrueFalse { correct }, Some(AnswerValue::Bool(given))) => {
                given == correct
            }
            (
                QuestionKind::ShortAnswer {
                    accepted,
                    case_sensitive,
                },
                Some(AnswerValue::Text(given)),
            ) => {
                let normalize = |value: &str| {
                    let trimmed = value.trim();
                    if *case_sensitive {
                        trimmed.to_string()
                    } else {
                        trimmed.to_lowercase()
                    }
                };
                let given = normalize(given);
                accepted.iter().any(|a| normalize(a) == given)
            }
            _ => false,
        };
        if correct {
            self.points
        } else {
            0.0
        }
    }
}

pub fn validate_questions(questions: &[Question]) -> Result<(), String> {
    if questions.is_empty() {
        return Err("A quiz needs at least one question".to_string());
    }
    let mut seen = BTreeSet::new();
    for question in questions {
        question.validate_definition()?;
        if !question.id.is_empty() && !seen.insert(question.id.as_str()) {
            return Err(format!("Duplicate question id {}", question.id));
        }
    }
    Ok(())
}

/// Scores an attempt; returns (score, max_score). Unknown question ids are ignored.
pub fn grade_attempt(questions: &[Question], answers: &[SubmittedAnswer]) -> (f64, f64) {
    let by_question: HashMap<&str, &AnswerValue> = answers
        .iter()
        .map(|a| (a.question_id.as_str(), &a.answer))
        .collect();

    questions.iter().fold((0.0, 0.0), |(score, max), question| {
        let earned = question.score(by_question.get(question.id.as_str()).copied());
        (score + earned, max + question.points)
    })
}

/// Attempt limits for one quiz
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetakePolicy {
    pub max_attempts: u32,
    /// Minimum whole days between two attempts
    #[serde(default)]
    pub cooldown_days: u32,
}

impl Default for RetakePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            cooldown_days: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetakeDenial {
    AttemptsExhausted { max_attempts: u32 },
    CoolingDown { next_attempt_at: DateTime<Utc> },
}

impl RetakeDenial {
    pub fn message(&self) -> String {
        match self {
            RetakeDenial::AttemptsExhausted { max_attempts } => format!(
                "Maximum number of attempts ({}) reached for this quiz",
                max_attempts
            ),
            RetakeDenial::CoolingDown { next_attempt_at } => format!(
                "Next attempt allowed after {}",
                next_attempt_at.to_rfc3339()
            ),
        }
    }

    pub fn next_attempt_at(&self) -> Option<DateTime<Utc>> {
        match self {
            RetakeDenial::AttemptsExhausted { .. } => None,
            RetakeDenial::CoolingDown { next_attempt_at } => Some(*next_attempt_at),
        }
    }
}

impl RetakePolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.cooldown_days > 365 {
            return Err("cooldown_days must be at most 365".to_string());
        }
        Ok(())
    }

    pub fn next_attempt_at(&self, last_attempt_at: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match last_attempt_at {
            Some(last) if self.cooldown_days > 0 => {
                Some(last + Duration::days(self.cooldown_days as i64))
            }
            _ => None,
        }
    }

    /// Decides whether one more attempt may start now
    pub fn check(
        &self,
        attempts_used: u32,
        last_attempt_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), RetakeDenial> {
        if attempts_used >= self.max_attempts {
            return Err(RetakeDenial::AttemptsExhausted {
                max_attempts: self.max_attempts,
            });
        }
        if let Some(next) = self.next_attempt_at(last_attempt_at) {
            if now < next {
                return Err(RetakeDenial::CoolingDown {
                    next_attempt_at: next,
                });
            }
        }
        Ok(())
    }

    pub fn attempts_remaining(&self, attempts_used: u32) -> u32 {
        self.max_attempts.saturating_sub(attempts_used)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedAnswer {
    pub question_id: String,
    pub answer: AnswerValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizAttempt {
    pub number: u32,
    pub answers: Vec<SubmittedAnswer>,
    pub score: f64,
    pub max_score: f64,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub submitted_at: DateTime<Utc>,
}

/// All attempts of one student on one quiz
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizSubmission {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub quiz_id: ObjectId,
    pub course_id: ObjectId,
    pub student_id: ObjectId,
    #[serde(default)]
    pub attempts: Vec<QuizAttempt>,
    pub attempt_count: u32,
    pub best_score: f64,
    pub max_score: f64,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

/// Question as shown to students: no answer key
#[derive(Debug, Clone, Serialize)]
pub struct PublicQuestion {
    pub id: String,
    pub prompt: String,
    pub points: f64,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub options: Vec<String>,
}

impl From<&Question> for PublicQuestion {
    fn from(question: &Question) -> Self {
        PublicQuestion {
            id: question.id.clone(),
            prompt: question.prompt.clone(),
            points: question.points,
            kind: question.kind.type_name(),
            options: question.kind.options(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum QuestionsView {
    Full(Vec<Question>),
    Redacted(Vec<PublicQuestion>),
}

#[derive(Debug, Serialize)]
pub struct QuizResponse {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub description: Option<String>,
    pub retake_policy: RetakePolicy,
    pub time_limit_minutes: Option<u32>,
    pub available_from: Option<DateTime<Utc>>,
    pub available_until: Option<DateTime<Utc>>,
    pub published: bool,
    pub total_points: f64,
    pub question_count: usize,
    pub questions: QuestionsView,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuizResponse {
    pub fn build(quiz: Quiz, include_answer_key: bool) -> Self {
        let questions = if include_answer_key {
            QuestionsView::Full(quiz.questions.clone())
        } else {
            QuestionsView::Redacted(quiz.questions.iter().map(PublicQuestion::from).collect())
        };
        QuizResponse {
            id: quiz.id.map(|id| id.to_hex()).unwrap_or_default(),
            course_id: quiz.course_id.to_hex(),
            total_points: quiz.total_points(),
            question_count: quiz.questions.len(),
            title: quiz.title,
            description: quiz.description,
            retake_policy: quiz.retake_policy,
            time_limit_minutes: quiz.time_limit_minutes,
            available_from: quiz.available_from,
            available_until: quiz.available_until,
            published: quiz.published,
            questions,
            created_at: quiz.created_at,
            updated_at: quiz.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateQuizRequest {
    pub course_id: String,

    #[validate(length(
        min = 1,
        max = 200,
        message = "Title must be between 1 and 200 characters"
    ))]
    pub title: String,

    #[validate(length(max = 5000, message = "Description must be at most 5000 characters"))]
    pub description: Option<String>,

    pub questions: Vec<Question>,

    #[serde(default)]
    pub retake_policy: RetakePolicy,

    #[validate(range(min = 1, max = 600, message = "Time limit must be 1..=600 minutes"))]
    pub time_limit_minutes: Option<u32>,

    pub available_from: Option<DateTime<Utc>>,

    pub available_until: Option<DateTime<Utc>>,

    #[serde(default)]
    pub published: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateQuizRequest {
    #[validate(length(
        min = 1,
        max = 200,
        message = "Title must be between 1 and 200 characters"
    ))]
    pub title: Option<String>,

    #[validate(length(max = 5000, message = "Description must be at most 5000 characters"))]
    pub description: Option<String>,

    pub questions: Option<Vec<Question>>,

    pub retake_policy: Option<RetakePolicy>,

    #[validate(range(min = 1, max = 600, message = "Time limit must be 1..=600 minutes"))]
    pub time_limit_minutes: Option<u32>,

    pub available_from: Option<DateTime<Utc>>,

    pub available_until: Option<DateTime<Utc>>,

    pub published: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListQuizzesQuery {
    pub course_id: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitAttemptRequest {
    pub answers: Vec<SubmittedAnswer>,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct AttemptResult {
    pub attempt_number: u32,
    pub score: f64,
    pub max_score: f64,
    pub best_score: f64,
    pub attempts_used: u32,
    pub attempts_remaining: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct AttemptSummary {
    pub number: u32,
    pub score: f64,
    pub max_score: f64,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct QuizSubmissionResponse {
    pub id: String,
    pub quiz_id: String,
    pub student_id: String,
    pub attempt_count: u32,
    pub best_score: f64,
    pub max_score: f64,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub attempts: Vec<AttemptSummary>,
}

impl From<QuizSubmission> for QuizSubmissionResponse {
    fn from(submission: QuizSubmission) -> Self {
        QuizSubmissionResponse {
            id: submission.id.map(|id| id.to_hex()).unwrap_or_default(),
            quiz_id: submission.quiz_id.to_hex(),
            student_id: submission.student_id.to_hex(),
            attempt_count: submission.attempt_count,
            best_score: submission.best_score,
            max_score: submission.max_score,
            last_attempt_at: submission.last_attempt_at,
            attempts: submission
                .attempts
                .into_iter()
                .map(|attempt| AttemptSummary {
                    number: attempt.number,
                    score: attempt.score,
                    max_score: attempt.max_score,
                    submitted_at: attempt.submitted_at,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: &str, points: f64, kind: QuestionKind) -> Question {
        Question {
            id: id.to_string(),
            prompt: format!("Question {}", id),
            points,
            kind,
        }
    }

    fn sample_questions() -> Vec<Question> {
        vec![
            question(
                "q1",
                2.0,
                QuestionKind::SingleChoice {
                    options: vec!["3".into(), "4".into(), "5".into()],
                    correct: 1,
                },
            ),
            question(
                "q2",
                3.0,
                QuestionKind::MultipleChoice {
                    options: vec!["2".into(), "3".into(), "4".into(), "9".into()],
                    correct: vec![0, 1],
                },
            ),
            question("q3", 1.0, QuestionKind::TrueFalse { correct: false }),
            question(
                "q4",
                4.0,
                QuestionKind::ShortAnswer {
                    accepted: vec!["Photosynthesis".into()],
                    case_sensitive: false,
                },
            ),
        ]
    }

    fn answer(id: &str, value: AnswerValue) -> SubmittedAnswer {
        SubmittedAnswer {
            question_id: id.to_string(),
            answer: value,
        }
    }

    #[test]
    fn test_grade_attempt_full_marks() {
        let answers = vec![
            answer("q1", AnswerValue::Index(1)),
            answer("q2", AnswerValue::Indices(vec![1, 0])),
            answer("q3", AnswerValue::Bool(false)),
            answer("q4", AnswerValue::Text("  photosynthesis ".into())),
        ];
        assert_eq!(grade_attempt(&sample_questions(), &answers), (10.0, 10.0));
    }

    #[test]
    fn test_grade_attempt_partial_and_missing() {
        let answers = vec![
            answer("q1", AnswerValue::Index(2)),
            // subset is not enough for multiple choice
            answer("q2", AnswerValue::Indices(vec![0])),
            answer("q3", AnswerValue::Bool(false)),
            answer("unknown", AnswerValue::Bool(true)),
        ];
        assert_eq!(grade_attempt(&sample_questions(), &answers), (1.0, 10.0));
    }

    #[test]
    fn test_mismatched_answer_shape_scores_zero() {
        let q = &sample_questions()[0];
        assert_eq!(q.score(Some(&AnswerValue::Text("4".into()))), 0.0);
        assert_eq!(q.score(None), 0.0);
    }

    #[test]
    fn test_short_answer_case_sensitivity() {
        let q = question(
            "q",
            1.0,
            QuestionKind::ShortAnswer {
                accepted: vec!["NaCl".into()],
                case_sensitive: true,
            },
        );
        assert_eq!(q.score(Some(&AnswerValue::Text("nacl".into()))), 0.0);
        assert_eq!(q.score(Some(&AnswerValue::Text("NaCl".into()))), 1.0);
    }

    #[test]
    fn test_answer_value_json_shapes() {
        let parsed: Vec<AnswerValue> =
            serde_json::from_str(r#"[true, 2, [0, 3], "text"]"#).unwrap();
        assert_eq!(
            parsed,
            vec![
                AnswerValue::Bool(true),
                AnswerValue::Index(2),
                AnswerValue::Indices(vec![0, 3]),
                AnswerValue::Text("text".into()),
            ]
        );
    }

    #[test]
    fn test_question_definition_validation() {
        let bad_index = question(
            "q",
            1.0,
            QuestionKind::SingleChoice {
                options: vec!["a".into(), "b".into()],
                correct: 2,
            },
        );
        assert!(bad_index.validate_definition().is_err());

        let no_points = question("q", 0.0, QuestionKind::TrueFalse { correct: true });
        assert!(no_points.validate_definition().is_err());

        let duplicate = vec![
            question("same", 1.0, QuestionKind::TrueFalse { correct: true }),
            question("same", 1.0, QuestionKind::TrueFalse { correct: false }),
        ];
        assert!(validate_questions(&duplicate).is_err());
        assert!(validate_questions(&[]).is_err());
        assert!(validate_questions(&sample_questions()).is_ok());
    }

    #[test]
    fn test_retake_policy_attempt_limit() {
        let policy = RetakePolicy {
            max_attempts: 2,
            cooldown_days: 0,
        };
        let now = Utc::now();
        assert!(policy.check(0, None, now).is_ok());
        assert!(policy.check(1, Some(now), now).is_ok());
        assert_eq!(
            policy.check(2, Some(now), now),
            Err(RetakeDenial::AttemptsExhausted { max_attempts: 2 })
        );
        assert_eq!(policy.attempts_remaining(5), 0);
    }

    #[test]
    fn test_retake_policy_cooldown() {
        let policy = RetakePolicy {
            max_attempts: 3,
            cooldown_days: 2,
        };
        let last = Utc::now() - Duration::days(1);
        let denial = policy.check(1, Some(last), Utc::now()).unwrap_err();
        assert_eq!(denial.next_attempt_at(), Some(last + Duration::days(2)));
        assert!(denial.message().contains("Next attempt allowed"));

        let later = last + Duration::days(2) + Duration::seconds(1);
        assert!(policy.check(1, Some(last), later).is_ok());
    }

    #[test]
    fn test_exhaustion_wins_over_cooldown() {
        let policy = RetakePolicy {
            max_attempts: 1,
            cooldown_days: 7,
        };
        let now = Utc::now();
        assert!(matches!(
            policy.check(1, Some(now), now),
            Err(RetakeDenial::AttemptsExhausted { .. })
        ));
    }

    #[test]
    fn test_time_limit_enforced_with_grace() {
        let now = Utc::now();
        let quiz = Quiz {
            id: None,
            course_id: ObjectId::new(),
            school_id: ObjectId::new(),
            title: "Timed".into(),
            description: None,
            questions: sample_questions(),
            retake_policy: RetakePolicy::default(),
            time_limit_minutes: Some(10),
            available_from: Some(now - Duration::days(1)),
            available_until: Some(now + Duration::days(1)),
            published: true,
            created_by: ObjectId::new(),
            created_at: now,
            updated_at: now,
        };
        assert!(quiz.check_window(now).is_ok());
        assert!(quiz.check_window(now + Duration::days(2)).is_err());
        assert!(quiz
            .check_time_limit(Some(now - Duration::minutes(10)), now)
            .is_ok());
        assert!(quiz
            .check_time_limit(Some(now - Duration::minutes(12)), now)
            .is_err());
        assert!(quiz.check_time_limit(None, now).is_ok());
    }

    #[test]
    fn test_redacted_view_hides_answer_key() {
        let now = Utc::now();
        let quiz = Quiz {
            id: Some(ObjectId::new()),
            course_id: ObjectId::new(),
            school_id: ObjectId::new(),
            title: "Quiz".into(),
            description: None,
            questions: sample_questions(),
            retake_policy: RetakePolicy::default(),
            time_limit_minutes: None,
            available_from: None,
            available_until: None,
            published: true,
            created_by: ObjectId::new(),
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(QuizResponse::build(quiz, false)).unwrap();
        let first = &json["questions"][0];
        assert_eq!(first["type"], "single_choice");
        assert!(first.get("kind").is_none());
        assert!(json.to_string().find("Photosynthesis").is_none());
        assert_eq!(json["total_points"], 10.0);
    }
}
