use crate::error::{ServiceError, ServiceResult};
use crate::metrics::QUIZ_ATTEMPTS_TOTAL;
use crate::middlewares::auth::{JwtClaims, GRADE_SUBMISSIONS, MANAGE_QUIZZES};
use crate::models::course::Course;
use crate::models::quiz::{
    grade_attempt, validate_questions, AttemptResult, CreateQuizRequest, ListQuizzesQuery,
    Question, Quiz, QuizAttempt, QuizResponse, QuizSubmission, QuizSubmissionResponse,
    SubmitAttemptRequest, UpdateQuizRequest, QUIZZES_COLLECTION, QUIZ_SUBMISSIONS_COLLECTION,
};
use crate::models::{parse_object_id, Pagination};
use crate::services::course_service::{can_view_course, ensure_course_staff, CourseService};
use crate::services::{is_duplicate_key, AppState};
use crate::utils::time::chrono_to_bson;
use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, to_bson};
use mongodb::options::ReturnDocument;
use mongodb::Database;
use uuid::Uuid;

pub struct QuizService<'a> {
    state: &'a AppState,
    mongo: Database,
}

/// Gives every question without an id a stable one
fn assign_question_ids(questions: &mut [Question]) {
    for question in questions.iter_mut() {
        if question.id.trim().is_empty() {
            question.id = Uuid::new_v4().simple().to_string();
        }
    }
}

fn check_schedule(
    from: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
) -> ServiceResult<()> {
    match (from, until) {
        (Some(from), Some(until)) if until <= from => Err(ServiceError::validation(
            "available_until must be after available_from",
        )),
        _ => Ok(()),
    }
}

fn reject(reason: &str, err: ServiceError) -> ServiceError {
    QUIZ_ATTEMPTS_TOTAL.with_label_values(&["rejected"]).inc();
    tracing::debug!(reason, error = %err, "Quiz attempt rejected");
    err
}

impl<'a> QuizService<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self {
            state,
            mongo: state.mongo.clone(),
        }
    }

    fn quizzes(&self) -> mongodb::Collection<Quiz> {
        self.mongo.collection::<Quiz>(QUIZZES_COLLECTION)
    }

    fn submissions(&self) -> mongodb::Collection<QuizSubmission> {
        self.mongo.collection::<QuizSubmission>(QUIZ_SUBMISSIONS_COLLECTION)
    }

    async fn load(&self, claims: &JwtClaims, quiz_id: &ObjectId) -> ServiceResult<(Quiz, Course)> {
        let quiz = self
            .quizzes()
            .find_one(doc! { "_id": quiz_id })
            .await
            .context("Failed to query quiz")?
            .ok_or_else(|| ServiceError::not_found("Quiz not found"))?;
        let course = CourseService::new(self.state)
            .load(claims, &quiz.course_id)
            .await
            .map_err(|_| ServiceError::not_found("Quiz not found"))?;
        Ok((quiz, course))
    }

    pub async fn create(&self, claims: &JwtClaims, req: CreateQuizRequest) -> ServiceResult<QuizResponse> {
        let course_id = parse_object_id(&req.course_id, "course_id")?;
        let course = CourseService::new(self.state).load(claims, &course_id).await?;
        ensure_course_staff(claims, &course, &MANAGE_QUIZZES)?;

        let mut questions = req.questions;
        assign_question_ids(&mut questions);
        validate_questions(&questions).map_err(ServiceError::Validation)?;
        req.retake_policy.validate().map_err(ServiceError::Validation)?;
        check_schedule(req.available_from, req.available_until)?;

        let now = Utc::now();
        let mut quiz = Quiz {
            id: None,
            course_id,
            school_id: course.school_id,
            title: req.title.trim().to_string(),
            description: req.description,
            questions,
            retake_policy: req.retake_policy,
            time_limit_minutes: req.time_limit_minutes,
            available_from: req.available_from,
            available_until: req.available_until,
            published: req.published,
            created_by: claims.user_id()?,
            created_at: now,
            updated_at: now,
        };

        let inserted = self
            .quizzes()
            .insert_one(&quiz)
            .await
            .context("Failed to insert quiz")?;
        quiz.id = inserted.inserted_id.as_object_id();

        tracing::info!(quiz_id = ?quiz.id, course_id = %course_id, questions = quiz.questions.len(), "Quiz created");
        Ok(QuizResponse::build(quiz, true))
    }

    /// Students only see published quizzes, without answer keys
    pub async fn list(&self, claims: &JwtClaims, query: ListQuizzesQuery) -> ServiceResult<Vec<QuizResponse>> {
        let course_id = query
            .course_id
            .as_deref()
            .ok_or_else(|| ServiceError::validation("course_id is required"))
            .and_then(|id| parse_object_id(id, "course_id"))?;
        let course = CourseService::new(self.state).load(claims, &course_id).await?;
        if !can_view_course(claims, &course) {
            return Err(ServiceError::not_found("Course not found"));
        }

        let mut filter = doc! { "course_id": course_id };
        if claims.is_student() {
            filter.insert("published", true);
        }

        let page = Pagination {
            limit: query.limit,
            offset: query.offset,
        };
        let quizzes: Vec<Quiz> = self
            .quizzes()
            .find(filter)
            .sort(doc! { "createdAt": -1 })
            .skip(page.offset())
            .limit(page.limit())
            .await
            .context("Failed to query quizzes")?
            .try_collect()
            .await
            .context("Failed to read quizzes")?;

        let with_key = !claims.is_student();
        Ok(quizzes
            .into_iter()
            .map(|quiz| QuizResponse::build(quiz, with_key))
            .collect())
    }

    pub async fn get(&self, claims: &JwtClaims, quiz_id: &ObjectId) -> ServiceResult<QuizResponse> {
        let (quiz, course) = self.load(claims, quiz_id).await?;
        if !can_view_course(claims, &course) || (claims.is_student() && !quiz.published) {
            return Err(ServiceError::not_found("Quiz not found"));
        }
        let with_key = !claims.is_student();
        Ok(QuizResponse::build(quiz, with_key))
    }

    pub async fn update(
        &self,
        claims: &JwtClaims,
        quiz_id: &ObjectId,
        req: UpdateQuizRequest,
    ) -> ServiceResult<QuizResponse> {
        let (quiz, course) = self.load(claims, quiz_id).await?;
        ensure_course_staff(claims, &course, &MANAGE_QUIZZES)?;

        let mut set = doc! { "updatedAt": chrono_to_bson(Utc::now()) };
        if let Some(title) = req.title {
            set.insert("title", title.trim());
        }
        if let Some(description) = req.description {
            set.insert("description", description);
        }
        if let Some(mut questions) = req.questions {
            assign_question_ids(&mut questions);
            validate_questions(&questions).map_err(ServiceError::Validation)?;
            set.insert("questions", to_bson(&questions).context("Failed to encode questions")?);
        }
        if let Some(policy) = req.retake_policy {
            policy.validate().map_err(ServiceError::Validation)?;
            set.insert("retake_policy", to_bson(&policy).context("Failed to encode policy")?);
        }
        if let Some(limit) = req.time_limit_minutes {
            set.insert("time_limit_minutes", limit as i64);
        }
        let from = req.available_from.or(quiz.available_from);
        let until = req.available_until.or(quiz.available_until);
        check_schedule(from, until)?;
        if let Some(from) = req.available_from {
            set.insert("available_from", chrono_to_bson(from));
        }
        if let Some(until) = req.available_until {
            set.insert("available_until", chrono_to_bson(until));
        }
        if let Some(published) = req.published {
            set.insert("published", published);
        }

        let updated = self
            .quizzes()
            .find_one_and_update(doc! { "_id": quiz_id }, doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .await
            .context("Failed to update quiz")?
            .ok_or_else(|| ServiceError::not_found("Quiz not found"))?;

        Ok(QuizResponse::build(updated, true))
    }

    pub async fn delete(&self, claims: &JwtClaims, quiz_id: &ObjectId) -> ServiceResult<()> {
        let (_, course) = self.load(claims, quiz_id).await?;
        ensure_course_staff(claims, &course, &MANAGE_QUIZZES)?;

        self.submissions()
            .delete_many(doc! { "quiz_id": quiz_id })
            .await
            .context("Failed to delete quiz submissions")?;
        self.quizzes()
            .delete_one(doc! { "_id": quiz_id })
            .await
            .context("Failed to delete quiz")?;

        tracing::info!(quiz_id = %quiz_id, "Quiz deleted");
        Ok(())
    }

    /// Scores and records one attempt. The append is conditional on the
    /// attempt count read before scoring, so two racing attempts cannot
    /// both land; the loser gets a conflict.
    pub async fn submit_attempt(
        &self,
        claims: &JwtClaims,
        quiz_id: &ObjectId,
        req: SubmitAttemptRequest,
    ) -> ServiceResult<AttemptResult> {
        if !claims.is_student() {
            return Err(ServiceError::forbidden("Only students can attempt quizzes"));
        }
        let student_id = claims.user_id()?;
        let (quiz, course) = self.load(claims, quiz_id).await?;
        let now = Utc::now();

        if !quiz.published {
            return Err(reject("unpublished", ServiceError::not_found("Quiz not found")));
        }
        if !course.is_enrolled(&student_id) {
            return Err(reject(
                "not_enrolled",
                ServiceError::forbidden("You are not enrolled in this course"),
            ));
        }
        quiz.check_window(now)
            .map_err(|msg| reject("window", ServiceError::forbidden(msg)))?;
        quiz.check_time_limit(req.started_at, now)
            .map_err(|msg| reject("time_limit", ServiceError::validation(msg)))?;

        let existing = self
            .submissions()
            .find_one(doc! { "quiz_id": quiz_id, "student_id": student_id })
            .await
            .context("Failed to query quiz submission")?;
        let used = existing.as_ref().map(|s| s.attempt_count).unwrap_or(0);
        let last = existing.as_ref().and_then(|s| s.last_attempt_at);

        if let Err(denial) = quiz.retake_policy.check(used, last, now) {
            return Err(reject(
                "policy",
                ServiceError::PolicyDenied {
                    message: denial.message(),
                    next_attempt_at: denial.next_attempt_at(),
                },
            ));
        }

        let (score, max_score) = grade_attempt(&quiz.questions, &req.answers);
        let attempt = QuizAttempt {
            number: used + 1,
            answers: req.answers,
            score,
            max_score,
            started_at: req.started_at,
            submitted_at: now,
        };

        let saved = match existing {
            Some(_) => self.append_attempt(quiz_id, &student_id, used, &attempt).await?,
            None => self.insert_first_attempt(&quiz, &student_id, &attempt).await?,
        };

        QUIZ_ATTEMPTS_TOTAL.with_label_values(&["accepted"]).inc();
        tracing::info!(
            quiz_id = %quiz_id,
            student_id = %student_id,
            attempt = attempt.number,
            score,
            max_score,
            "Quiz attempt recorded"
        );

        Ok(AttemptResult {
            attempt_number: attempt.number,
            score,
            max_score,
            best_score: saved.best_score,
            attempts_used: saved.attempt_count,
            attempts_remaining: quiz.retake_policy.attempts_remaining(saved.attempt_count),
            next_attempt_at: quiz.retake_policy.next_attempt_at(saved.last_attempt_at),
        })
    }

    async fn append_attempt(
        &self,
        quiz_id: &ObjectId,
        student_id: &ObjectId,
        expected_count: u32,
        attempt: &QuizAttempt,
    ) -> ServiceResult<QuizSubmission> {
        let now = chrono_to_bson(attempt.submitted_at);
        self.submissions()
            .find_one_and_update(
                doc! {
                    "quiz_id": quiz_id,
                    "student_id": student_id,
                    "attempt_count": expected_count as i64,
                },
                doc! {
                    "$push": { "attempts": to_bson(attempt).context("Failed to encode attempt")? },
                    "$inc": { "attempt_count": 1 },
                    "$max": { "best_score": attempt.score },
                    "$set": {
                        "max_score": attempt.max_score,
                        "last_attempt_at": now,
                        "updatedAt": now,
                    },
                },
            )
            .return_document(ReturnDocument::After)
            .await
            .context("Failed to record quiz attempt")?
            .ok_or_else(|| {
                reject(
                    "race",
                    ServiceError::conflict("Another attempt was recorded concurrently"),
                )
            })
    }

    async fn insert_first_attempt(
        &self,
        quiz: &Quiz,
        student_id: &ObjectId,
        attempt: &QuizAttempt,
    ) -> ServiceResult<QuizSubmission> {
        let mut submission = QuizSubmission {
            id: None,
            quiz_id: quiz.id.ok_or_else(|| anyhow::anyhow!("Quiz without id"))?,
            course_id: quiz.course_id,
            student_id: *student_id,
            attempts: vec![attempt.clone()],
            attempt_count: 1,
            best_score: attempt.score,
            max_score: attempt.max_score,
            last_attempt_at: Some(attempt.submitted_at),
            created_at: attempt.submitted_at,
            updated_at: attempt.submitted_at,
        };

        match self.submissions().insert_one(&submission).await {
            Ok(inserted) => {
                submission.id = inserted.inserted_id.as_object_id();
                Ok(submission)
            }
            Err(e) if is_duplicate_key(&e) => Err(reject(
                "race",
                ServiceError::conflict("Another attempt was recorded concurrently"),
            )),
            Err(e) => Err(anyhow::Error::new(e)
                .context("Failed to record quiz attempt")
                .into()),
        }
    }

    /// Every student's record for a quiz, best score first
    pub async fn list_submissions(
        &self,
        claims: &JwtClaims,
        quiz_id: &ObjectId,
        page: Pagination,
    ) -> ServiceResult<Vec<QuizSubmissionResponse>> {
        let (_, course) = self.load(claims, quiz_id).await?;
        ensure_course_staff(claims, &course, &GRADE_SUBMISSIONS)?;

        let submissions: Vec<QuizSubmission> = self
            .submissions()
            .find(doc! { "quiz_id": quiz_id })
            .sort(doc! { "best_score": -1, "last_attempt_at": 1 })
            .skip(page.offset())
            .limit(page.limit())
            .await
            .context("Failed to query quiz submissions")?
            .try_collect()
            .await
            .context("Failed to read quiz submissions")?;

        Ok(submissions
            .into_iter()
            .map(QuizSubmissionResponse::from)
            .collect())
    }

    pub async fn my_submission(
        &self,
        claims: &JwtClaims,
        quiz_id: &ObjectId,
    ) -> ServiceResult<QuizSubmissionResponse> {
        let student_id = claims.user_id()?;
        self.load(claims, quiz_id).await?;

        self.submissions()
            .find_one(doc! { "quiz_id": quiz_id, "student_id": student_id })
            .await
            .context("Failed to query quiz submission")?
            .map(QuizSubmissionResponse::from)
            .ok_or_else(|| ServiceError::not_found("No attempts yet"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::quiz::QuestionKind;

    #[test]
    fn test_assign_question_ids_fills_only_blanks() {
        let mut questions = vec![
            Question {
                id: "keep".to_string(),
                prompt: "2+2".to_string(),
                points: 1.0,
                kind: QuestionKind::TrueFalse { correct: true },
            },
            Question {
                id: String::new(),
                prompt: "sky is green".to_string(),
                points: 1.0,
                kind: QuestionKind::TrueFalse { correct: false },
            },
        ];
        assign_question_ids(&mut questions);
        assert_eq!(questions[0].id, "keep");
        assert_eq!(questions[1].id.len(), 32);
    }

    #[test]
    fn test_schedule_requires_ordered_window() {
        let now = Utc::now();
        assert!(check_schedule(Some(now), Some(now + chrono::Duration::hours(1))).is_ok());
        assert!(check_schedule(Some(now), Some(now)).is_err());
        assert!(check_schedule(None, Some(now)).is_ok());
    }
}
