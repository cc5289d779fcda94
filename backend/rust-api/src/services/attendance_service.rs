use crate::error::{ServiceError, ServiceResult};
use crate::middlewares::auth::{JwtClaims, MARK_ATTENDANCE};
use crate::models::attendance::{
    parse_date, summarize, AttendanceQuery, AttendanceRecord, AttendanceSheet,
    AttendanceSheetResponse, AttendanceSummary, AttendanceSummaryQuery, MarkAttendanceRequest,
    ATTENDANCE_COLLECTION, DATE_FORMAT,
};
use crate::models::{parse_object_id, Pagination};
use crate::services::course_service::{ensure_course_staff, CourseService};
use crate::services::section_service::SectionService;
use crate::services::user_service::UserService;
use crate::services::AppState;
use crate::utils::time::chrono_to_bson;
use anyhow::Context;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, to_bson, Bson, Document};
use mongodb::options::ReturnDocument;
use mongodb::Database;
use std::collections::HashSet;

pub struct AttendanceService<'a> {
    state: &'a AppState,
    mongo: Database,
}

/// Adds an inclusive `date` range to a filter. Bounds are normalized to
/// zero-padded keys so they compare correctly against stored dates.
fn date_range(filter: &mut Document, from: Option<&str>, to: Option<&str>) -> ServiceResult<()> {
    let parse = |value: Option<&str>| {
        value
            .map(|v| parse_date(v).map_err(ServiceError::Validation))
            .transpose()
    };
    let (from, to) = (parse(from)?, parse(to)?);

    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(ServiceError::validation("'from' must not be after 'to'"));
        }
    }

    let mut range = doc! {};
    if let Some(from) = from {
        range.insert("$gte", from.format(DATE_FORMAT).to_string());
    }
    if let Some(to) = to {
        range.insert("$lte", to.format(DATE_FORMAT).to_string());
    }
    if !range.is_empty() {
        filter.insert("date", range);
    }
    Ok(())
}

impl<'a> AttendanceService<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self {
            state,
            mongo: state.mongo.clone(),
        }
    }

    fn sheets(&self) -> mongodb::Collection<AttendanceSheet> {
        self.mongo.collection::<AttendanceSheet>(ATTENDANCE_COLLECTION)
    }

    /// Creates or overwrites the sheet for (section, course, date)
    pub async fn mark(
        &self,
        claims: &JwtClaims,
        req: MarkAttendanceRequest,
    ) -> ServiceResult<AttendanceSheetResponse> {
        claims.ensure(&MARK_ATTENDANCE)?;

        let section_id = parse_object_id(&req.section_id, "section_id")?;
        let section = SectionService::new(self.mongo.clone())
            .find(claims, &section_id)
            .await?;

        let course_id = match req.course_id.as_deref() {
            Some(raw) => {
                let id = parse_object_id(raw, "course_id")?;
                let course = CourseService::new(self.state).load(claims, &id).await?;
                if course.school_id != section.school_id {
                    return Err(ServiceError::validation(
                        "Course and section belong to different schools",
                    ));
                }
                ensure_course_staff(claims, &course, &MARK_ATTENDANCE)?;
                Some(id)
            }
            None => None,
        };

        let date = parse_date(&req.date)
            .map_err(ServiceError::Validation)?
            .format(DATE_FORMAT)
            .to_string();

        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(req.records.len());
        for entry in req.records {
            let student_id = parse_object_id(&entry.student_id, "student_id")?;
            if !section.has_student(&student_id) {
                return Err(ServiceError::validation(format!(
                    "Student {} is not in this section",
                    student_id
                )));
            }
            if !seen.insert(student_id) {
                return Err(ServiceError::validation(format!(
                    "Student {} is listed twice",
                    student_id
                )));
            }
            records.push(AttendanceRecord {
                student_id,
                status: entry.status,
            });
        }

        let now = chrono_to_bson(Utc::now());
        let course_key = course_id.map(Bson::ObjectId).unwrap_or(Bson::Null);
        let sheet = self
            .sheets()
            .find_one_and_update(
                doc! { "section_id": section_id, "course_id": course_key, "date": date.as_str() },
                doc! {
                    "$set": {
                        "school_id": section.school_id,
                        "records": to_bson(&records).context("Failed to encode records")?,
                        "marked_by": claims.user_id()?,
                        "updatedAt": now,
                    },
                    "$setOnInsert": { "createdAt": now },
                },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .context("Failed to save attendance")?
            .ok_or_else(|| anyhow::anyhow!("Upserted attendance sheet was not returned"))?;

        tracing::info!(
            section_id = %section_id,
            date = %date,
            records = sheet.records.len(),
            "Attendance marked"
        );
        Ok(AttendanceSheetResponse::from(sheet))
    }

    /// Staff query by section/course; students get only their own rows
    pub async fn query(
        &self,
        claims: &JwtClaims,
        query: AttendanceQuery,
    ) -> ServiceResult<Vec<AttendanceSheetResponse>> {
        let mut filter = doc! {};
        if claims.is_unassigned() {
            return Ok(Vec::new());
        }
        if let Some(school_id) = claims.scope_school(None)? {
            filter.insert("school_id", school_id);
        }
        if let Some(section) = query.section_id.as_deref() {
            filter.insert("section_id", parse_object_id(section, "section_id")?);
        }
        if let Some(course) = query.course_id.as_deref() {
            filter.insert("course_id", parse_object_id(course, "course_id")?);
        }
        date_range(&mut filter, query.from.as_deref(), query.to.as_deref())?;

        let me = claims.user_id()?;
        if claims.is_student() {
            filter.insert("records.student_id", me);
        } else {
            claims.ensure(&MARK_ATTENDANCE)?;
        }

        let page = Pagination {
            limit: query.limit,
            offset: query.offset,
        };
        let mut sheets: Vec<AttendanceSheet> = self
            .sheets()
            .find(filter)
            .sort(doc! { "date": -1 })
            .skip(page.offset())
            .limit(page.limit())
            .await
            .context("Failed to query attendance")?
            .try_collect()
            .await
            .context("Failed to read attendance")?;

        if claims.is_student() {
            for sheet in &mut sheets {
                sheet.records.retain(|r| r.student_id == me);
            }
        }
        Ok(sheets.into_iter().map(AttendanceSheetResponse::from).collect())
    }

    /// Per-status counts and attendance rate for one student
    pub async fn summary(
        &self,
        claims: &JwtClaims,
        student_id: &ObjectId,
        query: AttendanceSummaryQuery,
    ) -> ServiceResult<AttendanceSummary> {
        if claims.is_student() {
            if claims.user_id()? != *student_id {
                return Err(ServiceError::forbidden(
                    "Students can only view their own attendance",
                ));
            }
        } else {
            claims.ensure(&MARK_ATTENDANCE)?;
            UserService::new(self.mongo.clone())
                .find_visible(claims, student_id)
                .await?;
        }

        let mut filter = doc! { "records.student_id": student_id };
        if let Some(course) = query.course_id.as_deref() {
            filter.insert("course_id", parse_object_id(course, "course_id")?);
        }
        date_range(&mut filter, query.from.as_deref(), query.to.as_deref())?;

        let sheets: Vec<AttendanceSheet> = self
            .sheets()
            .find(filter)
            .await
            .context("Failed to query attendance")?
            .try_collect()
            .await
            .context("Failed to read attendance")?;

        Ok(summarize(student_id, &sheets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_range_builds_inclusive_bounds() {
        let mut filter = doc! {};
        date_range(&mut filter, Some("2026-09-01"), Some("2026-09-30")).unwrap();
        assert_eq!(
            filter,
            doc! { "date": { "$gte": "2026-09-01", "$lte": "2026-09-30" } }
        );
    }

    #[test]
    fn test_date_range_rejects_bad_input() {
        let mut filter = doc! {};
        assert!(date_range(&mut filter, Some("2026-13-01"), None).is_err());
        assert!(date_range(&mut filter, None, Some("yesterday")).is_err());
        assert!(date_range(&mut filter, Some("2026-10-02"), Some("2026-10-01")).is_err());
        assert!(filter.is_empty());
    }

    #[test]
    fn test_unpadded_bounds_are_normalized() {
        let mut filter = doc! {};
        date_range(&mut filter, Some("2026-9-1"), Some("2026-10-5")).unwrap();
        assert_eq!(
            filter,
            doc! { "date": { "$gte": "2026-09-01", "$lte": "2026-10-05" } }
        );

        // "2026-9-1" < "2026-09-15" only holds once padded
        let from = filter.get_document("date").unwrap().get_str("$gte").unwrap();
        assert!(from <= "2026-09-15");
    }

    #[test]
    fn test_bound_order_uses_calendar_dates() {
        // Lexically "2026-9-30" > "2026-10-01", but the dates are ordered
        let mut filter = doc! {};
        assert!(date_range(&mut filter, Some("2026-9-30"), Some("2026-10-01")).is_ok());
    }

    #[test]
    fn test_open_range_leaves_filter_untouched() {
        let mut filter = doc! { "section_id": "s" };
        date_range(&mut filter, None, None).unwrap();
        assert_eq!(filter, doc! { "section_id": "s" });
    }
}
