use crate::error::{ServiceError, ServiceResult};
use crate::middlewares::auth::{JwtClaims, MANAGE_TIMETABLE};
use crate::models::timetable::{
    overlaps, validate_slot, CreateTimetableEntryRequest, TimetableEntry, TimetableEntryResponse,
    TimetableQuery, UpdateTimetableEntryRequest, Weekday, TIMETABLE_COLLECTION,
};
use crate::models::user::UserRole;
use crate::models::parse_object_id;
use crate::services::course_service::CourseService;
use crate::services::section_service::SectionService;
use crate::services::user_service::UserService;
use crate::services::AppState;
use crate::utils::time::chrono_to_bson;
use anyhow::Context;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::options::ReturnDocument;
use mongodb::Database;

pub struct TimetableService<'a> {
    state: &'a AppState,
    mongo: Database,
}

/// The slot a new or edited entry wants to occupy
struct Slot {
    section_id: ObjectId,
    teacher_id: ObjectId,
    day: Weekday,
    span: (u32, u32),
}

/// Finds the first existing entry that clashes with `slot` on the same day,
/// either through the section or through the teacher
fn find_clash<'e>(
    slot: &Slot,
    existing: &'e [TimetableEntry],
    ignore: Option<&ObjectId>,
) -> Option<(&'e TimetableEntry, &'static str)> {
    existing
        .iter()
        .filter(|entry| entry.day == slot.day)
        .filter(|entry| entry.id.as_ref() != ignore)
        .find_map(|entry| {
            let span = entry.span().ok()?;
            if !overlaps(slot.span, span) {
                return None;
            }
            if entry.section_id == slot.section_id {
                Some((entry, "section"))
            } else if entry.teacher_id == slot.teacher_id {
                Some((entry, "teacher"))
            } else {
                None
            }
        })
}

impl<'a> TimetableService<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self {
            state,
            mongo: state.mongo.clone(),
        }
    }

    fn entries(&self) -> mongodb::Collection<TimetableEntry> {
        self.mongo.collection::<TimetableEntry>(TIMETABLE_COLLECTION)
    }

    async fn load(&self, claims: &JwtClaims, entry_id: &ObjectId) -> ServiceResult<TimetableEntry> {
        let entry = self
            .entries()
            .find_one(doc! { "_id": entry_id })
            .await
            .context("Failed to query timetable entry")?
            .ok_or_else(|| ServiceError::not_found("Timetable entry not found"))?;
        claims
            .ensure_same_school(Some(entry.school_id))
            .map_err(|_| ServiceError::not_found("Timetable entry not found"))?;
        Ok(entry)
    }

    async fn check_teacher(&self, teacher_id: &ObjectId, school_id: &ObjectId) -> ServiceResult<()> {
        let teacher = UserService::new(self.mongo.clone()).find(teacher_id).await?;
        if !teacher.role.can_teach() || teacher.school_id.as_ref() != Some(school_id) {
            return Err(ServiceError::validation(
                "teacher_id must be a teacher or faculty member of the same school",
            ));
        }
        Ok(())
    }

    async fn ensure_free(&self, slot: &Slot, ignore: Option<&ObjectId>) -> ServiceResult<()> {
        let same_day: Vec<TimetableEntry> = self
            .entries()
            .find(doc! {
                "day_index": slot.day.index() as i32,
                "$or": [
                    { "section_id": slot.section_id },
                    { "teacher_id": slot.teacher_id },
                ],
            })
            .await
            .context("Failed to query timetable")?
            .try_collect()
            .await
            .context("Failed to read timetable")?;

        match find_clash(slot, &same_day, ignore) {
            Some((entry, what)) => Err(ServiceError::conflict(format!(
                "Slot overlaps an existing {} entry on {} {}-{}",
                what,
                entry.day.as_str(),
                entry.start_time,
                entry.end_time
            ))),
            None => Ok(()),
        }
    }

    pub async fn create(
        &self,
        claims: &JwtClaims,
        req: CreateTimetableEntryRequest,
    ) -> ServiceResult<TimetableEntryResponse> {
        claims.ensure(&MANAGE_TIMETABLE)?;
        let span = validate_slot(&req.start_time, &req.end_time).map_err(ServiceError::Validation)?;

        let section_id = parse_object_id(&req.section_id, "section_id")?;
        let course_id = parse_object_id(&req.course_id, "course_id")?;
        let teacher_id = parse_object_id(&req.teacher_id, "teacher_id")?;

        let section = SectionService::new(self.mongo.clone())
            .find(claims, &section_id)
            .await?;
        let course = CourseService::new(self.state).load(claims, &course_id).await?;
        if course.school_id != section.school_id {
            return Err(ServiceError::validation(
                "Course and section belong to different schools",
            ));
        }
        self.check_teacher(&teacher_id, &section.school_id).await?;

        let slot = Slot {
            section_id,
            teacher_id,
            day: req.day,
            span,
        };
        self.ensure_free(&slot, None).await?;

        let now = Utc::now();
        let mut entry = TimetableEntry {
            id: None,
            school_id: section.school_id,
            section_id,
            course_id,
            teacher_id,
            day: req.day,
            day_index: req.day.index(),
            start_time: req.start_time,
            end_time: req.end_time,
            room: req.room,
            created_at: now,
            updated_at: now,
        };
        let inserted = self
            .entries()
            .insert_one(&entry)
            .await
            .context("Failed to insert timetable entry")?;
        entry.id = inserted.inserted_id.as_object_id();

        tracing::info!(entry_id = ?entry.id, section_id = %section_id, day = entry.day.as_str(), "Timetable entry created");
        Ok(TimetableEntryResponse::from(entry))
    }

    pub async fn update(
        &self,
        claims: &JwtClaims,
        entry_id: &ObjectId,
        req: UpdateTimetableEntryRequest,
    ) -> ServiceResult<TimetableEntryResponse> {
        claims.ensure(&MANAGE_TIMETABLE)?;
        let current = self.load(claims, entry_id).await?;

        let start = req.start_time.clone().unwrap_or_else(|| current.start_time.clone());
        let end = req.end_time.clone().unwrap_or_else(|| current.end_time.clone());
        let span = validate_slot(&start, &end).map_err(ServiceError::Validation)?;
        let day = req.day.unwrap_or(current.day);
        let teacher_id = match req.teacher_id.as_deref() {
            Some(raw) => {
                let id = parse_object_id(raw, "teacher_id")?;
                self.check_teacher(&id, &current.school_id).await?;
                id
            }
            None => current.teacher_id,
        };

        let slot = Slot {
            section_id: current.section_id,
            teacher_id,
            day,
            span,
        };
        self.ensure_free(&slot, Some(entry_id)).await?;

        let mut set = doc! {
            "teacher_id": teacher_id,
            "day": day.as_str(),
            "day_index": day.index() as i32,
            "start_time": start,
            "end_time": end,
            "updatedAt": chrono_to_bson(Utc::now()),
        };
        if let Some(room) = req.room {
            set.insert("room", room);
        }

        let updated = self
            .entries()
            .find_one_and_update(doc! { "_id": entry_id }, doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .await
            .context("Failed to update timetable entry")?
            .ok_or_else(|| ServiceError::not_found("Timetable entry not found"))?;

        Ok(TimetableEntryResponse::from(updated))
    }

    pub async fn delete(&self, claims: &JwtClaims, entry_id: &ObjectId) -> ServiceResult<()> {
        claims.ensure(&MANAGE_TIMETABLE)?;
        self.load(claims, entry_id).await?;
        self.entries()
            .delete_one(doc! { "_id": entry_id })
            .await
            .context("Failed to delete timetable entry")?;
        Ok(())
    }

    /// Ordered Monday first, then by start time. Without filters a student
    /// gets their section and a teacher their own schedule.
    pub async fn list(
        &self,
        claims: &JwtClaims,
        query: TimetableQuery,
    ) -> ServiceResult<Vec<TimetableEntryResponse>> {
        let mut filter = doc! {};
        if claims.is_unassigned() {
            return Ok(Vec::new());
        }
        if let Some(school_id) = claims.scope_school(None)? {
            filter.insert("school_id", school_id);
        }

        let section = query
            .section_id
            .as_deref()
            .map(|id| parse_object_id(id, "section_id"))
            .transpose()?;
        let teacher = query
            .teacher_id
            .as_deref()
            .map(|id| parse_object_id(id, "teacher_id"))
            .transpose()?;

        match (section, teacher, claims.role) {
            (None, None, UserRole::Student) => {
                let me = UserService::new(self.mongo.clone())
                    .find(&claims.user_id()?)
                    .await?;
                match me.section_id {
                    Some(section_id) => {
                        filter.insert("section_id", section_id);
                    }
                    None => return Ok(Vec::new()),
                }
            }
            (None, None, UserRole::Teacher) => {
                filter.insert("teacher_id", claims.user_id()?);
            }
            (section, teacher, _) => {
                if let Some(section) = section {
                    filter.insert("section_id", section);
                }
                if let Some(teacher) = teacher {
                    filter.insert("teacher_id", teacher);
                }
            }
        }
        if let Some(day) = query.day {
            filter.insert("day_index", day.index() as i32);
        }

        let entries: Vec<TimetableEntry> = self
            .entries()
            .find(filter)
            .sort(doc! { "day_index": 1, "start_time": 1 })
            .await
            .context("Failed to query timetable")?
            .try_collect()
            .await
            .context("Failed to read timetable")?;

        Ok(entries.into_iter().map(TimetableEntryResponse::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(section: ObjectId, teacher: ObjectId, day: Weekday, start: &str, end: &str) -> TimetableEntry {
        let now = Utc::now();
        TimetableEntry {
            id: Some(ObjectId::new()),
            school_id: ObjectId::new(),
            section_id: section,
            course_id: ObjectId::new(),
            teacher_id: teacher,
            day,
            day_index: day.index(),
            start_time: start.to_string(),
            end_time: end.to_string(),
            room: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_section_clash_detected() {
        let section = ObjectId::new();
        let existing = vec![entry(section, ObjectId::new(), Weekday::Mon, "09:00", "10:00")];
        let slot = Slot {
            section_id: section,
            teacher_id: ObjectId::new(),
            day: Weekday::Mon,
            span: (570, 630),
        };
        let (_, what) = find_clash(&slot, &existing, None).unwrap();
        assert_eq!(what, "section");
    }

    #[test]
    fn test_teacher_clash_across_sections() {
        let teacher = ObjectId::new();
        let existing = vec![entry(ObjectId::new(), teacher, Weekday::Tue, "11:00", "12:00")];
        let slot = Slot {
            section_id: ObjectId::new(),
            teacher_id: teacher,
            day: Weekday::Tue,
            span: (690, 720),
        };
        assert_eq!(find_clash(&slot, &existing, None).map(|(_, w)| w), Some("teacher"));
    }

    #[test]
    fn test_adjacent_and_other_days_are_free() {
        let section = ObjectId::new();
        let teacher = ObjectId::new();
        let existing = vec![
            entry(section, teacher, Weekday::Wed, "09:00", "10:00"),
            entry(section, teacher, Weekday::Thu, "10:00", "11:00"),
        ];
        let slot = Slot {
            section_id: section,
            teacher_id: teacher,
            day: Weekday::Wed,
            span: (600, 660),
        };
        assert!(find_clash(&slot, &existing, None).is_none());
    }

    #[test]
    fn test_entry_being_edited_is_ignored() {
        let section = ObjectId::new();
        let existing = vec![entry(section, ObjectId::new(), Weekday::Fri, "09:00", "10:00")];
        let own_id = existing[0].id;
        let slot = Slot {
            section_id: section,
            teacher_id: ObjectId::new(),
            day: Weekday::Fri,
            span: (540, 600),
        };
        assert!(find_clash(&slot, &existing, own_id.as_ref()).is_none());
    }
}
