use crate::error::{ServiceError, ServiceResult};
use crate::middlewares::auth::{JwtClaims, SEND_NOTIFICATIONS};
use crate::models::course::{Course, COURSES_COLLECTION};
use crate::models::notification::{
    Audience, CreateNotificationRequest, ListNotificationsQuery, Notification, NotificationStatus,
    NotificationView, SentNotificationResponse, UnreadCountResponse, NOTIFICATIONS_COLLECTION,
};
use crate::models::realtime::ServerEvent;
use crate::models::section::{Section, SECTIONS_COLLECTION};
use crate::models::{parse_object_id, parse_object_ids, Pagination};
use crate::services::notification_hub::NotificationHub;
use crate::services::user_service::UserService;
use crate::services::AppState;
use crate::utils::time::chrono_to_bson;
use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::options::ReturnDocument;
use mongodb::Database;
use std::sync::Arc;

pub struct NotificationService {
    mongo: Database,
    hub: Arc<NotificationHub>,
}

impl NotificationService {
    pub fn new(state: &AppState) -> Self {
        Self {
            mongo: state.mongo.clone(),
            hub: state.hub.clone(),
        }
    }

    fn notifications(&self) -> mongodb::Collection<Notification> {
        self.mongo.collection::<Notification>(NOTIFICATIONS_COLLECTION)
    }

    /// Turns an audience into concrete recipient ids inside the tenant
    async fn resolve_audience(
        &self,
        school_id: Option<ObjectId>,
        audience: &Audience,
    ) -> ServiceResult<Vec<ObjectId>> {
        let users = UserService::new(self.mongo.clone());
        let mut recipients = match audience {
            Audience::Users { user_ids } => {
                let ids = parse_object_ids(user_ids, "user_id")?;
                let mut filter = doc! { "_id": { "$in": ids }, "is_active": true };
                if let Some(school_id) = school_id {
                    filter.insert("school_id", school_id);
                }
                let docs: Vec<Document> = self
                    .mongo
                    .collection::<Document>(crate::models::user::USERS_COLLECTION)
                    .find(filter)
                    .projection(doc! { "_id": 1 })
                    .await
                    .context("Failed to query recipients")?
                    .try_collect()
                    .await
                    .context("Failed to read recipients")?;
                docs.iter()
                    .filter_map(|d| d.get_object_id("_id").ok())
                    .collect()
            }
            Audience::Role { role } => users.ids_by_role(school_id, Some(*role)).await?,
            Audience::School => {
                let school_id = school_id.ok_or_else(|| {
                    ServiceError::validation("A school audience needs a school-bound sender")
                })?;
                users.ids_by_role(Some(school_id), None).await?
            }
            Audience::Section { section_id } => {
                let id = parse_object_id(section_id, "section_id")?;
                let mut filter = doc! { "_id": id };
                if let Some(school_id) = school_id {
                    filter.insert("school_id", school_id);
                }
                self.mongo
                    .collection::<Section>(SECTIONS_COLLECTION)
                    .find_one(filter)
                    .await
                    .context("Failed to query section")?
                    .ok_or_else(|| ServiceError::not_found("Section not found"))?
                    .students
            }
            Audience::Course { course_id } => {
                let id = parse_object_id(course_id, "course_id")?;
                let mut filter = doc! { "_id": id };
                if let Some(school_id) = school_id {
                    filter.insert("school_id", school_id);
                }
                self.mongo
                    .collection::<Course>(COURSES_COLLECTION)
                    .find_one(filter)
                    .await
                    .context("Failed to query course")?
                    .ok_or_else(|| ServiceError::not_found("Course not found"))?
                    .students
            }
        };

        recipients.sort();
        recipients.dedup();
        Ok(recipients)
    }

    pub async fn create(
        &self,
        claims: &JwtClaims,
        req: CreateNotificationRequest,
    ) -> ServiceResult<SentNotificationResponse> {
        claims.ensure(&SEND_NOTIFICATIONS)?;
        let school_id = claims.scope_school(None)?;
        let recipients = self.resolve_audience(school_id, &req.audience).await?;
        if recipients.is_empty() {
            return Err(ServiceError::validation("Audience resolves to no recipients"));
        }

        let now = Utc::now();
        let scheduled = req.scheduled_at.filter(|at| *at > now);
        let mut notification = Notification {
            id: None,
            school_id,
            sender_id: Some(claims.user_id()?),
            title: req.title.trim().to_string(),
            message: req.message,
            audience: req.audience,
            recipients,
            read_by: Vec::new(),
            status: if scheduled.is_some() {
                NotificationStatus::Scheduled
            } else {
                NotificationStatus::Sent
            },
            scheduled_at: scheduled,
            sent_at: if scheduled.is_some() { None } else { Some(now) },
            created_at: now,
        };

        let inserted = self
            .notifications()
            .insert_one(&notification)
            .await
            .context("Failed to insert notification")?;
        notification.id = inserted.inserted_id.as_object_id();

        tracing::info!(
            notification_id = ?notification.id,
            recipients = notification.recipients.len(),
            status = notification.status.as_str(),
            "Notification created"
        );

        if notification.status == NotificationStatus::Sent {
            self.deliver(&notification).await;
        }
        Ok(SentNotificationResponse::from(notification))
    }

    /// Stores and pushes a system notification, e.g. after grading
    pub async fn notify_users(
        &self,
        school_id: Option<ObjectId>,
        sender_id: Option<ObjectId>,
        title: impl Into<String>,
        message: impl Into<String>,
        recipients: Vec<ObjectId>,
    ) -> ServiceResult<()> {
        let now = Utc::now();
        let mut notification = Notification {
            id: None,
            school_id,
            sender_id,
            title: title.into(),
            message: message.into(),
            audience: Audience::Users {
                user_ids: recipients.iter().map(|id| id.to_hex()).collect(),
            },
            recipients,
            read_by: Vec::new(),
            status: NotificationStatus::Sent,
            scheduled_at: None,
            sent_at: Some(now),
            created_at: now,
        };
        let inserted = self
            .notifications()
            .insert_one(&notification)
            .await
            .context("Failed to insert notification")?;
        notification.id = inserted.inserted_id.as_object_id();

        self.deliver(&notification).await;
        Ok(())
    }

    /// Best-effort realtime push to every recipient
    async fn deliver(&self, notification: &Notification) -> usize {
        let mut reached = 0;
        for recipient in &notification.recipients {
            let event = ServerEvent::NewNotification(notification.view_for(recipient));
            if self.hub.push(&recipient.to_hex(), event).await {
                reached += 1;
            }
        }
        tracing::debug!(
            notification_id = ?notification.id,
            reached,
            total = notification.recipients.len(),
            "Notification pushed"
        );
        reached
    }

    pub async fn list_mine(
        &self,
        user_id: &ObjectId,
        query: ListNotificationsQuery,
    ) -> ServiceResult<Vec<NotificationView>> {
        let mut filter = doc! { "recipients": user_id, "status": NotificationStatus::Sent.as_str() };
        if query.unread_only {
            filter.insert("read_by", doc! { "$ne": user_id });
        }

        let page = Pagination {
            limit: query.limit,
            offset: query.offset,
        };
        let notifications: Vec<Notification> = self
            .notifications()
            .find(filter)
            .sort(doc! { "sent_at": -1, "_id": -1 })
            .skip(page.offset())
            .limit(page.limit())
            .await
            .context("Failed to query notifications")?
            .try_collect()
            .await
            .context("Failed to read notifications")?;

        Ok(notifications.iter().map(|n| n.view_for(user_id)).collect())
    }

    pub async fn unread_count(&self, user_id: &ObjectId) -> ServiceResult<UnreadCountResponse> {
        let unread = self
            .notifications()
            .count_documents(doc! {
                "recipients": user_id,
                "status": NotificationStatus::Sent.as_str(),
                "read_by": { "$ne": user_id },
            })
            .await
            .context("Failed to count unread notifications")?;
        Ok(UnreadCountResponse { unread })
    }

    /// Marks one notification read and tells the user's other sockets
    pub async fn mark_read(&self, user_id: &ObjectId, notification_id: &ObjectId) -> ServiceResult<()> {
        let result = self
            .notifications()
            .update_one(
                doc! {
                    "_id": notification_id,
                    "recipients": user_id,
                    "status": NotificationStatus::Sent.as_str(),
                },
                doc! { "$addToSet": { "read_by": user_id } },
            )
            .await
            .context("Failed to mark notification read")?;
        if result.matched_count == 0 {
            return Err(ServiceError::not_found("Notification not found"));
        }

        self.hub
            .push(
                &user_id.to_hex(),
                ServerEvent::NotificationRead {
                    notification_id: notification_id.to_hex(),
                },
            )
            .await;
        Ok(())
    }

    pub async fn mark_all_read(&self, user_id: &ObjectId) -> ServiceResult<u64> {
        let result = self
            .notifications()
            .update_many(
                doc! {
                    "recipients": user_id,
                    "status": NotificationStatus::Sent.as_str(),
                    "read_by": { "$ne": user_id },
                },
                doc! { "$addToSet": { "read_by": user_id } },
            )
            .await
            .context("Failed to mark notifications read")?;
        Ok(result.modified_count)
    }

    /// Notifications the caller sent, scheduled ones included
    pub async fn list_sent(
        &self,
        claims: &JwtClaims,
        page: Pagination,
    ) -> ServiceResult<Vec<SentNotificationResponse>> {
        claims.ensure(&SEND_NOTIFICATIONS)?;
        let notifications: Vec<Notification> = self
            .notifications()
            .find(doc! { "sender_id": claims.user_id()? })
            .sort(doc! { "createdAt": -1 })
            .skip(page.offset())
            .limit(page.limit())
            .await
            .context("Failed to query sent notifications")?
            .try_collect()
            .await
            .context("Failed to read sent notifications")?;
        Ok(notifications
            .into_iter()
            .map(SentNotificationResponse::from)
            .collect())
    }

    pub async fn delete(&self, claims: &JwtClaims, notification_id: &ObjectId) -> ServiceResult<()> {
        let notification = self
            .notifications()
            .find_one(doc! { "_id": notification_id })
            .await
            .context("Failed to query notification")?
            .ok_or_else(|| ServiceError::not_found("Notification not found"))?;

        let me = claims.user_id()?;
        if notification.sender_id != Some(me) && !claims.is_admin() {
            return Err(ServiceError::forbidden(
                "Only the sender or an admin can delete a notification",
            ));
        }
        claims.ensure_same_school(notification.school_id)?;

        self.notifications()
            .delete_one(doc! { "_id": notification_id })
            .await
            .context("Failed to delete notification")?;
        Ok(())
    }

    /// Sends every scheduled notification that is due. Each one is claimed
    /// with a single conditional update, so two sweeps never both send it.
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> ServiceResult<usize> {
        let mut dispatched = 0;
        loop {
            let claimed = self
                .notifications()
                .find_one_and_update(
                    doc! {
                        "status": NotificationStatus::Scheduled.as_str(),
                        "scheduled_at": { "$lte": chrono_to_bson(now) },
                    },
                    doc! { "$set": {
                        "status": NotificationStatus::Sent.as_str(),
                        "sent_at": chrono_to_bson(now),
                    } },
                )
                .sort(doc! { "scheduled_at": 1 })
                .return_document(ReturnDocument::After)
                .await
                .context("Failed to claim scheduled notification")?;

            let Some(notification) = claimed else {
                break;
            };
            self.deliver(&notification).await;
            dispatched += 1;
        }

        if dispatched > 0 {
            tracing::info!(dispatched, "Scheduled notifications sent");
        }
        Ok(dispatched)
    }
}
