use anyhow::{anyhow, Context};
use chrono::{NaiveDate, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, from_document, to_bson, to_document, Document},
    Database,
};
use serde::Serialize;

use crate::error::ServiceResult;
use crate::models::settings::{
    billing_period, is_due, DueDateConfig, UpdateDueDatesRequest, DUE_DATES_KEY,
    SETTINGS_COLLECTION,
};
use crate::models::user::{PaymentEntry, PaymentKind, PaymentStatus, User, UserRole, USERS_COLLECTION};
use crate::utils::time::chrono_to_bson;

pub struct DueDateService {
    mongo: Database,
}

/// Outcome of one payment-due run
#[derive(Debug, Default, Serialize, PartialEq)]
pub struct PaymentRunReport {
    pub period: String,
    pub fee_entries: u64,
    pub salary_entries: u64,
}

/// Amount a user owes or is owed for one period, if any
pub fn amount_for(user: &User, kind: PaymentKind, config: &DueDateConfig) -> Option<f64> {
    if !user.is_active {
        return None;
    }
    let amount = match kind {
        PaymentKind::Fee if user.role == UserRole::Student => {
            user.monthly_amount.or(config.fee_amount_default)
        }
        PaymentKind::Salary if user.role.is_salaried() => user.monthly_amount,
        _ => None,
    };
    amount.filter(|a| *a > 0.0)
}

impl DueDateService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn settings(&self) -> mongodb::Collection<Document> {
        self.mongo.collection::<Document>(SETTINGS_COLLECTION)
    }

    pub async fn get(&self) -> ServiceResult<DueDateConfig> {
        let stored = self
            .settings()
            .find_one(doc! { "key": DUE_DATES_KEY })
            .await
            .context("Failed to query due-date settings")?;

        match stored.and_then(|d| d.get_document("value").ok().cloned()) {
            Some(value) => Ok(from_document(value)
                .map_err(|e| anyhow!("Failed to parse due-date settings: {e}"))?),
            None => Ok(DueDateConfig::default()),
        }
    }

    async fn save(&self, config: &DueDateConfig) -> ServiceResult<()> {
        let value = to_document(config).context("Failed to encode due-date settings")?;
        self.settings()
            .update_one(
                doc! { "key": DUE_DATES_KEY },
                doc! { "$set": { "value": value, "updatedAt": chrono_to_bson(Utc::now()) } },
            )
            .upsert(true)
            .await
            .context("Failed to save due-date settings")?;
        Ok(())
    }

    pub async fn update(&self, req: UpdateDueDatesRequest) -> ServiceResult<DueDateConfig> {
        let mut config = self.get().await?;
        if let Some(day) = req.fee_due_day {
            config.fee_due_day = day;
        }
        if let Some(day) = req.salary_due_day {
            config.salary_due_day = day;
        }
        if let Some(amount) = req.fee_amount_default {
            config.fee_amount_default = Some(amount);
        }
        config.updated_at = Some(Utc::now());
        self.save(&config).await?;

        tracing::info!(
            fee_due_day = config.fee_due_day,
            salary_due_day = config.salary_due_day,
            "Due-date settings updated"
        );
        Ok(config)
    }

    /// Pushes pending fee/salary entries for the current period once the
    /// due day is reached. Safe to run repeatedly: each user gets at most
    /// one entry per period and kind.
    pub async fn run_payment_check(&self, today: NaiveDate) -> ServiceResult<PaymentRunReport> {
        let mut config = self.get().await?;
        let period = billing_period(today);
        let mut report = PaymentRunReport {
            period: period.clone(),
            ..Default::default()
        };

        if is_due(config.fee_due_day, today)
            && config.last_fee_period.as_deref() != Some(period.as_str())
        {
            report.fee_entries = self
                .push_entries(PaymentKind::Fee, &period, &config, &[UserRole::Student])
                .await?;
            config.last_fee_period = Some(period.clone());
            self.save(&config).await?;
        }

        if is_due(config.salary_due_day, today)
            && config.last_salary_period.as_deref() != Some(period.as_str())
        {
            report.salary_entries = self
                .push_entries(
                    PaymentKind::Salary,
                    &period,
                    &config,
                    &[UserRole::Teacher, UserRole::Faculty],
                )
                .await?;
            config.last_salary_period = Some(period.clone());
            self.save(&config).await?;
        }

        if report.fee_entries + report.salary_entries > 0 {
            tracing::info!(
                period = %report.period,
                fee_entries = report.fee_entries,
                salary_entries = report.salary_entries,
                "Payment entries created"
            );
        }
        Ok(report)
    }

    async fn push_entries(
        &self,
        kind: PaymentKind,
        period: &str,
        config: &DueDateConfig,
        roles: &[UserRole],
    ) -> ServiceResult<u64> {
        let users = self.mongo.collection::<User>(USERS_COLLECTION);
        let roles: Vec<&str> = roles.iter().map(|r| r.as_str()).collect();
        let mut cursor = users
            .find(doc! { "role": { "$in": roles }, "is_active": true })
            .await
            .context("Failed to query billable users")?;

        let mut created = 0;
        while let Some(user) = cursor.try_next().await.context("Failed to read user")? {
            let (Some(user_id), Some(amount)) = (user.id, amount_for(&user, kind, config)) else {
                continue;
            };
            let now = Utc::now();
            let entry = PaymentEntry {
                period: period.to_string(),
                kind,
                amount,
                status: PaymentStatus::Pending,
                created_at: now,
                paid_at: None,
            };

            let result = users
                .update_one(
                    doc! {
                        "_id": user_id,
                        "payment_history": {
                            "$not": { "$elemMatch": { "period": period, "kind": kind.as_str() } }
                        },
                    },
                    doc! {
                        "$push": { "payment_history": to_bson(&entry).context("Failed to encode payment entry")? },
                        "$set": { "updatedAt": chrono_to_bson(now) },
                    },
                )
                .await
                .context("Failed to push payment entry")?;
            created += result.modified_count;
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: UserRole, monthly_amount: Option<f64>, is_active: bool) -> User {
        let now = Utc::now();
        User {
            id: Some(mongodb::bson::oid::ObjectId::new()),
            email: "u@example.com".to_string(),
            password_hash: String::new(),
            name: "U".to_string(),
            role,
            permissions: vec![],
            school_id: None,
            section_id: None,
            phone: None,
            is_active,
            monthly_amount,
            payment_history: vec![],
            created_at: now,
            updated_at: now,
            last_login_at: None,
            metadata: None,
        }
    }

    #[test]
    fn test_student_fee_falls_back_to_default() {
        let config = DueDateConfig {
            fee_amount_default: Some(120.0),
            ..Default::default()
        };
        assert_eq!(
            amount_for(&user(UserRole::Student, None, true), PaymentKind::Fee, &config),
            Some(120.0)
        );
        assert_eq!(
            amount_for(&user(UserRole::Student, Some(90.0), true), PaymentKind::Fee, &config),
            Some(90.0)
        );
    }

    #[test]
    fn test_salary_requires_own_amount() {
        let config = DueDateConfig {
            fee_amount_default: Some(120.0),
            ..Default::default()
        };
        assert_eq!(
            amount_for(&user(UserRole::Teacher, None, true), PaymentKind::Salary, &config),
            None
        );
        assert_eq!(
            amount_for(&user(UserRole::Faculty, Some(2500.0), true), PaymentKind::Salary, &config),
            Some(2500.0)
        );
    }

    #[test]
    fn test_inactive_and_mismatched_roles_skipped() {
        let config = DueDateConfig {
            fee_amount_default: Some(120.0),
            ..Default::default()
        };
        assert_eq!(
            amount_for(&user(UserRole::Student, Some(90.0), false), PaymentKind::Fee, &config),
            None
        );
        assert_eq!(
            amount_for(&user(UserRole::Teacher, Some(90.0), true), PaymentKind::Fee, &config),
            None
        );
        assert_eq!(
            amount_for(&user(UserRole::Admin, Some(90.0), true), PaymentKind::Salary, &config),
            None
        );
    }
}
