use crate::config::Config;
use crate::models::user::{User, UserRole, USERS_COLLECTION};
use crate::services::auth_service::{hash_password, normalize_email};
use crate::services::user_service::generate_temp_password;
use anyhow::{Context, Result};
use chrono::Utc;
use mongodb::{
    bson::{doc, to_document, Document},
    Database,
};
use serde::Deserialize;
use std::path::Path;
use tokio::fs;

/// Seed file payload: `{ "email": ..., "password": ..., "name": ... }`
#[derive(Debug, Deserialize)]
pub struct SuperuserSeed {
    pub email: String,
    #[serde(default = "default_superuser_name")]
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub metadata: Option<Document>,
    /// Plain-text password; hashed before storage, generated when absent
    pub password: Option<String>,
}

fn default_superuser_name() -> String {
    "Super Admin".to_string()
}

impl SuperuserSeed {
    /// Platform admin without a school. Returns the user and, when the
    /// seed had no password, the generated one.
    fn into_user(self) -> Result<(User, Option<String>)> {
        let (password, generated) = match self.password.filter(|p| !p.is_empty()) {
            Some(password) => (password, None),
            None => {
                let password = generate_temp_password();
                (password.clone(), Some(password))
            }
        };

        let now = Utc::now();
        let user = User {
            id: None,
            email: normalize_email(&self.email),
            password_hash: hash_password(&password)?,
            name: self.name,
            role: UserRole::Admin,
            permissions: Vec::new(),
            school_id: None,
            section_id: None,
            phone: self.phone,
            is_active: true,
            monthly_amount: None,
            payment_history: Vec::new(),
            created_at: now,
            updated_at: now,
            last_login_at: None,
            metadata: self.metadata,
        };
        Ok((user, generated))
    }
}

pub async fn bootstrap(config: &Config, mongo: &Database) -> Result<()> {
    let path = match &config.superuser_seed_file {
        Some(path) if !path.is_empty() => Path::new(path),
        _ => {
            tracing::debug!("No superuser seed file configured, skipping bootstrap");
            return Ok(());
        }
    };

    if !path.exists() {
        tracing::warn!(
            "Superuser seed file {} not found, skipping bootstrap",
            path.display()
        );
        return Ok(());
    }

    let contents = fs::read_to_string(path)
        .await
        .context("Failed to read superuser seed file")?;
    let seed: SuperuserSeed =
        serde_json::from_str(&contents).context("Failed to deserialize superuser seed payload")?;

    let (user, generated) = seed.into_user()?;
    let email = user.email.clone();
    let document = to_document(&user).context("Failed to encode superuser")?;

    let update = mongo
        .collection::<Document>(USERS_COLLECTION)
        .update_one(doc! { "email": &email }, doc! { "$setOnInsert": document })
        .upsert(true)
        .await
        .context("Failed to insert superuser")?;

    if update.upserted_id.is_some() {
        if let Some(password) = generated {
            tracing::warn!(
                email = %email,
                password = %password,
                "Superuser created with a generated password; change it after first login"
            );
        }
        tracing::info!(email = %email, "Superuser inserted; remove seed file to prevent rerun");
    } else {
        tracing::info!(email = %email, "Superuser already exists, seed skipped");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_defaults_and_normalisation() {
        let seed: SuperuserSeed =
            serde_json::from_str(r#"{"email":" Root@School.org ","password":"s3cret-pass"}"#)
                .unwrap();
        let (user, generated) = seed.into_user().unwrap();
        assert_eq!(user.email, "root@school.org");
        assert_eq!(user.name, "Super Admin");
        assert_eq!(user.role, UserRole::Admin);
        assert!(user.school_id.is_none());
        assert!(generated.is_none());
        assert!(bcrypt::verify("s3cret-pass", &user.password_hash).unwrap());
    }

    #[test]
    fn test_missing_password_is_generated() {
        let seed: SuperuserSeed = serde_json::from_str(r#"{"email":"root@school.org"}"#).unwrap();
        let (user, generated) = seed.into_user().unwrap();
        let password = generated.unwrap();
        assert_eq!(password.len(), 12);
        assert!(bcrypt::verify(&password, &user.password_hash).unwrap());
    }
}
