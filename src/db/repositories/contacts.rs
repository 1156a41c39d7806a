use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};

use crate::{
    db::{connection::Database, helpers::non_empty},
    notify::ContactSource,
};

impl Database {
    pub async fn personnel_mobile(&self, personnel_ref: &str) -> Result<Option<String>> {
        let personnel_ref = personnel_ref.to_string();
        self.execute(move |conn| {
            let mobile: Option<Option<String>> = conn
                .query_row(
                    "SELECT mobile FROM personnel WHERE ref_no = ?1",
                    params![personnel_ref],
                    |row| row.get(0),
                )
                .optional()
                .context("failed to read personnel mobile")?;
            Ok(non_empty(mobile.flatten()))
        })
        .await
    }

    pub async fn guardian_phone(&self, personnel_ref: &str) -> Result<Option<String>> {
        let personnel_ref = personnel_ref.to_string();
        self.execute(move |conn| {
            let phone: Option<String> = conn
                .query_row(
                    "SELECT phone FROM guardian_contacts
                     WHERE personnel_ref = ?1 AND TRIM(COALESCE(phone, '')) <> ''
                     ORDER BY id ASC
                     LIMIT 1",
                    params![personnel_ref],
                    |row| row.get(0),
                )
                .optional()
                .context("failed to read guardian contact")?;
            Ok(non_empty(phone))
        })
        .await
    }

    pub async fn add_guardian_contact(&self, personnel_ref: &str, phone: &str) -> Result<()> {
        let (personnel_ref, phone) = (personnel_ref.to_string(), phone.to_string());
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO guardian_contacts (personnel_ref, phone) VALUES (?1, ?2)",
                params![personnel_ref, phone],
            )
            .context("failed to insert guardian contact")?;
            Ok(())
        })
        .await
    }
}

/// Mobile number stored on the personnel record itself.
#[derive(Clone)]
pub struct PersonnelContacts(pub Database);

/// Numbers registered for a guardian or emergency contact.
#[derive(Clone)]
pub struct GuardianContacts(pub Database);

#[async_trait]
impl ContactSource for PersonnelContacts {
    fn name(&self) -> &'static str {
        "personnel"
    }

    async fn lookup(&self, subject_ref: &str) -> Result<Option<String>> {
        self.0.personnel_mobile(subject_ref).await
    }
}

#[async_trait]
impl ContactSource for GuardianContacts {
    fn name(&self) -> &'static str {
        "guardian"
    }

    async fn lookup(&self, subject_ref: &str) -> Result<Option<String>> {
        self.0.guardian_phone(subject_ref).await
    }
}
