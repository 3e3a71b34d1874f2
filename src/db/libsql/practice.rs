//! Client, matter, appointment and document stores for the libSQL backend.

use chrono::Utc;
use libsql::params;
use uuid::Uuid;

use crate::db::{
    AppointmentRecord, AppointmentStatus, AppointmentStore, ClientRecord, ClientStore,
    CreateAppointmentParams, CreateClientParams, CreateDocumentParams, CreateMatterParams,
    DocumentRecord, DocumentStore, LinkDocumentOutcome, MatterRecord, MatterStatus, MatterStore,
    UpdateAppointmentParams, UpdateClientParams, UpdateMatterParams,
};
use crate::error::DatabaseError;

use super::{
    LibSqlBackend, fmt_date, fmt_ts, get_i64, get_opt_text, get_text, opt_text, parse_date,
    parse_timestamp, parse_timestamp_opt, parse_uuid,
};

const CLIENT_COLS: &str =
    "id, name, email, phone, address, company, national_id, notes, created_at, updated_at";
const MATTER_COLS: &str = "id, matter_number, title, description, client_id, responsible_user, \
     status, opened_on, next_hearing, created_at, updated_at";
const APPOINTMENT_COLS: &str = "id, title, description, owner, client_id, matter_id, starts_at, \
     ends_at, location, status, notes, created_at";
const DOCUMENT_COLS: &str = "id, client_id, matter_id, file_ref, original_filename, doc_type, \
     description, confidential, created_at, updated_at";

fn parse_matter_status(raw: &str) -> Result<MatterStatus, DatabaseError> {
    MatterStatus::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid matter status '{raw}'")))
}

fn parse_appointment_status(raw: &str) -> Result<AppointmentStatus, DatabaseError> {
    AppointmentStatus::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid appointment status '{raw}'")))
}

fn row_to_client_record(row: &libsql::Row) -> Result<ClientRecord, DatabaseError> {
    Ok(ClientRecord {
        id: parse_uuid(&get_text(row, 0), "clients.id")?,
        name: get_text(row, 1),
        email: get_opt_text(row, 2),
        phone: get_opt_text(row, 3),
        address: get_opt_text(row, 4),
        company: get_opt_text(row, 5),
        national_id: get_opt_text(row, 6),
        notes: get_opt_text(row, 7),
        created_at: parse_timestamp(&get_text(row, 8))?,
        updated_at: parse_timestamp(&get_text(row, 9))?,
    })
}

fn row_to_matter_record(row: &libsql::Row) -> Result<MatterRecord, DatabaseError> {
    let status_raw = get_text(row, 6);
    Ok(MatterRecord {
        id: parse_uuid(&get_text(row, 0), "matters.id")?,
        matter_number: get_text(row, 1),
        title: get_text(row, 2),
        description: get_opt_text(row, 3),
        client_id: parse_uuid(&get_text(row, 4), "matters.client_id")?,
        responsible_user: get_text(row, 5),
        status: parse_matter_status(&status_raw)?,
        opened_on: parse_date(&get_text(row, 7))?,
        next_hearing: parse_timestamp_opt(get_opt_text(row, 8))?,
        created_at: parse_timestamp(&get_text(row, 9))?,
        updated_at: parse_timestamp(&get_text(row, 10))?,
    })
}

fn row_to_appointment_record(row: &libsql::Row) -> Result<AppointmentRecord, DatabaseError> {
    let status_raw = get_text(row, 9);
    Ok(AppointmentRecord {
        id: parse_uuid(&get_text(row, 0), "appointments.id")?,
        title: get_text(row, 1),
        description: get_opt_text(row, 2),
        owner: get_text(row, 3),
        client_id: get_opt_text(row, 4)
            .map(|value| parse_uuid(&value, "appointments.client_id"))
            .transpose()?,
        matter_id: get_opt_text(row, 5)
            .map(|value| parse_uuid(&value, "appointments.matter_id"))
            .transpose()?,
        starts_at: parse_timestamp(&get_text(row, 6))?,
        ends_at: parse_timestamp(&get_text(row, 7))?,
        location: get_opt_text(row, 8),
        status: parse_appointment_status(&status_raw)?,
        notes: get_opt_text(row, 10),
        created_at: parse_timestamp(&get_text(row, 11))?,
    })
}

fn row_to_document_record(row: &libsql::Row) -> Result<DocumentRecord, DatabaseError> {
    Ok(DocumentRecord {
        id: parse_uuid(&get_text(row, 0), "documents.id")?,
        client_id: parse_uuid(&get_text(row, 1), "documents.client_id")?,
        matter_id: get_opt_text(row, 2)
            .map(|value| parse_uuid(&value, "documents.matter_id"))
            .transpose()?,
        file_ref: get_text(row, 3),
        original_filename: get_text(row, 4),
        doc_type: get_opt_text(row, 5),
        description: get_opt_text(row, 6),
        confidential: get_i64(row, 7) != 0,
        created_at: parse_timestamp(&get_text(row, 8))?,
        updated_at: parse_timestamp(&get_text(row, 9))?,
    })
}

#[async_trait::async_trait]
impl ClientStore for LibSqlBackend {
    async fn create_client(
        &self,
        input: &CreateClientParams,
    ) -> Result<ClientRecord, DatabaseError> {
        let conn = self.connect().await?;
        let id = Uuid::new_v4().to_string();
        let now = fmt_ts(Utc::now());
        conn.execute(
            "INSERT INTO clients (id, name, email, phone, address, company, national_id, notes, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                id.as_str(),
                input.name.as_str(),
                opt_text(input.email.as_deref()),
                opt_text(input.phone.as_deref()),
                opt_text(input.address.as_deref()),
                opt_text(input.company.as_deref()),
                opt_text(input.national_id.as_deref()),
                opt_text(input.notes.as_deref()),
                now.as_str(),
            ],
        )
        .await?;

        let row = conn
            .query(
                &format!("SELECT {CLIENT_COLS} FROM clients WHERE id = ?1 LIMIT 1"),
                params![id.as_str()],
            )
            .await?
            .next()
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created client".to_string()))?;
        row_to_client_record(&row)
    }

    async fn get_client(&self, client_id: Uuid) -> Result<Option<ClientRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {CLIENT_COLS} FROM clients WHERE id = ?1 LIMIT 1"),
                params![client_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_client_record(&row)).transpose()
    }

    async fn update_client(
        &self,
        client_id: Uuid,
        input: &UpdateClientParams,
    ) -> Result<Option<ClientRecord>, DatabaseError> {
        let conn = self.connect().await?;
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result = async {
            let Some(row) = conn
                .query(
                    &format!("SELECT {CLIENT_COLS} FROM clients WHERE id = ?1 LIMIT 1"),
                    params![client_id.to_string()],
                )
                .await?
                .next()
                .await?
            else {
                return Ok(None);
            };
            let mut client = row_to_client_record(&row)?;

            if let Some(name) = &input.name {
                client.name = name.clone();
            }
            if let Some(email) = &input.email {
                client.email = email.clone();
            }
            if let Some(phone) = &input.phone {
                client.phone = phone.clone();
            }
            if let Some(address) = &input.address {
                client.address = address.clone();
            }
            if let Some(company) = &input.company {
                client.company = company.clone();
            }
            if let Some(national_id) = &input.national_id {
                client.national_id = national_id.clone();
            }
            if let Some(notes) = &input.notes {
                client.notes = notes.clone();
            }

            conn.execute(
                "UPDATE clients SET name = ?2, email = ?3, phone = ?4, address = ?5, \
                 company = ?6, national_id = ?7, notes = ?8, updated_at = ?9 WHERE id = ?1",
                params![
                    client_id.to_string(),
                    client.name.as_str(),
                    opt_text(client.email.as_deref()),
                    opt_text(client.phone.as_deref()),
                    opt_text(client.address.as_deref()),
                    opt_text(client.company.as_deref()),
                    opt_text(client.national_id.as_deref()),
                    opt_text(client.notes.as_deref()),
                    fmt_ts(Utc::now()),
                ],
            )
            .await?;

            let row = conn
                .query(
                    &format!("SELECT {CLIENT_COLS} FROM clients WHERE id = ?1 LIMIT 1"),
                    params![client_id.to_string()],
                )
                .await?
                .next()
                .await?
                .ok_or_else(|| DatabaseError::Query("failed to load updated client".to_string()))?;
            row_to_client_record(&row).map(Some)
        }
        .await;

        match result {
            Ok(record) => {
                conn.execute("COMMIT", ()).await?;
                Ok(record)
            }
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(err)
            }
        }
    }

    async fn list_clients(&self, query: Option<&str>) -> Result<Vec<ClientRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = match query {
            Some(q) => {
                let like = format!("%{q}%");
                conn.query(
                    &format!(
                        "SELECT {CLIENT_COLS} FROM clients \
                         WHERE name LIKE ?1 COLLATE NOCASE ORDER BY name ASC"
                    ),
                    params![like],
                )
                .await?
            }
            None => {
                conn.query(
                    &format!("SELECT {CLIENT_COLS} FROM clients ORDER BY name ASC"),
                    (),
                )
                .await?
            }
        };

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_client_record(&row)?);
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl MatterStore for LibSqlBackend {
    async fn create_matter(
        &self,
        input: &CreateMatterParams,
    ) -> Result<MatterRecord, DatabaseError> {
        let conn = self.connect().await?;
        let id = Uuid::new_v4().to_string();
        let now = fmt_ts(Utc::now());
        conn.execute(
            "INSERT INTO matters (id, matter_number, title, description, client_id, \
             responsible_user, status, opened_on, next_hearing, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                id.as_str(),
                input.matter_number.as_str(),
                input.title.as_str(),
                opt_text(input.description.as_deref()),
                input.client_id.to_string(),
                input.responsible_user.as_str(),
                input.status.as_str(),
                fmt_date(input.opened_on),
                opt_text(input.next_hearing.map(fmt_ts).as_deref()),
                now.as_str(),
            ],
        )
        .await?;

        let row = conn
            .query(
                &format!("SELECT {MATTER_COLS} FROM matters WHERE id = ?1 LIMIT 1"),
                params![id.as_str()],
            )
            .await?
            .next()
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created matter".to_string()))?;
        row_to_matter_record(&row)
    }

    async fn get_matter(&self, matter_id: Uuid) -> Result<Option<MatterRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {MATTER_COLS} FROM matters WHERE id = ?1 LIMIT 1"),
                params![matter_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_matter_record(&row)).transpose()
    }

    async fn get_matter_by_number(
        &self,
        matter_number: &str,
    ) -> Result<Option<MatterRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {MATTER_COLS} FROM matters WHERE matter_number = ?1 LIMIT 1"),
                params![matter_number],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_matter_record(&row)).transpose()
    }

    async fn update_matter(
        &self,
        matter_id: Uuid,
        input: &UpdateMatterParams,
    ) -> Result<Option<MatterRecord>, DatabaseError> {
        let conn = self.connect().await?;
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result = async {
            let Some(row) = conn
                .query(
                    &format!("SELECT {MATTER_COLS} FROM matters WHERE id = ?1 LIMIT 1"),
                    params![matter_id.to_string()],
                )
                .await?
                .next()
                .await?
            else {
                return Ok(None);
            };
            let mut matter = row_to_matter_record(&row)?;

            if let Some(title) = &input.title {
                matter.title = title.clone();
            }
            if let Some(description) = &input.description {
                matter.description = description.clone();
            }
            if let Some(responsible_user) = &input.responsible_user {
                matter.responsible_user = responsible_user.clone();
            }
            if let Some(status) = input.status {
                matter.status = status;
            }
            if let Some(opened_on) = input.opened_on {
                matter.opened_on = opened_on;
            }
            if let Some(next_hearing) = input.next_hearing {
                matter.next_hearing = next_hearing;
            }

            conn.execute(
                "UPDATE matters SET title = ?2, description = ?3, responsible_user = ?4, \
                 status = ?5, opened_on = ?6, next_hearing = ?7, updated_at = ?8 WHERE id = ?1",
                params![
                    matter_id.to_string(),
                    matter.title.as_str(),
                    opt_text(matter.description.as_deref()),
                    matter.responsible_user.as_str(),
                    matter.status.as_str(),
                    fmt_date(matter.opened_on),
                    opt_text(matter.next_hearing.map(fmt_ts).as_deref()),
                    fmt_ts(Utc::now()),
                ],
            )
            .await?;

            let row = conn
                .query(
                    &format!("SELECT {MATTER_COLS} FROM matters WHERE id = ?1 LIMIT 1"),
                    params![matter_id.to_string()],
                )
                .await?
                .next()
                .await?
                .ok_or_else(|| DatabaseError::Query("failed to load updated matter".to_string()))?;
            row_to_matter_record(&row).map(Some)
        }
        .await;

        match result {
            Ok(record) => {
                conn.execute("COMMIT", ()).await?;
                Ok(record)
            }
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(err)
            }
        }
    }

    async fn list_matters(
        &self,
        client_id: Option<Uuid>,
    ) -> Result<Vec<MatterRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = match client_id {
            Some(client_id) => {
                conn.query(
                    &format!(
                        "SELECT {MATTER_COLS} FROM matters WHERE client_id = ?1 \
                         ORDER BY opened_on DESC, matter_number ASC"
                    ),
                    params![client_id.to_string()],
                )
                .await?
            }
            None => {
                conn.query(
                    &format!(
                        "SELECT {MATTER_COLS} FROM matters \
                         ORDER BY opened_on DESC, matter_number ASC"
                    ),
                    (),
                )
                .await?
            }
        };

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_matter_record(&row)?);
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl AppointmentStore for LibSqlBackend {
    async fn create_appointment(
        &self,
        input: &CreateAppointmentParams,
    ) -> Result<AppointmentRecord, DatabaseError> {
        let conn = self.connect().await?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO appointments (id, title, description, owner, client_id, matter_id, \
             starts_at, ends_at, location, status, notes, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                id.as_str(),
                input.title.as_str(),
                opt_text(input.description.as_deref()),
                input.owner.as_str(),
                opt_text(input.client_id.map(|v| v.to_string()).as_deref()),
                opt_text(input.matter_id.map(|v| v.to_string()).as_deref()),
                fmt_ts(input.starts_at),
                fmt_ts(input.ends_at),
                opt_text(input.location.as_deref()),
                input.status.as_str(),
                opt_text(input.notes.as_deref()),
                fmt_ts(Utc::now()),
            ],
        )
        .await?;

        let row = conn
            .query(
                &format!("SELECT {APPOINTMENT_COLS} FROM appointments WHERE id = ?1 LIMIT 1"),
                params![id.as_str()],
            )
            .await?
            .next()
            .await?
            .ok_or_else(|| {
                DatabaseError::Query("failed to load created appointment".to_string())
            })?;
        row_to_appointment_record(&row)
    }

    async fn get_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<AppointmentRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {APPOINTMENT_COLS} FROM appointments WHERE id = ?1 LIMIT 1"),
                params![appointment_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_appointment_record(&row)).transpose()
    }

    async fn update_appointment(
        &self,
        appointment_id: Uuid,
        input: &UpdateAppointmentParams,
    ) -> Result<Option<AppointmentRecord>, DatabaseError> {
        let conn = self.connect().await?;
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result = async {
            let Some(row) = conn
                .query(
                    &format!("SELECT {APPOINTMENT_COLS} FROM appointments WHERE id = ?1 LIMIT 1"),
                    params![appointment_id.to_string()],
                )
                .await?
                .next()
                .await?
            else {
                return Ok(None);
            };
            let mut appointment = row_to_appointment_record(&row)?;

            if let Some(title) = &input.title {
                appointment.title = title.clone();
            }
            if let Some(description) = &input.description {
                appointment.description = description.clone();
            }
            if let Some(starts_at) = input.starts_at {
                appointment.starts_at = starts_at;
            }
            if let Some(ends_at) = input.ends_at {
                appointment.ends_at = ends_at;
            }
            if let Some(location) = &input.location {
                appointment.location = location.clone();
            }
            if let Some(status) = input.status {
                appointment.status = status;
            }
            if let Some(notes) = &input.notes {
                appointment.notes = notes.clone();
            }

            conn.execute(
                "UPDATE appointments SET title = ?2, description = ?3, starts_at = ?4, \
                 ends_at = ?5, location = ?6, status = ?7, notes = ?8 WHERE id = ?1",
                params![
                    appointment_id.to_string(),
                    appointment.title.as_str(),
                    opt_text(appointment.description.as_deref()),
                    fmt_ts(appointment.starts_at),
                    fmt_ts(appointment.ends_at),
                    opt_text(appointment.location.as_deref()),
                    appointment.status.as_str(),
                    opt_text(appointment.notes.as_deref()),
                ],
            )
            .await?;

            let row = conn
                .query(
                    &format!("SELECT {APPOINTMENT_COLS} FROM appointments WHERE id = ?1 LIMIT 1"),
                    params![appointment_id.to_string()],
                )
                .await?
                .next()
                .await?
                .ok_or_else(|| {
                    DatabaseError::Query("failed to load updated appointment".to_string())
                })?;
            row_to_appointment_record(&row).map(Some)
        }
        .await;

        match result {
            Ok(record) => {
                conn.execute("COMMIT", ()).await?;
                Ok(record)
            }
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(err)
            }
        }
    }

    async fn list_appointments(
        &self,
        client_id: Option<Uuid>,
        matter_id: Option<Uuid>,
    ) -> Result<Vec<AppointmentRecord>, DatabaseError> {
        let conn = self.connect().await?;

        let mut conditions: Vec<String> = Vec::new();
        let mut values: Vec<libsql::Value> = Vec::new();
        if let Some(client_id) = client_id {
            values.push(libsql::Value::Text(client_id.to_string()));
            conditions.push(format!("client_id = ?{}", values.len()));
        }
        if let Some(matter_id) = matter_id {
            values.push(libsql::Value::Text(matter_id.to_string()));
            conditions.push(format!("matter_id = ?{}", values.len()));
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {} ", conditions.join(" AND "))
        };

        let mut rows = conn
            .query(
                &format!(
                    "SELECT {APPOINTMENT_COLS} FROM appointments {where_clause}ORDER BY starts_at ASC"
                ),
                values,
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_appointment_record(&row)?);
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl DocumentStore for LibSqlBackend {
    async fn create_document(
        &self,
        input: &CreateDocumentParams,
    ) -> Result<DocumentRecord, DatabaseError> {
        let conn = self.connect().await?;
        let id = Uuid::new_v4().to_string();
        let now = fmt_ts(Utc::now());
        conn.execute(
            "INSERT INTO documents (id, client_id, matter_id, file_ref, original_filename, \
             doc_type, description, confidential, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                id.as_str(),
                input.client_id.to_string(),
                opt_text(input.matter_id.map(|v| v.to_string()).as_deref()),
                input.file_ref.as_str(),
                input.original_filename.as_str(),
                opt_text(input.doc_type.as_deref()),
                opt_text(input.description.as_deref()),
                i64::from(input.confidential),
                now.as_str(),
            ],
        )
        .await?;

        let row = conn
            .query(
                &format!("SELECT {DOCUMENT_COLS} FROM documents WHERE id = ?1 LIMIT 1"),
                params![id.as_str()],
            )
            .await?
            .next()
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created document".to_string()))?;
        row_to_document_record(&row)
    }

    async fn get_document(
        &self,
        document_id: Uuid,
    ) -> Result<Option<DocumentRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {DOCUMENT_COLS} FROM documents WHERE id = ?1 LIMIT 1"),
                params![document_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_document_record(&row)).transpose()
    }

    async fn list_documents(
        &self,
        client_id: Option<Uuid>,
        matter_id: Option<Uuid>,
    ) -> Result<Vec<DocumentRecord>, DatabaseError> {
        let conn = self.connect().await?;

        let mut conditions: Vec<String> = Vec::new();
        let mut values: Vec<libsql::Value> = Vec::new();
        if let Some(client_id) = client_id {
            values.push(libsql::Value::Text(client_id.to_string()));
            conditions.push(format!("client_id = ?{}", values.len()));
        }
        if let Some(matter_id) = matter_id {
            values.push(libsql::Value::Text(matter_id.to_string()));
            conditions.push(format!("matter_id = ?{}", values.len()));
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {} ", conditions.join(" AND "))
        };

        let mut rows = conn
            .query(
                &format!(
                    "SELECT {DOCUMENT_COLS} FROM documents {where_clause}ORDER BY created_at DESC"
                ),
                values,
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_document_record(&row)?);
        }
        Ok(out)
    }

    async fn link_document(
        &self,
        document_id: Uuid,
        matter_id: Uuid,
    ) -> Result<LinkDocumentOutcome, DatabaseError> {
        let conn = self.connect().await?;
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result = async {
            let Some(row) = conn
                .query(
                    &format!("SELECT {DOCUMENT_COLS} FROM documents WHERE id = ?1 LIMIT 1"),
                    params![document_id.to_string()],
                )
                .await?
                .next()
                .await?
            else {
                return Ok(LinkDocumentOutcome::DocumentNotFound);
            };
            let document = row_to_document_record(&row)?;

            let Some(matter_row) = conn
                .query(
                    "SELECT client_id FROM matters WHERE id = ?1 LIMIT 1",
                    params![matter_id.to_string()],
                )
                .await?
                .next()
                .await?
            else {
                return Ok(LinkDocumentOutcome::MatterNotFound);
            };
            let matter_client = parse_uuid(&get_text(&matter_row, 0), "matters.client_id")?;
            if matter_client != document.client_id {
                return Ok(LinkDocumentOutcome::OwnershipMismatch {
                    document_client: document.client_id,
                    matter_client,
                });
            }

            conn.execute(
                "UPDATE documents SET matter_id = ?2, updated_at = ?3 WHERE id = ?1",
                params![
                    document_id.to_string(),
                    matter_id.to_string(),
                    fmt_ts(Utc::now()),
                ],
            )
            .await?;

            let row = conn
                .query(
                    &format!("SELECT {DOCUMENT_COLS} FROM documents WHERE id = ?1 LIMIT 1"),
                    params![document_id.to_string()],
                )
                .await?
                .next()
                .await?
                .ok_or_else(|| {
                    DatabaseError::Query("failed to load linked document".to_string())
                })?;
            row_to_document_record(&row).map(LinkDocumentOutcome::Linked)
        }
        .await;

        match result {
            Ok(outcome) => {
                conn.execute("COMMIT", ()).await?;
                Ok(outcome)
            }
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(err)
            }
        }
    }

    async fn unlink_document(
        &self,
        document_id: Uuid,
    ) -> Result<Option<DocumentRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let affected = conn
            .execute(
                "UPDATE documents SET matter_id = NULL, updated_at = ?2 WHERE id = ?1",
                params![document_id.to_string(), fmt_ts(Utc::now())],
            )
            .await?;
        if affected == 0 {
            return Ok(None);
        }

        let row = conn
            .query(
                &format!("SELECT {DOCUMENT_COLS} FROM documents WHERE id = ?1 LIMIT 1"),
                params![document_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_document_record(&row)).transpose()
    }
}
