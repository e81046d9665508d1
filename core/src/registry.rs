//! Petition registry: creation (with the legacy wipe-and-recreate mode),
//! owner-scoped edits, and activation-aware reads.
//!
//! Sole writer of `petitions`, `surveys`, `survey_options` and
//! `issued_public_ids`.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};

use crate::activation::is_visible;
use crate::db::{execute_in_transaction, execute_read_snapshot, is_unique_violation};
use crate::errors::{PetitionError, Result};
use crate::model::{
    Caller, NewPetition, OptionId, Petition, PetitionDetail, PetitionId, PetitionUpdate,
    QuestionType, Survey, SurveyId, SurveyOption, UserId, from_millis, to_millis,
};
use crate::public_id::PublicId;
use crate::survey::prepare_surveys;

/// Attempts at drawing an unused public id before giving up.
const MAX_ID_ATTEMPTS: usize = 8;

const PETITION_SELECT: &str = r#"
    SELECT p.id, p.public_id, p.title, p.content, p.created_at, p.activated_at, p.creator_id,
           (SELECT COUNT(*) FROM signatures s WHERE s.petition_id = p.id)
    FROM petitions p
"#;

/// Create a petition with its surveys and options in one transaction.
///
/// In single-petition mode every existing petition, survey, option,
/// signature and response is deleted first, inside the same transaction, so
/// readers see either the old graph or the new one. In multi-petition mode
/// creation is non-destructive and requires an authenticated caller.
pub fn create_petition(
    conn: &mut Connection,
    single_petition_mode: bool,
    caller: &Caller,
    new: NewPetition,
    now: DateTime<Utc>,
) -> Result<PublicId> {
    let (title, content) = validate_text(&new.title, &new.content)?;
    let surveys = prepare_surveys(new.surveys)?;

    let creator = caller.user().cloned();
    if !single_petition_mode && creator.is_none() {
        return Err(PetitionError::Unauthenticated);
    }

    execute_in_transaction(conn, TransactionBehavior::Immediate, |tx| {
        let wiped = if single_petition_mode {
            wipe_all(tx)?
        } else {
            0
        };

        let public_id = issue_public_id(tx, now, PublicId::generate)?;

        tx.execute(
            r#"
            INSERT INTO petitions (public_id, title, content, created_at, activated_at, creator_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                public_id.as_str(),
                title,
                content,
                to_millis(now),
                new.activated_at.map(to_millis),
                creator.as_ref().map(|u| u.0.as_str()),
            ],
        )?;
        let petition_id = tx.last_insert_rowid();

        for (survey_order, survey) in surveys.iter().enumerate() {
            tx.execute(
                r#"
                INSERT INTO surveys (petition_id, title, question_type, sort_order)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![
                    petition_id,
                    survey.title,
                    survey.question_type.as_str(),
                    survey_order as i64
                ],
            )?;
            let survey_id = tx.last_insert_rowid();

            for (option_order, option) in survey.options.iter().enumerate() {
                tx.execute(
                    r#"
                    INSERT INTO survey_options (survey_id, label, sort_order)
                    VALUES (?1, ?2, ?3)
                    "#,
                    params![survey_id, option.label, option_order as i64],
                )?;
            }
        }

        tracing::info!(
            petition_id,
            public_id = %public_id,
            surveys = surveys.len(),
            wiped,
            scheduled = new.activated_at.is_some(),
            "Petition created"
        );

        Ok(public_id)
    })
}

/// Change title, content and activation time. Surveys are left untouched.
pub fn update_petition(
    conn: &mut Connection,
    public_id: &PublicId,
    caller: &Caller,
    update: PetitionUpdate,
) -> Result<Petition> {
    let user = require_user(caller)?;
    let (title, content) = validate_text(&update.title, &update.content)?;

    execute_in_transaction(conn, TransactionBehavior::Immediate, |tx| {
        let petition = find_by_public_id(tx, public_id)?.ok_or(PetitionError::NotFound)?;
        authorize_owner(&petition, user)?;

        tx.execute(
            r#"
            UPDATE petitions
            SET title = ?2, content = ?3, activated_at = ?4
            WHERE id = ?1
            "#,
            params![
                petition.id.0,
                title,
                content,
                update.activated_at.map(to_millis)
            ],
        )?;

        tracing::info!(public_id = %public_id, "Petition updated");

        find_by_public_id(tx, public_id)?.ok_or(PetitionError::NotFound)
    })
}

/// Delete a petition; surveys, options, signatures and responses cascade.
pub fn delete_petition(conn: &mut Connection, public_id: &PublicId, caller: &Caller) -> Result<()> {
    let user = require_user(caller)?;

    execute_in_transaction(conn, TransactionBehavior::Immediate, |tx| {
        let petition = find_by_public_id(tx, public_id)?.ok_or(PetitionError::NotFound)?;
        authorize_owner(&petition, user)?;

        tx.execute("DELETE FROM petitions WHERE id = ?1", params![petition.id.0])?;

        tracing::info!(
            public_id = %public_id,
            signatures = petition.signature_count,
            "Petition deleted"
        );
        Ok(())
    })
}

/// Public fetch. A petition that is not yet active is reported as absent.
pub fn get_public_petition(
    conn: &mut Connection,
    public_id: &PublicId,
    now: DateTime<Utc>,
) -> Result<PetitionDetail> {
    execute_read_snapshot(conn, |conn| {
        let petition = find_visible(conn, public_id, now)?;
        let surveys = load_surveys(conn, petition.id)?;
        Ok(PetitionDetail { petition, surveys })
    })
}

/// Creator-only fetch, ignoring the activation gate.
pub fn get_owned_petition(
    conn: &mut Connection,
    public_id: &PublicId,
    caller: &Caller,
) -> Result<PetitionDetail> {
    execute_read_snapshot(conn, |conn| {
        let petition = find_owned(conn, public_id, caller)?;
        let surveys = load_surveys(conn, petition.id)?;
        Ok(PetitionDetail { petition, surveys })
    })
}

/// The newest petition that public callers may currently see.
pub fn find_active_petition_for_public(
    conn: &mut Connection,
    now: DateTime<Utc>,
) -> Result<Option<PetitionDetail>> {
    execute_read_snapshot(conn, |conn| {
        let Some(petition) = find_latest_visible(conn, now)? else {
            return Ok(None);
        };
        let surveys = load_surveys(conn, petition.id)?;
        Ok(Some(PetitionDetail { petition, surveys }))
    })
}

/// Petitions created by the caller, newest first, with signature counts.
pub fn list_owned(conn: &Connection, caller: &Caller) -> Result<Vec<Petition>> {
    let user = require_user(caller)?;

    let mut stmt = conn.prepare(&format!(
        "{PETITION_SELECT} WHERE p.creator_id = ?1 ORDER BY p.created_at DESC, p.id DESC"
    ))?;
    let rows = stmt.query_map(params![user.0], map_petition)?;

    let mut petitions = Vec::new();
    for row in rows {
        petitions.push(row?);
    }
    Ok(petitions)
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared lookups (also used by the ledger and results)
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn find_by_public_id(conn: &Connection, public_id: &PublicId) -> Result<Option<Petition>> {
    Ok(conn
        .query_row(
            &format!("{PETITION_SELECT} WHERE p.public_id = ?1"),
            params![public_id.as_str()],
            map_petition,
        )
        .optional()?)
}

/// Look up a petition through the activation gate.
pub(crate) fn find_visible(
    conn: &Connection,
    public_id: &PublicId,
    now: DateTime<Utc>,
) -> Result<Petition> {
    match find_by_public_id(conn, public_id)? {
        Some(petition) if is_visible(petition.activated_at, now) => Ok(petition),
        _ => Err(PetitionError::NotFound),
    }
}

/// Newest petition past its activation time.
pub(crate) fn find_latest_visible(conn: &Connection, now: DateTime<Utc>) -> Result<Option<Petition>> {
    let mut stmt = conn.prepare(&format!(
        "{PETITION_SELECT} ORDER BY p.created_at DESC, p.id DESC"
    ))?;
    let rows = stmt.query_map([], map_petition)?;

    for row in rows {
        let petition = row?;
        if petition.is_visible_at(now) {
            return Ok(Some(petition));
        }
    }
    Ok(None)
}

/// Look up a petition the caller created.
pub(crate) fn find_owned(conn: &Connection, public_id: &PublicId, caller: &Caller) -> Result<Petition> {
    let user = require_user(caller)?;
    let petition = find_by_public_id(conn, public_id)?.ok_or(PetitionError::NotFound)?;
    authorize_owner(&petition, user)?;
    Ok(petition)
}

/// Surveys of a petition with their options, both in display order.
pub(crate) fn load_surveys(conn: &Connection, petition_id: PetitionId) -> Result<Vec<Survey>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, petition_id, title, question_type, sort_order
        FROM surveys
        WHERE petition_id = ?1
        ORDER BY sort_order ASC
        "#,
    )?;
    let rows = stmt.query_map(params![petition_id.0], |row| {
        let raw_type: String = row.get(3)?;
        let question_type = QuestionType::parse(&raw_type).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(3, raw_type, rusqlite::types::Type::Text)
        })?;
        Ok(Survey {
            id: SurveyId(row.get(0)?),
            petition_id: PetitionId(row.get(1)?),
            title: row.get(2)?,
            question_type,
            order: row.get(4)?,
            options: Vec::new(),
        })
    })?;

    let mut surveys = Vec::new();
    for row in rows {
        surveys.push(row?);
    }

    let mut stmt = conn.prepare(
        r#"
        SELECT o.id, o.survey_id, o.label, o.sort_order
        FROM survey_options o
        JOIN surveys s ON s.id = o.survey_id
        WHERE s.petition_id = ?1
        ORDER BY o.survey_id ASC, o.sort_order ASC
        "#,
    )?;
    let rows = stmt.query_map(params![petition_id.0], |row| {
        Ok(SurveyOption {
            id: OptionId(row.get(0)?),
            survey_id: SurveyId(row.get(1)?),
            label: row.get(2)?,
            order: row.get(3)?,
        })
    })?;

    for row in rows {
        let option = row?;
        if let Some(survey) = surveys.iter_mut().find(|s| s.id == option.survey_id) {
            survey.options.push(option);
        }
    }

    Ok(surveys)
}

fn map_petition(row: &Row<'_>) -> rusqlite::Result<Petition> {
    Ok(Petition {
        id: PetitionId(row.get(0)?),
        public_id: PublicId::from_stored(row.get(1)?),
        title: row.get(2)?,
        content: row.get(3)?,
        created_at: from_millis(4, row.get(4)?)?,
        activated_at: row
            .get::<_, Option<i64>>(5)?
            .map(|millis| from_millis(5, millis))
            .transpose()?,
        creator_id: row.get::<_, Option<String>>(6)?.map(UserId),
        signature_count: row.get(7)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn validate_text(title: &str, content: &str) -> Result<(String, String)> {
    let title = title.trim();
    if title.is_empty() {
        return Err(PetitionError::validation("title is required"));
    }
    if content.trim().is_empty() {
        return Err(PetitionError::validation("content is required"));
    }
    Ok((title.to_string(), content.to_string()))
}

fn require_user(caller: &Caller) -> Result<&UserId> {
    caller.user().ok_or(PetitionError::Unauthenticated)
}

fn authorize_owner(petition: &Petition, user: &UserId) -> Result<()> {
    if petition.creator_id.as_ref() == Some(user) {
        Ok(())
    } else {
        Err(PetitionError::Forbidden)
    }
}

/// Remove the whole entity graph. Children first so the order does not
/// depend on cascade support.
fn wipe_all(tx: &Transaction) -> Result<usize> {
    tx.execute("DELETE FROM survey_responses", [])?;
    tx.execute("DELETE FROM signatures", [])?;
    tx.execute("DELETE FROM survey_options", [])?;
    tx.execute("DELETE FROM surveys", [])?;
    Ok(tx.execute("DELETE FROM petitions", [])?)
}

/// Reserve an identifier that has never been issued before.
fn issue_public_id(
    tx: &Transaction,
    now: DateTime<Utc>,
    mut generate: impl FnMut() -> PublicId,
) -> Result<PublicId> {
    for attempt in 1..=MAX_ID_ATTEMPTS {
        let candidate = generate();
        match tx.execute(
            "INSERT INTO issued_public_ids (public_id, issued_at) VALUES (?1, ?2)",
            params![candidate.as_str(), to_millis(now)],
        ) {
            Ok(_) => return Ok(candidate),
            Err(e) if is_unique_violation(&e) => {
                tracing::warn!(attempt, "Public id collision, regenerating");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(PetitionError::storage(format!(
        "could not issue a unique public id after {MAX_ID_ATTEMPTS} attempts"
    )))
}
