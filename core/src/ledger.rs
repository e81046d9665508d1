//! Signature ledger.
//!
//! Sole writer of `signatures` and `survey_responses`. A submission either
//! records one signature with all of its survey responses or records nothing.
//! The `(petition_id, phone)` unique index decides duplicates: the pre-insert
//! read only saves a failed insert, it does not make the check race-free.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use rusqlite::{Connection, TransactionBehavior, params};

use crate::db::{execute_in_transaction, execute_read_snapshot, is_unique_violation};
use crate::errors::{PetitionError, Result};
use crate::model::{
    Caller, PetitionId, Signature, SignatureId, SignatureSubmission, from_millis, to_millis,
};
use crate::public_id::PublicId;
use crate::registry::{find_by_public_id, find_owned, find_visible, load_surveys};
use crate::survey::validate_answers;

/// Mainland mobile number: 11 digits, `1` then `3`–`9`.
#[allow(clippy::expect_used)]
fn phone_regex() -> &'static Regex {
    static PHONE_RE: OnceLock<Regex> = OnceLock::new();
    PHONE_RE.get_or_init(|| Regex::new(r"^1[3-9][0-9]{9}$").expect("valid phone regex"))
}

/// Validate a signer's phone number
pub fn validate_phone(phone: &str) -> Result<()> {
    if phone_regex().is_match(phone) {
        Ok(())
    } else {
        Err(PetitionError::validation("invalid phone number"))
    }
}

/// Phone number with the middle digits hidden, for logs.
pub fn mask_phone(phone: &str) -> String {
    if phone.len() == 11 && phone.is_ascii() {
        format!("{}****{}", &phone[..3], &phone[7..])
    } else {
        "***".to_string()
    }
}

/// Record a signature and its survey responses.
///
/// The signature image must already be persisted; only its reference is
/// stored here. Input checks run first, then one IMMEDIATE transaction
/// re-reads the petition (through the activation gate) and its surveys,
/// validates the answers, and inserts everything.
pub fn submit_signature(
    conn: &mut Connection,
    submission: SignatureSubmission,
    now: DateTime<Utc>,
) -> Result<SignatureId> {
    validate_phone(&submission.phone)?;

    let name = submission.name.trim();
    if name.is_empty() {
        return Err(PetitionError::validation("name is required"));
    }
    let image_ref = submission.signature_image_ref.trim();
    if image_ref.is_empty() {
        return Err(PetitionError::validation("signature image is required"));
    }

    let phone = submission.phone.as_str();
    let result = execute_in_transaction(conn, TransactionBehavior::Immediate, |tx| {
        let petition = find_visible(tx, &submission.petition_id, now)?;
        let surveys = load_surveys(tx, petition.id)?;
        let responses = validate_answers(&surveys, &submission.survey_responses)?;

        let already_signed: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM signatures WHERE petition_id = ?1 AND phone = ?2)",
            params![petition.id.0, phone],
            |row| row.get(0),
        )?;
        if already_signed {
            return Err(PetitionError::Conflict);
        }

        let signature_id = insert_signature(tx, petition.id, name, phone, image_ref, now)?;

        let mut stmt = tx.prepare(
            r#"
            INSERT INTO survey_responses (signature_id, survey_id, option_id)
            VALUES (?1, ?2, ?3)
            "#,
        )?;
        for (survey_id, option_id) in &responses {
            stmt.execute(params![signature_id.0, survey_id.0, option_id.0])?;
        }

        Ok((signature_id, responses.len()))
    });

    match result {
        Ok((signature_id, responses)) => {
            tracing::info!(
                public_id = %submission.petition_id,
                signature_id = signature_id.0,
                responses,
                "Signature recorded"
            );
            Ok(signature_id)
        }
        Err(PetitionError::Conflict) => {
            tracing::debug!(
                public_id = %submission.petition_id,
                phone = %mask_phone(phone),
                "Phone already signed"
            );
            Err(PetitionError::Conflict)
        }
        Err(e) => Err(e),
    }
}

/// Insert the signature row. The `(petition_id, phone)` unique index is the
/// final word on duplicates; a violation comes back as `Conflict`.
pub(crate) fn insert_signature(
    conn: &Connection,
    petition_id: PetitionId,
    name: &str,
    phone: &str,
    image_ref: &str,
    now: DateTime<Utc>,
) -> Result<SignatureId> {
    let inserted = conn.execute(
        r#"
        INSERT INTO signatures (petition_id, name, phone, signature_path, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![petition_id.0, name, phone, image_ref, to_millis(now)],
    );
    match inserted {
        Ok(_) => Ok(SignatureId(conn.last_insert_rowid())),
        Err(e) if is_unique_violation(&e) => {
            tracing::warn!(
                petition_id = petition_id.0,
                phone = %mask_phone(phone),
                "Duplicate signature caught by unique index"
            );
            Err(PetitionError::Conflict)
        }
        Err(e) => Err(e.into()),
    }
}

/// Whether this phone has signed the petition.
///
/// Callers use this before retrying a submission whose outcome is unknown.
/// Gated like every public read.
pub fn has_signed(
    conn: &mut Connection,
    public_id: &PublicId,
    phone: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    validate_phone(phone)?;
    execute_read_snapshot(conn, |conn| {
        let petition = find_visible(conn, public_id, now)?;
        Ok(conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM signatures WHERE petition_id = ?1 AND phone = ?2)",
            params![petition.id.0, phone],
            |row| row.get(0),
        )?)
    })
}

/// Number of signatures on a petition regardless of activation state.
pub fn signature_count(conn: &Connection, public_id: &PublicId) -> Result<i64> {
    let petition = find_by_public_id(conn, public_id)?.ok_or(PetitionError::NotFound)?;
    Ok(petition.signature_count)
}

/// Signatures on the caller's petition, oldest first.
pub fn list_signatures(
    conn: &mut Connection,
    public_id: &PublicId,
    caller: &Caller,
) -> Result<Vec<Signature>> {
    execute_read_snapshot(conn, |conn| {
        let petition = find_owned(conn, public_id, caller)?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, petition_id, name, phone, signature_path, created_at
            FROM signatures
            WHERE petition_id = ?1
            ORDER BY created_at ASC, id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![petition.id.0], |row| {
            Ok(Signature {
                id: SignatureId(row.get(0)?),
                petition_id: PetitionId(row.get(1)?),
                name: row.get(2)?,
                phone: row.get(3)?,
                signature_image_ref: row.get(4)?,
                created_at: from_millis(5, row.get(5)?)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    })
}
