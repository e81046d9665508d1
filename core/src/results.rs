//! Results aggregator.
//!
//! Read-only projection over the ledger. Nothing is cached: every call
//! recounts, so a tally can never lag a committed signature.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use crate::db::execute_read_snapshot;
use crate::errors::Result;
use crate::model::{
    Caller, OptionId, OptionTally, Petition, PetitionResults, ResultsHeader, SurveyTally,
};
use crate::public_id::PublicId;
use crate::registry::{find_latest_visible, find_owned, find_visible, load_surveys};

/// Results for a publicly visible petition
pub fn public_results(
    conn: &mut Connection,
    public_id: &PublicId,
    now: DateTime<Utc>,
) -> Result<PetitionResults> {
    execute_read_snapshot(conn, |conn| {
        let petition = find_visible(conn, public_id, now)?;
        tally(conn, petition)
    })
}

/// Results for whichever petition is current, if any.
pub fn current_results(conn: &mut Connection, now: DateTime<Utc>) -> Result<Option<PetitionResults>> {
    execute_read_snapshot(conn, |conn| match find_latest_visible(conn, now)? {
        Some(petition) => tally(conn, petition).map(Some),
        None => Ok(None),
    })
}

/// Results for the caller's own petition, ignoring the activation gate.
pub fn owner_results(
    conn: &mut Connection,
    public_id: &PublicId,
    caller: &Caller,
) -> Result<PetitionResults> {
    execute_read_snapshot(conn, |conn| {
        let petition = find_owned(conn, public_id, caller)?;
        tally(conn, petition)
    })
}

/// Counts and survey structure for one petition. Callers hold a read
/// snapshot so the counts and the survey list agree.
fn tally(conn: &Connection, petition: Petition) -> Result<PetitionResults> {
    let total_signatures: i64 = conn.query_row(
        "SELECT COUNT(*) FROM signatures WHERE petition_id = ?1",
        params![petition.id.0],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(
        r#"
        SELECT o.id, COUNT(r.id)
        FROM survey_options o
        JOIN surveys s ON s.id = o.survey_id
        LEFT JOIN survey_responses r ON r.option_id = o.id
        WHERE s.petition_id = ?1
        GROUP BY o.id
        "#,
    )?;
    let counts = stmt
        .query_map(params![petition.id.0], |row| {
            Ok((OptionId(row.get(0)?), row.get::<_, i64>(1)?))
        })?
        .collect::<rusqlite::Result<std::collections::HashMap<_, _>>>()?;

    let surveys = load_surveys(conn, petition.id)?
        .into_iter()
        .map(|survey| {
            let options: Vec<OptionTally> = survey
                .options
                .into_iter()
                .map(|option| OptionTally {
                    count: counts.get(&option.id).copied().unwrap_or(0),
                    option_id: option.id,
                    label: option.label,
                })
                .collect();
            SurveyTally {
                survey_id: survey.id,
                title: survey.title,
                question_type: survey.question_type,
                total_responses: options.iter().map(|o| o.count).sum(),
                options,
            }
        })
        .collect();

    tracing::debug!(
        public_id = %petition.public_id,
        total_signatures,
        "Results computed"
    );

    Ok(PetitionResults {
        petition: ResultsHeader {
            public_id: petition.public_id,
            title: petition.title,
            content: petition.content,
            created_at: petition.created_at,
        },
        total_signatures,
        surveys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_connection;
    use crate::errors::PetitionError;
    use crate::ledger::submit_signature;
    use crate::model::{
        NewOption, NewPetition, NewSurvey, QuestionType, SignatureSubmission, SurveyAnswer, UserId,
    };
    use crate::registry::{create_petition, get_public_petition};
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn owner() -> Caller {
        Caller::User(UserId("owner".to_string()))
    }

    fn survey(title: &str, question_type: QuestionType, labels: &[&str]) -> NewSurvey {
        NewSurvey {
            title: title.to_string(),
            question_type,
            options: labels
                .iter()
                .map(|l| NewOption {
                    label: l.to_string(),
                })
                .collect(),
        }
    }

    fn sign(conn: &mut Connection, id: &PublicId, phone: &str, picks: Vec<SurveyAnswer>, now: DateTime<Utc>) -> Result<()> {
        submit_signature(
            conn,
            SignatureSubmission {
                petition_id: id.clone(),
                name: "Li".to_string(),
                phone: phone.to_string(),
                signature_image_ref: "/signatures/x.png".to_string(),
                survey_responses: picks,
            },
            now,
        )
        .map(|_| ())
    }

    #[test]
    fn walking_scenario() {
        let mut conn = test_connection();
        let now = Utc::now();
        let id = create_petition(
            &mut conn,
            true,
            &owner(),
            NewPetition {
                title: "T".to_string(),
                content: "<p>C</p>".to_string(),
                surveys: vec![survey("Q1", QuestionType::Single, &["A", "B"])],
                activated_at: None,
            },
            now,
        )
        .unwrap();

        let detail = get_public_petition(&mut conn, &id, now).unwrap();
        let labels: Vec<&str> = detail.surveys[0]
            .options
            .iter()
            .map(|o| o.label.as_str())
            .collect();
        assert_eq!(labels, vec!["A", "B"]);

        let q1 = &detail.surveys[0];
        let pick_a = vec![SurveyAnswer {
            survey_id: q1.id,
            option_ids: vec![q1.options[0].id],
        }];
        sign(&mut conn, &id, "13800000000", pick_a.clone(), now).unwrap();
        assert!(matches!(
            sign(&mut conn, &id, "13800000000", pick_a, now),
            Err(PetitionError::Conflict)
        ));

        let results = public_results(&mut conn, &id, now).unwrap();
        assert_eq!(results.total_signatures, 1);
        let counts: Vec<(&str, i64)> = results.surveys[0]
            .options
            .iter()
            .map(|o| (o.label.as_str(), o.count))
            .collect();
        assert_eq!(counts, vec![("A", 1), ("B", 0)]);
        assert_eq!(results.surveys[0].total_responses, 1);
        assert_eq!(results.petition.title, "T");
    }

    #[test]
    fn multiple_choice_totals_sum_option_counts() {
        let mut conn = test_connection();
        let now = Utc::now();
        let id = create_petition(
            &mut conn,
            true,
            &owner(),
            NewPetition {
                title: "T".to_string(),
                content: "C".to_string(),
                surveys: vec![survey("Q", QuestionType::Multiple, &["X", "Y", "Z"])],
                activated_at: None,
            },
            now,
        )
        .unwrap();
        let q = get_public_petition(&mut conn, &id, now).unwrap().surveys.remove(0);
        let pick = |idx: &[usize]| {
            vec![SurveyAnswer {
                survey_id: q.id,
                option_ids: idx.iter().map(|i| q.options[*i].id).collect(),
            }]
        };

        sign(&mut conn, &id, "13800000001", pick(&[0, 1]), now).unwrap();
        sign(&mut conn, &id, "13800000002", pick(&[1, 2]), now).unwrap();
        sign(&mut conn, &id, "13800000003", pick(&[1]), now).unwrap();

        let results = public_results(&mut conn, &id, now).unwrap();
        let counts: Vec<i64> = results.surveys[0].options.iter().map(|o| o.count).collect();
        assert_eq!(counts, vec![1, 3, 1]);
        assert_eq!(results.surveys[0].total_responses, 5);
        assert_eq!(results.total_signatures, 3);
    }

    #[test]
    fn petition_without_surveys_counts_signatures() {
        let mut conn = test_connection();
        let now = Utc::now();
        let id = create_petition(
            &mut conn,
            true,
            &owner(),
            NewPetition {
                title: "T".to_string(),
                content: "C".to_string(),
                surveys: vec![],
                activated_at: None,
            },
            now,
        )
        .unwrap();
        sign(&mut conn, &id, "13800000000", vec![], now).unwrap();

        let results = public_results(&mut conn, &id, now).unwrap();
        assert_eq!(results.total_signatures, 1);
        assert!(results.surveys.is_empty());
    }

    #[test]
    fn gated_results_are_hidden_from_public_not_owner() {
        let mut conn = test_connection();
        let now = Utc::now();
        let id = create_petition(
            &mut conn,
            true,
            &owner(),
            NewPetition {
                title: "T".to_string(),
                content: "C".to_string(),
                surveys: vec![],
                activated_at: Some(now + Duration::days(1)),
            },
            now,
        )
        .unwrap();

        assert!(matches!(
            public_results(&mut conn, &id, now),
            Err(PetitionError::NotFound)
        ));
        assert!(current_results(&mut conn, now).unwrap().is_none());

        let owned = owner_results(&mut conn, &id, &owner()).unwrap();
        assert_eq!(owned.total_signatures, 0);
        assert!(matches!(
            owner_results(&mut conn, &id, &Caller::Anonymous),
            Err(PetitionError::Unauthenticated)
        ));
        assert!(matches!(
            owner_results(&mut conn, &id, &Caller::User(UserId("other".to_string()))),
            Err(PetitionError::Forbidden)
        ));

        let current = current_results(&mut conn, now + Duration::days(2)).unwrap().unwrap();
        assert_eq!(current.petition.public_id, id);
    }
}
