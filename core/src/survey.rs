//! Survey engine: shapes questions at creation time and checks answer
//! cardinality at submission time. Pure; no store access.

use std::collections::{HashMap, HashSet};

use crate::errors::{PetitionError, Result};
use crate::model::{NewOption, NewSurvey, OptionId, QuestionType, Survey, SurveyAnswer, SurveyId};

/// Minimum options a question must keep after blank labels are dropped.
pub const MIN_OPTIONS: usize = 2;

/// Normalize proposed surveys for insertion.
///
/// Titles and labels are trimmed. Options whose label is blank are dropped
/// without error; a survey left with fewer than [`MIN_OPTIONS`] is rejected.
pub fn prepare_surveys(surveys: Vec<NewSurvey>) -> Result<Vec<NewSurvey>> {
    surveys
        .into_iter()
        .enumerate()
        .map(|(index, survey)| {
            let position = index + 1;
            let title = survey.title.trim().to_string();
            if title.is_empty() {
                return Err(PetitionError::validation(format!(
                    "survey {position}: title is required"
                )));
            }

            let options: Vec<NewOption> = survey
                .options
                .into_iter()
                .filter_map(|option| {
                    let label = option.label.trim();
                    (!label.is_empty()).then(|| NewOption {
                        label: label.to_string(),
                    })
                })
                .collect();

            if options.len() < MIN_OPTIONS {
                return Err(PetitionError::validation(format!(
                    "survey {position}: at least {MIN_OPTIONS} non-empty options are required"
                )));
            }

            Ok(NewSurvey {
                title,
                question_type: survey.question_type,
                options,
            })
        })
        .collect()
}

/// Validate a signer's answers against the petition's surveys.
///
/// Every survey must be answered; `single` takes exactly one option,
/// `multiple` one or more distinct options, and each option must belong to
/// the survey it is given for. Returns the `(survey, option)` rows to insert,
/// in survey display order.
pub fn validate_answers(
    surveys: &[Survey],
    answers: &[SurveyAnswer],
) -> Result<Vec<(SurveyId, OptionId)>> {
    let known: HashSet<SurveyId> = surveys.iter().map(|s| s.id).collect();

    let mut by_survey: HashMap<SurveyId, &SurveyAnswer> = HashMap::with_capacity(answers.len());
    for answer in answers {
        if !known.contains(&answer.survey_id) {
            return Err(PetitionError::survey_validation(
                answer.survey_id,
                format!("survey {} does not belong to this petition", answer.survey_id),
            ));
        }
        if by_survey.insert(answer.survey_id, answer).is_some() {
            return Err(PetitionError::survey_validation(
                answer.survey_id,
                format!("survey {} was answered more than once", answer.survey_id),
            ));
        }
    }

    let mut rows = Vec::new();
    for survey in surveys {
        let option_ids = by_survey
            .get(&survey.id)
            .map(|answer| answer.option_ids.as_slice())
            .unwrap_or_default();
        check_cardinality(survey, option_ids)?;

        for option_id in option_ids {
            if !survey.options.iter().any(|o| o.id == *option_id) {
                return Err(PetitionError::survey_validation(
                    survey.id,
                    format!(
                        "option {} does not belong to survey {}",
                        option_id.0, survey.id
                    ),
                ));
            }
            rows.push((survey.id, *option_id));
        }
    }

    Ok(rows)
}

fn check_cardinality(survey: &Survey, option_ids: &[OptionId]) -> Result<()> {
    if option_ids.is_empty() {
        return Err(PetitionError::survey_validation(
            survey.id,
            format!("survey {} requires an answer", survey.id),
        ));
    }

    match survey.question_type {
        QuestionType::Single if option_ids.len() != 1 => Err(PetitionError::survey_validation(
            survey.id,
            format!("survey {} accepts exactly one option", survey.id),
        )),
        QuestionType::Single => Ok(()),
        QuestionType::Multiple => {
            let mut seen = HashSet::with_capacity(option_ids.len());
            if option_ids.iter().all(|id| seen.insert(*id)) {
                Ok(())
            } else {
                Err(PetitionError::survey_validation(
                    survey.id,
                    format!("survey {} has a duplicate option", survey.id),
                ))
            }
        }
    }
}
