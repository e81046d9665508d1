//! `PetitionEngine`: async facade over the registry, ledger and aggregator.
//!
//! Holds only the connection pool, the deployment mode and the clock. Every
//! call is a request-scoped unit of work on a pooled connection.

use std::sync::Arc;

use crate::activation::{Clock, SystemClock};
use crate::config::PetitionConfig;
use crate::db::migrations::migrate_to_latest;
use crate::db::{DbError, DbPool, initialize_pool, with_connection};
use crate::errors::Result;
use crate::model::{
    Caller, NewPetition, Petition, PetitionDetail, PetitionResults, PetitionUpdate, Signature,
    SignatureId, SignatureSubmission,
};
use crate::public_id::PublicId;
use crate::{ledger, registry, results};

#[derive(Clone)]
pub struct PetitionEngine {
    pool: DbPool,
    single_petition_mode: bool,
    clock: Arc<dyn Clock>,
}

impl PetitionEngine {
    /// Open the configured database, migrating it if needed
    pub fn open(cfg: &PetitionConfig) -> Result<Self> {
        Self::with_clock(cfg, Arc::new(SystemClock))
    }

    /// Open with a specific clock (for testing)
    pub fn with_clock(cfg: &PetitionConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let db_path = cfg.resolved_db_path();
        let pool = initialize_pool(&db_path, cfg.storage.pool_size, cfg.busy_timeout())?;

        let mut conn = pool
            .get()
            .map_err(|e| DbError::Pool(format!("Failed to get connection: {e}")))?;
        migrate_to_latest(&mut conn)?;
        drop(conn);

        tracing::info!(
            db_path = %db_path.display(),
            single_petition_mode = cfg.single_petition_mode,
            "Petition engine initialized"
        );

        Ok(Self {
            pool,
            single_petition_mode: cfg.single_petition_mode,
            clock,
        })
    }

    pub fn single_petition_mode(&self) -> bool {
        self.single_petition_mode
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registry
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn create_petition(&self, caller: Caller, new: NewPetition) -> Result<PublicId> {
        let now = self.clock.now();
        let single = self.single_petition_mode;
        with_connection(&self.pool, move |conn| {
            registry::create_petition(conn, single, &caller, new, now)
        })
        .await
    }

    pub async fn get_petition(&self, public_id: PublicId) -> Result<PetitionDetail> {
        let now = self.clock.now();
        with_connection(&self.pool, move |conn| {
            registry::get_public_petition(conn, &public_id, now)
        })
        .await
    }

    pub async fn current_petition(&self) -> Result<Option<PetitionDetail>> {
        let now = self.clock.now();
        with_connection(&self.pool, move |conn| {
            registry::find_active_petition_for_public(conn, now)
        })
        .await
    }

    pub async fn owned_petition(&self, caller: Caller, public_id: PublicId) -> Result<PetitionDetail> {
        with_connection(&self.pool, move |conn| {
            registry::get_owned_petition(conn, &public_id, &caller)
        })
        .await
    }

    pub async fn update_petition(
        &self,
        caller: Caller,
        public_id: PublicId,
        update: PetitionUpdate,
    ) -> Result<Petition> {
        with_connection(&self.pool, move |conn| {
            registry::update_petition(conn, &public_id, &caller, update)
        })
        .await
    }

    pub async fn delete_petition(&self, caller: Caller, public_id: PublicId) -> Result<()> {
        with_connection(&self.pool, move |conn| {
            registry::delete_petition(conn, &public_id, &caller)
        })
        .await
    }

    pub async fn list_owned(&self, caller: Caller) -> Result<Vec<Petition>> {
        with_connection(&self.pool, move |conn| registry::list_owned(conn, &caller)).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ledger
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn submit_signature(&self, submission: SignatureSubmission) -> Result<SignatureId> {
        let now = self.clock.now();
        with_connection(&self.pool, move |conn| {
            ledger::submit_signature(conn, submission, now)
        })
        .await
    }

    pub async fn has_signed(&self, public_id: PublicId, phone: String) -> Result<bool> {
        let now = self.clock.now();
        with_connection(&self.pool, move |conn| {
            ledger::has_signed(conn, &public_id, &phone, now)
        })
        .await
    }

    pub async fn list_signatures(&self, caller: Caller, public_id: PublicId) -> Result<Vec<Signature>> {
        with_connection(&self.pool, move |conn| {
            ledger::list_signatures(conn, &public_id, &caller)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Results
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn results(&self, public_id: PublicId) -> Result<PetitionResults> {
        let now = self.clock.now();
        with_connection(&self.pool, move |conn| {
            results::public_results(conn, &public_id, now)
        })
        .await
    }

    pub async fn current_results(&self) -> Result<Option<PetitionResults>> {
        let now = self.clock.now();
        with_connection(&self.pool, move |conn| results::current_results(conn, now)).await
    }

    pub async fn owner_results(&self, caller: Caller, public_id: PublicId) -> Result<PetitionResults> {
        with_connection(&self.pool, move |conn| {
            results::owner_results(conn, &public_id, &caller)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::FixedClock;
    use crate::errors::PetitionError;
    use crate::model::{NewOption, NewSurvey, QuestionType, SurveyAnswer, UserId};
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn engine(dir: &TempDir, single: bool, clock: Arc<FixedClock>) -> PetitionEngine {
        let mut cfg = PetitionConfig::default();
        cfg.single_petition_mode = single;
        cfg.storage.db_path = dir.path().join("petition.db").to_string_lossy().into_owned();
        cfg.storage.pool_size = 4;
        PetitionEngine::with_clock(&cfg, clock).unwrap()
    }

    fn owner() -> Caller {
        Caller::User(UserId("owner".to_string()))
    }

    fn petition_with_question(activated_at: Option<chrono::DateTime<Utc>>) -> NewPetition {
        NewPetition {
            title: "T".to_string(),
            content: "<p>C</p>".to_string(),
            surveys: vec![NewSurvey {
                title: "Q1".to_string(),
                question_type: QuestionType::Single,
                options: vec![
                    NewOption {
                        label: "A".to_string(),
                    },
                    NewOption {
                        label: "B".to_string(),
                    },
                ],
            }],
            activated_at,
        }
    }

    fn submission(id: &PublicId, phone: &str, answers: Vec<SurveyAnswer>) -> SignatureSubmission {
        SignatureSubmission {
            petition_id: id.clone(),
            name: "Li".to_string(),
            phone: phone.to_string(),
            signature_image_ref: "/signatures/x.png".to_string(),
            survey_responses: answers,
        }
    }

    async fn pick_first(engine: &PetitionEngine, id: &PublicId) -> Vec<SurveyAnswer> {
        let detail = engine.get_petition(id.clone()).await.unwrap();
        let q1 = &detail.surveys[0];
        vec![SurveyAnswer {
            survey_id: q1.id,
            option_ids: vec![q1.options[0].id],
        }]
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicate_submissions_store_one_signature() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, true, Arc::new(FixedClock::new(Utc::now())));
        let id = engine
            .create_petition(owner(), petition_with_question(None))
            .await
            .unwrap();
        let answers = pick_first(&engine, &id).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            let sub = submission(&id, "13800000000", answers.clone());
            handles.push(tokio::spawn(async move { engine.submit_signature(sub).await }));
        }

        let mut ok = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(PetitionError::Conflict) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(conflicts, 7);

        let results = engine.results(id).await.unwrap();
        assert_eq!(results.total_signatures, 1);
        assert_eq!(results.surveys[0].options[0].count, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_distinct_phones_all_succeed() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, true, Arc::new(FixedClock::new(Utc::now())));
        let id = engine
            .create_petition(owner(), petition_with_question(None))
            .await
            .unwrap();
        let answers = pick_first(&engine, &id).await;

        let mut handles = Vec::new();
        for n in 0..6 {
            let engine = engine.clone();
            let sub = submission(&id, &format!("1380000000{n}"), answers.clone());
            handles.push(tokio::spawn(async move { engine.submit_signature(sub).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(engine.results(id).await.unwrap().total_signatures, 6);
    }

    #[tokio::test]
    async fn scheduled_petition_appears_when_clock_reaches_activation() {
        let dir = TempDir::new().unwrap();
        let start = Utc::now();
        let clock = Arc::new(FixedClock::new(start));
        let engine = engine(&dir, true, clock.clone());

        let id = engine
            .create_petition(owner(), petition_with_question(Some(start + Duration::hours(1))))
            .await
            .unwrap();

        assert!(matches!(
            engine.get_petition(id.clone()).await,
            Err(PetitionError::NotFound)
        ));
        assert!(engine.current_petition().await.unwrap().is_none());
        assert!(engine.owned_petition(owner(), id.clone()).await.is_ok());

        clock.advance(Duration::hours(1));
        assert!(engine.get_petition(id.clone()).await.is_ok());
        let current = engine.current_petition().await.unwrap().unwrap();
        assert_eq!(current.petition.public_id, id);
    }

    #[tokio::test]
    async fn has_signed_reports_prior_submission() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, true, Arc::new(FixedClock::new(Utc::now())));
        let id = engine
            .create_petition(owner(), petition_with_question(None))
            .await
            .unwrap();
        let answers = pick_first(&engine, &id).await;

        assert!(!engine.has_signed(id.clone(), "13800000000".to_string()).await.unwrap());
        engine
            .submit_signature(submission(&id, "13800000000", answers))
            .await
            .unwrap();
        assert!(engine.has_signed(id, "13800000000".to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn multi_mode_keeps_petitions_and_scopes_owners() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, false, Arc::new(FixedClock::new(Utc::now())));
        assert!(!engine.single_petition_mode());

        let first = engine
            .create_petition(owner(), petition_with_question(None))
            .await
            .unwrap();
        let second = engine
            .create_petition(owner(), petition_with_question(None))
            .await
            .unwrap();
        assert!(matches!(
            engine.create_petition(Caller::Anonymous, petition_with_question(None)).await,
            Err(PetitionError::Unauthenticated)
        ));

        assert_eq!(engine.list_owned(owner()).await.unwrap().len(), 2);

        let stranger = Caller::User(UserId("stranger".to_string()));
        assert!(matches!(
            engine.delete_petition(stranger, first.clone()).await,
            Err(PetitionError::Forbidden)
        ));
        engine.delete_petition(owner(), first.clone()).await.unwrap();
        assert!(matches!(
            engine.get_petition(first).await,
            Err(PetitionError::NotFound)
        ));

        let updated = engine
            .update_petition(
                owner(),
                second.clone(),
                PetitionUpdate {
                    title: "T2".to_string(),
                    content: "C2".to_string(),
                    activated_at: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "T2");
        let owned = engine.owner_results(owner(), second).await.unwrap();
        assert_eq!(owned.petition.title, "T2");
        assert_eq!(owned.total_signatures, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reads_never_observe_a_half_reset_petition() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, true, Arc::new(FixedClock::new(Utc::now())));
        engine
            .create_petition(owner(), petition_with_question(None))
            .await
            .unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let mut readers = Vec::new();
        for _ in 0..3 {
            let engine = engine.clone();
            let done = Arc::clone(&done);
            readers.push(tokio::spawn(async move {
                let mut reads = 0usize;
                loop {
                    if let Some(detail) = engine.current_petition().await.unwrap() {
                        assert_eq!(detail.surveys.len(), 1, "petition served without its surveys");
                        assert_eq!(detail.surveys[0].options.len(), 2);
                    }
                    if let Some(results) = engine.current_results().await.unwrap() {
                        assert_eq!(results.surveys.len(), 1, "results served without surveys");
                        assert_eq!(results.surveys[0].options.len(), 2);
                    }
                    reads += 1;
                    if done.load(Ordering::Relaxed) {
                        break reads;
                    }
                }
            }));
        }

        for _ in 0..150 {
            engine
                .create_petition(owner(), petition_with_question(None))
                .await
                .unwrap();
        }
        done.store(true, Ordering::Relaxed);

        for reader in readers {
            assert!(reader.await.unwrap() > 0);
        }
    }

    #[tokio::test]
    async fn reopen_keeps_data() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let id = {
            let engine = engine(&dir, true, clock.clone());
            engine
                .create_petition(owner(), petition_with_question(None))
                .await
                .unwrap()
        };

        let engine = engine(&dir, true, clock);
        let current = engine.current_results().await.unwrap().unwrap();
        assert_eq!(current.petition.public_id, id);
    }
}
