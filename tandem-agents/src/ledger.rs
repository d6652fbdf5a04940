//! Score ledger: per-agent balances plus the request -> award | reject flow.
//!
//! Only the agent a request targets may resolve it. Resolution goes through
//! [`LedgerStore::apply_resolution`], so the status change, the balance change
//! and the history row land together. All ledger calls are serialized behind
//! one async mutex, which keeps the pending check and the mutation atomic with
//! respect to other calls on the same ledger.

use chrono::Utc;
use std::sync::Arc;
use tandem_core::constants::DEFAULT_HISTORY_LIMIT;
use tandem_core::{
    LedgerError, NewScoreRequest, ScoreHistoryEntry, ScoreRecord, ScoreRequest,
    ScoreRequestStatus, ScoreResolution, TandemResult, ValidationError,
};
use tandem_storage::LedgerStore;
use tokio::sync::Mutex;

pub struct ScoreLedger {
    store: Mutex<Arc<dyn LedgerStore>>,
}

impl ScoreLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    /// Create the ledger tables if absent. Safe to call repeatedly.
    pub async fn initialize(&self) -> TandemResult<()> {
        self.store.lock().await.initialize().await
    }

    /// Current balance, 0 for an agent never scored.
    pub async fn get_score(&self, ai_name: &str) -> TandemResult<i64> {
        let store = self.store.lock().await;
        Ok(store.get_score(ai_name).await?.map_or(0, |r| r.score))
    }

    /// Administrative upsert. Writes no history.
    pub async fn set_score(&self, ai_name: &str, score: i64) -> TandemResult<()> {
        let store = self.store.lock().await;
        store.set_score(ai_name, score, Utc::now()).await?;
        tracing::warn!(ai_name = %ai_name, score, "Score set directly");
        Ok(())
    }

    pub async fn increment_score(&self, ai_name: &str, by: i64) -> TandemResult<i64> {
        let store = self.store.lock().await;
        store.increment_score(ai_name, by, Utc::now()).await
    }

    /// All balances, highest first.
    pub async fn all_scores(&self) -> TandemResult<Vec<ScoreRecord>> {
        let store = self.store.lock().await;
        let mut scores = store.list_scores().await?;
        scores.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.ai_name.cmp(&b.ai_name)));
        Ok(scores)
    }

    pub async fn reset_scores(&self) -> TandemResult<()> {
        let store = self.store.lock().await;
        store.reset_scores(Utc::now()).await?;
        tracing::warn!("All scores reset to zero");
        Ok(())
    }

    /// Import balances from the legacy text format, one `"<Name> Score: <n>"`
    /// per line. Lines without exactly one `:` are skipped; an unparsable
    /// number imports as 0. Returns the number of balances written.
    pub async fn import_legacy_scores(&self, text: &str) -> TandemResult<usize> {
        let entries: Vec<(String, i64)> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| {
                let mut parts = line.split(':');
                let (name, value) = (parts.next()?, parts.next()?);
                if parts.next().is_some() {
                    return None;
                }
                let name = name.trim().replace(" Score", "");
                Some((name, value.trim().parse().unwrap_or(0)))
            })
            .collect();

        let store = self.store.lock().await;
        let now = Utc::now();
        for (name, score) in &entries {
            store.set_score(name, *score, now).await?;
        }
        tracing::info!(imported = entries.len(), "Imported legacy scores");
        Ok(entries.len())
    }

    // ========================================================================
    // REQUEST / AWARD / REJECT
    // ========================================================================

    /// Open a pending request asking `target_ai` to score `requester`'s work.
    pub async fn request_score(
        &self,
        task_id: &str,
        requester: &str,
        target_ai: &str,
        requested_score: i64,
        quality_justification: &str,
    ) -> TandemResult<i64> {
        if task_id.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "task_id".to_string(),
            }
            .into());
        }

        let store = self.store.lock().await;
        let request = store
            .insert_request(NewScoreRequest {
                task_id: task_id.to_string(),
                requester: requester.to_string(),
                target_ai: target_ai.to_string(),
                requested_score,
                quality_justification: quality_justification.to_string(),
                created_at: Utc::now(),
            })
            .await?;

        tracing::info!(
            request_id = request.id,
            task_id = %task_id,
            requester = %requester,
            target_ai = %target_ai,
            requested_score,
            "Score requested"
        );
        Ok(request.id)
    }

    /// Resolve a pending request in the requester's favour.
    ///
    /// Fails with [`LedgerError::InvalidRequest`] unless the request exists and
    /// is pending, and with [`LedgerError::Unauthorized`] unless `awarder` is
    /// the request's target.
    pub async fn award_score(
        &self,
        request_id: i64,
        awarder: &str,
        awarded_score: i64,
        reason: &str,
    ) -> TandemResult<()> {
        let store = self.store.lock().await;
        let request = Self::pending_request(&**store, request_id, awarder).await?;

        let now = Utc::now();
        store
            .apply_resolution(ScoreResolution {
                request_id,
                status: ScoreRequestStatus::Awarded,
                reviewed_at: now,
                score_delta: awarded_score,
                history: ScoreHistoryEntry {
                    ai_name: request.requester.clone(),
                    change: awarded_score,
                    reason: reason.to_string(),
                    requester: request.requester.clone(),
                    awarder: awarder.to_string(),
                    task_id: request.task_id.clone(),
                    created_at: now,
                },
            })
            .await?;

        tracing::info!(
            request_id,
            requester = %request.requester,
            awarder = %awarder,
            change = awarded_score,
            "Score awarded"
        );
        Ok(())
    }

    /// Resolve a pending request without changing any balance.
    pub async fn reject_score(
        &self,
        request_id: i64,
        rejecter: &str,
        reason: &str,
    ) -> TandemResult<()> {
        let store = self.store.lock().await;
        let request = Self::pending_request(&**store, request_id, rejecter).await?;

        let now = Utc::now();
        store
            .apply_resolution(ScoreResolution {
                request_id,
                status: ScoreRequestStatus::Rejected,
                reviewed_at: now,
                score_delta: 0,
                history: ScoreHistoryEntry {
                    ai_name: request.requester.clone(),
                    change: 0,
                    reason: reason.to_string(),
                    requester: request.requester.clone(),
                    awarder: rejecter.to_string(),
                    task_id: request.task_id.clone(),
                    created_at: now,
                },
            })
            .await?;

        tracing::info!(
            request_id,
            requester = %request.requester,
            rejecter = %rejecter,
            "Score request rejected"
        );
        Ok(())
    }

    async fn pending_request(
        store: &dyn LedgerStore,
        request_id: i64,
        actor: &str,
    ) -> TandemResult<ScoreRequest> {
        let request = store
            .get_request(request_id)
            .await?
            .ok_or_else(|| LedgerError::InvalidRequest {
                request_id,
                reason: "no such request".to_string(),
            })?;
        if !request.is_pending() {
            return Err(LedgerError::InvalidRequest {
                request_id,
                reason: format!("request already {}", request.status),
            }
            .into());
        }
        if request.target_ai != actor {
            tracing::warn!(
                request_id,
                actor = %actor,
                target_ai = %request.target_ai,
                "Unauthorized score resolution attempt"
            );
            return Err(LedgerError::Unauthorized {
                request_id,
                actor: actor.to_string(),
                target_ai: request.target_ai.clone(),
            }
            .into());
        }
        Ok(request)
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Pending requests awaiting `target_ai`, newest first.
    pub async fn pending_score_requests(&self, target_ai: &str) -> TandemResult<Vec<ScoreRequest>> {
        let store = self.store.lock().await;
        store
            .list_requests(target_ai, Some(ScoreRequestStatus::Pending))
            .await
    }

    /// Every request targeting `target_ai`, newest first.
    pub async fn all_score_requests(&self, target_ai: &str) -> TandemResult<Vec<ScoreRequest>> {
        let store = self.store.lock().await;
        store.list_requests(target_ai, None).await
    }

    /// History of `ai_name`, newest first. `None` uses the default limit of 50.
    pub async fn score_history(
        &self,
        ai_name: &str,
        limit: Option<usize>,
    ) -> TandemResult<Vec<ScoreHistoryEntry>> {
        let store = self.store.lock().await;
        store
            .history(ai_name, limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
            .await
    }
}

// =============================================================================
// TESTS
// =============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use tandem_storage::InMemoryLedgerStore;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime")
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Any actor other than the target is refused.
        #[test]
        fn prop_non_target_unauthorized(actor in "[a-z]{1,12}") {
            prop_assume!(actor != "coder");
            let rt = runtime();
            let result = rt.block_on(async {
                let ledger = ScoreLedger::new(Arc::new(InMemoryLedgerStore::new()));
                ledger.initialize().await?;
                let id = ledger.request_score("t1", "overseer", "coder", 5, "ok").await?;
                Ok::<_, tandem_core::TandemError>(ledger.award_score(id, &actor, 5, "x").await)
            }).unwrap();
            let is_unauthorized = matches!(
                result,
                Err(tandem_core::TandemError::Ledger(LedgerError::Unauthorized { .. }))
            );
            prop_assert!(is_unauthorized);
        }

        /// N valid resolutions give N history rows, newest first, and earlier
        /// rows are unchanged by later ones.
        #[test]
        fn prop_history_append_only(awards in prop::collection::vec(prop::option::of(-20i64..20), 1..15)) {
            let rt = runtime();
            let (snapshots, final_history, balance) = rt.block_on(async {
                let ledger = ScoreLedger::new(Arc::new(InMemoryLedgerStore::new()));
                ledger.initialize().await?;
                let mut snapshots = Vec::new();
                for (i, award) in awards.iter().enumerate() {
                    let id = ledger
                        .request_score(&format!("t{}", i), "coder", "coder", 1, "ok")
                        .await?;
                    match award {
                        Some(score) => ledger.award_score(id, "coder", *score, "ok").await?,
                        None => ledger.reject_score(id, "coder", "no").await?,
                    }
                    snapshots.push(ledger.score_history("coder", Some(100)).await?);
                }
                let final_history = ledger.score_history("coder", Some(100)).await?;
                let balance = ledger.get_score("coder").await?;
                Ok::<_, tandem_core::TandemError>((snapshots, final_history, balance))
            }).unwrap();

            prop_assert_eq!(final_history.len(), awards.len());
            let expected: Vec<i64> = awards.iter().rev().map(|a| a.unwrap_or(0)).collect();
            let changes: Vec<i64> = final_history.iter().map(|h| h.change).collect();
            prop_assert_eq!(changes, expected);
            prop_assert_eq!(balance, awards.iter().map(|a| a.unwrap_or(0)).sum::<i64>());

            for snapshot in snapshots {
                // Older rows sit at the tail of the newest-first list.
                let tail = &final_history[final_history.len() - snapshot.len()..];
                prop_assert_eq!(tail, &snapshot[..]);
            }
        }
    }
}
