//! History ledger: append-only audit trail of alert evaluations.
//!
//! One row per evaluated candidate (not per recipient). Rows are never
//! updated; retention cleanup deletes by age only, so it can run while the
//! scheduler is writing.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use nimbus_common::error::AppError;
use nimbus_common::types::{AlertCandidate, AlertStatus, Severity};

use crate::store::{AlertStore, HistoryPage, HistoryQuery, NewHistoryEntry, PurgeCounts};

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 500;

/// Raw query-string parameters for `GET /api/alerts/history`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub severity: Option<String>,
    pub status: Option<String>,
}

pub struct HistoryLedger {
    store: Arc<dyn AlertStore>,
}

impl HistoryLedger {
    pub fn new(store: Arc<dyn AlertStore>) -> Self {
        Self { store }
    }

    /// Append one row for an evaluated alert.
    pub async fn record(
        &self,
        alert: &AlertCandidate,
        status: AlertStatus,
        recipients_notified: usize,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let entry = NewHistoryEntry::from_candidate(
            alert,
            status,
            i32::try_from(recipients_notified).unwrap_or(i32::MAX),
            at,
        );
        self.store.append_history(&entry).await?;

        tracing::debug!(
            alert_id = %alert.id,
            status = %status,
            recipients_notified,
            "History recorded"
        );
        Ok(())
    }

    pub async fn query(&self, params: &HistoryParams) -> Result<HistoryPage, AppError> {
        let query = Self::parse_query(params)?;
        self.store.query_history(&query).await
    }

    /// Delete rows older than `retention_days` before `now`.
    pub async fn cleanup(
        &self,
        retention_days: u32,
        now: DateTime<Utc>,
    ) -> Result<PurgeCounts, AppError> {
        if retention_days == 0 {
            return Err(AppError::Validation(
                "retention_days must be at least 1".to_string(),
            ));
        }

        let cutoff = now - Duration::days(i64::from(retention_days));
        let purged = self.store.purge_before(cutoff).await?;

        tracing::info!(
            retention_days,
            cutoff = %cutoff,
            history_deleted = purged.history,
            deliveries_deleted = purged.deliveries,
            "Alert history cleanup complete"
        );
        Ok(purged)
    }

    /// Validate pagination and filters.
    pub fn parse_query(params: &HistoryParams) -> Result<HistoryQuery, AppError> {
        let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            return Err(AppError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        let offset = params.offset.unwrap_or(0);
        if offset < 0 {
            return Err(AppError::Validation(
                "offset must not be negative".to_string(),
            ));
        }

        let severity = params
            .severity
            .as_deref()
            .map(str::parse::<Severity>)
            .transpose()
            .map_err(AppError::Validation)?;
        let status = params
            .status
            .as_deref()
            .map(str::parse::<AlertStatus>)
            .transpose()
            .map_err(AppError::Validation)?;

        Ok(HistoryQuery {
            limit,
            offset,
            severity,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryStore, candidate};
    use nimbus_common::types::AlertType;

    #[test]
    fn test_parse_query_defaults() {
        let query = HistoryLedger::parse_query(&HistoryParams::default()).unwrap();
        assert_eq!(
            query,
            HistoryQuery {
                limit: DEFAULT_PAGE_SIZE,
                offset: 0,
                severity: None,
                status: None,
            }
        );
    }

    #[test]
    fn test_parse_query_rejects_bad_values() {
        for params in [
            HistoryParams {
                limit: Some(0),
                ..Default::default()
            },
            HistoryParams {
                limit: Some(MAX_PAGE_SIZE + 1),
                ..Default::default()
            },
            HistoryParams {
                offset: Some(-1),
                ..Default::default()
            },
            HistoryParams {
                severity: Some("mild".to_string()),
                ..Default::default()
            },
            HistoryParams {
                status: Some("delivered".to_string()),
                ..Default::default()
            },
        ] {
            assert!(matches!(
                HistoryLedger::parse_query(&params),
                Err(AppError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_query_filters_and_paginates() {
        let store = Arc::new(MemoryStore::default());
        let ledger = HistoryLedger::new(store.clone());
        let now = Utc::now();

        let heat = candidate(AlertType::ExtremeHeat, Severity::Extreme, "TestCity");
        let fog = candidate(AlertType::Fog, Severity::Moderate, "TestCity");
        for i in 0..3 {
            ledger
                .record(&heat, AlertStatus::Sent, 1, now - Duration::minutes(i))
                .await
                .unwrap();
        }
        ledger
            .record(&fog, AlertStatus::Filtered, 0, now)
            .await
            .unwrap();

        let page = ledger
            .query(&HistoryParams {
                limit: Some(2),
                severity: Some("extreme".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.entries.len(), 2);
        assert!(page.entries.iter().all(|e| e.severity == Severity::Extreme));
        assert!(page.entries[0].created_at >= page.entries[1].created_at);

        let filtered = ledger
            .query(&HistoryParams {
                status: Some("filtered".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(filtered.total, 1);
        assert_eq!(filtered.entries[0].alert_type, AlertType::Fog);
    }

    #[tokio::test]
    async fn test_cleanup_respects_retention() {
        let store = Arc::new(MemoryStore::default());
        let ledger = HistoryLedger::new(store.clone());
        let now = Utc::now();
        let retention_days = 30;
        let alert = candidate(AlertType::HighUv, Severity::Severe, "TestCity");

        ledger
            .record(
                &alert,
                AlertStatus::Sent,
                1,
                now - Duration::days(retention_days + 1),
            )
            .await
            .unwrap();
        ledger
            .record(
                &alert,
                AlertStatus::Sent,
                1,
                now - Duration::days(retention_days - 1),
            )
            .await
            .unwrap();

        let purged = ledger.cleanup(retention_days as u32, now).await.unwrap();
        assert_eq!(purged.history, 1);

        let remaining = ledger.query(&HistoryParams::default()).await.unwrap();
        assert_eq!(remaining.total, 1);
        assert_eq!(
            remaining.entries[0].created_at,
            now - Duration::days(retention_days - 1)
        );
    }

    #[tokio::test]
    async fn test_cleanup_rejects_zero_retention() {
        let ledger = HistoryLedger::new(Arc::new(MemoryStore::default()));
        assert!(matches!(
            ledger.cleanup(0, Utc::now()).await,
            Err(AppError::Validation(_))
        ));
    }
}
