//! Cost Guard (C3): dry-runs every planner query against the store's
//! estimator and refuses queries over a byte-scanned ceiling.

use async_trait::async_trait;
use obsgate_planner::{LogQueryRequest, PlannedQuery, MAX_LIMIT};

pub const DEFAULT_MAX_BYTES: u64 = 50 * 1024 * 1024 * 1024; // 50 GiB
const CONSERVATIVE_LIMIT_CEILING: u32 = 100;

/// The column store's dry-run estimator. Implementations talk to the real
/// store; tests and the conservative fallback never do.
#[async_trait]
pub trait Estimator: Send + Sync {
    async fn estimate_bytes_scanned(
        &self,
        plan: &PlannedQuery,
    ) -> Result<u64, EstimatorUnreachable>;
}

#[derive(Debug, thiserror::Error)]
#[error("estimator unreachable: {0}")]
pub struct EstimatorUnreachable(pub String);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CostGuardError {
    #[error("estimated bytes scanned {estimated_bytes} exceeds ceiling {ceiling}")]
    BudgetExceeded { estimated_bytes: u64, ceiling: u64 },
    #[error(
        "estimator unreachable and request does not satisfy the conservative fallback policy \
         (time filter required, limit must be <= {CONSERVATIVE_LIMIT_CEILING})"
    )]
    ConservativeFallbackRejected,
}

pub struct CostGuard<E: Estimator> {
    estimator: E,
    max_bytes: u64,
}

impl<E: Estimator> CostGuard<E> {
    pub fn new(estimator: E) -> Self {
        Self {
            estimator,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    pub fn with_ceiling(estimator: E, max_bytes: u64) -> Self {
        Self {
            estimator,
            max_bytes,
        }
    }

    /// Checks a planned query before execution. On estimator failure, falls
    /// back to the conservative policy in `spec.md` §4.3: reject unless both
    /// a time filter (always true — the planner never emits a query without
    /// one) and `limit <= 100` hold.
    pub async fn check(
        &self,
        req: &LogQueryRequest,
        plan: &PlannedQuery,
    ) -> Result<u64, CostGuardError> {
        match self.estimator.estimate_bytes_scanned(plan).await {
            Ok(estimated_bytes) => {
                if estimated_bytes > self.max_bytes {
                    tracing::warn!(
                        target: "obsgate.costguard",
                        estimated_bytes,
                        ceiling = self.max_bytes,
                        "query rejected by cost guard"
                    );
                    Err(CostGuardError::BudgetExceeded {
                        estimated_bytes,
                        ceiling: self.max_bytes,
                    })
                } else {
                    Ok(estimated_bytes)
                }
            }
            Err(err) => {
                tracing::warn!(
                    target: "obsgate.costguard",
                    error = %err,
                    "estimator unreachable, applying conservative fallback"
                );
                if req.limit <= CONSERVATIVE_LIMIT_CEILING {
                    Ok(0)
                } else {
                    Err(CostGuardError::ConservativeFallbackRejected)
                }
            }
        }
    }
}

/// Test/offline estimator that always reports a fixed byte count.
pub struct FixedEstimator(pub u64);

#[async_trait]
impl Estimator for FixedEstimator {
    async fn estimate_bytes_scanned(
        &self,
        _plan: &PlannedQuery,
    ) -> Result<u64, EstimatorUnreachable> {
        Ok(self.0)
    }
}

/// Test/offline estimator simulating an unreachable store.
pub struct UnreachableEstimator;

#[async_trait]
impl Estimator for UnreachableEstimator {
    async fn estimate_bytes_scanned(
        &self,
        _plan: &PlannedQuery,
    ) -> Result<u64, EstimatorUnreachable> {
        Err(EstimatorUnreachable("connection refused".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obsgate_planner::build_list;

    fn req(limit: u32) -> LogQueryRequest {
        LogQueryRequest::new(Some(1), Some(limit), None, None, None, None, None).unwrap()
    }

    #[tokio::test]
    async fn accepts_query_under_ceiling() {
        let guard = CostGuard::with_ceiling(FixedEstimator(1_000), 10_000);
        let r = req(10);
        let plan = build_list(&r);
        assert_eq!(guard.check(&r, &plan).await.unwrap(), 1_000);
    }

    #[tokio::test]
    async fn rejects_query_over_ceiling() {
        let guard = CostGuard::with_ceiling(FixedEstimator(u64::MAX), 10_000);
        let r = req(10);
        let plan = build_list(&r);
        let err = guard.check(&r, &plan).await.unwrap_err();
        assert_eq!(
            err,
            CostGuardError::BudgetExceeded {
                estimated_bytes: u64::MAX,
                ceiling: 10_000
            }
        );
    }

    #[tokio::test]
    async fn falls_back_conservatively_when_estimator_down() {
        let guard = CostGuard::new(UnreachableEstimator);
        let r = req(50);
        let plan = build_list(&r);
        assert!(guard.check(&r, &plan).await.is_ok());
    }

    #[tokio::test]
    async fn conservative_fallback_rejects_large_limit() {
        let guard = CostGuard::new(UnreachableEstimator);
        let r = req(MAX_LIMIT);
        let plan = build_list(&r);
        assert_eq!(
            guard.check(&r, &plan).await.unwrap_err(),
            CostGuardError::ConservativeFallbackRejected
        );
    }
}
