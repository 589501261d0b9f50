//! Path cost models.
//!
//! A path accumulates two measures as it grows: the estimated number of
//! intermediate solutions (`sum_est_card`) and the estimated number of tuples
//! read from the indices (`sum_est_read`). A cost model collapses the pair
//! into the single value paths compete on. Which collapse is right depends on
//! the deployment: intermediate-solution count tracks join work, tuples read
//! tracks IO. The choice is explicit rather than baked in.

/// Collapses a path's cumulative statistics into a comparable cost.
pub trait PathCostModel: Send + Sync {
    fn cost(&self, sum_est_read: u64, sum_est_card: u64) -> u64;
}

/// Cost by estimated intermediate solutions. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCostModel;

impl PathCostModel for DefaultCostModel {
    fn cost(&self, _sum_est_read: u64, sum_est_card: u64) -> u64 {
        sum_est_card
    }
}

/// Cost by estimated tuples read (IO only).
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadCostModel;

impl PathCostModel for ReadCostModel {
    fn cost(&self, sum_est_read: u64, _sum_est_card: u64) -> u64 {
        sum_est_read
    }
}

/// Cost by intermediate solutions plus tuples read.
#[derive(Debug, Clone, Copy, Default)]
pub struct CombinedCostModel;

impl PathCostModel for CombinedCostModel {
    fn cost(&self, sum_est_read: u64, sum_est_card: u64) -> u64 {
        sum_est_read.saturating_add(sum_est_card)
    }
}
