//! stake and fee weighted relayer lottery

use num_traits::ToPrimitive;
use rand::Rng;

use super::directory::RelayerRecord;

/// service fee range in percent; weight falls to zero at `max`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeBounds {
    pub min: f64,
    pub max: f64,
}

impl FeeBounds {
    pub fn for_network(chain_id: u64) -> Self {
        if chain_id == crate::PRIMARY_CHAIN_ID {
            Self { min: 0.33, max: 0.53 }
        } else {
            Self { min: 0.01, max: 0.3 }
        }
    }
}

pub fn fee_coefficient(fee: f64, bounds: FeeBounds) -> f64 {
    if fee >= bounds.max {
        return 0.0;
    }
    if fee <= bounds.min {
        return 1.0;
    }
    let spread = bounds.max - bounds.min;
    1.0 - (fee - bounds.min).powi(2) / spread.powi(2)
}

pub fn score(record: &RelayerRecord, bounds: FeeBounds) -> f64 {
    let stake = record.stake_balance().to_f64().unwrap_or(0.0);
    stake * fee_coefficient(record.service_fee(), bounds)
}

/// roulette-wheel draw over `scores`; uniform when every score is zero
pub fn pick_index<R: Rng + ?Sized>(scores: &[f64], rng: &mut R) -> Option<usize> {
    if scores.is_empty() {
        return None;
    }
    let total: f64 = scores.iter().sum();
    let mut draw = total * rng.gen::<f64>();
    for (i, s) in scores.iter().enumerate() {
        if draw < *s {
            return Some(i);
        }
        draw -= s;
    }
    Some(rng.gen_range(0..scores.len()))
}

pub fn select<'a, R: Rng + ?Sized>(
    records: &'a [RelayerRecord],
    bounds: FeeBounds,
    rng: &mut R,
) -> Option<&'a RelayerRecord> {
    let scores: Vec<f64> = records.iter().map(|r| score(r, bounds)).collect();
    pick_index(&scores, rng).map(|i| &records[i])
}
