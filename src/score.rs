use std::cmp::Ordering;

use crate::models::{CompanyTotals, LeaderboardEntry};

/// kgCO2e at which the emission component reaches zero.
pub const REFERENCE_EMISSION_KGCO2E: f64 = 5000.0;
const BONUS_PER_BILL: f64 = 5.0;
const MAX_BILL_BONUS: f64 = 25.0;

/// Rounds to two decimals on the exact binary value, ties to even.
pub fn round2(value: f64) -> f64 {
    format!("{value:.2}").parse().unwrap_or(value)
}

/// Heuristic 0-100 indicator: linear penalty on total emission plus a capped
/// bonus for the number of bills reported.
pub fn score(total_emission: f64, bill_count: usize) -> f64 {
    let emission_score = 100.0 - (total_emission / REFERENCE_EMISSION_KGCO2E * 100.0);
    let bill_bonus = (bill_count as f64 * BONUS_PER_BILL).min(MAX_BILL_BONUS);
    round2(emission_score + bill_bonus).clamp(0.0, 100.0)
}

/// Percent change between the last two points of a monthly series.
pub fn trend_percent(monthly: &[f64]) -> f64 {
    match monthly {
        [.., previous, last] if *previous != 0.0 => (last - previous) / previous * 100.0,
        _ => 0.0,
    }
}

pub fn rank_leaderboard(companies: Vec<CompanyTotals>) -> Vec<LeaderboardEntry> {
    let entries = companies
        .into_iter()
        .map(|company| LeaderboardEntry {
            rank: 0,
            score: score(company.total_emission, company.bill_count),
            company_name: company.company_name,
            logo_path: company.logo_path,
            total_emission: company.total_emission,
        })
        .collect();
    rank_scored(entries)
}

/// Orders by score descending, then lower emission first, and numbers the
/// result 1..N. Full ties keep their input order.
pub fn rank_scored(mut entries: Vec<LeaderboardEntry>) -> Vec<LeaderboardEntry> {
    entries.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                a.total_emission
                    .partial_cmp(&b.total_emission)
                    .unwrap_or(Ordering::Equal)
            })
    });
    for (index, entry) in entries.iter_mut().enumerate() {
        entry.rank = index + 1;
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, score: f64, total_emission: f64) -> LeaderboardEntry {
        LeaderboardEntry {
            rank: 0,
            company_name: name.to_string(),
            logo_path: "defaultlogo.png".to_string(),
            score,
            total_emission,
        }
    }

    fn totals(name: &str, total_emission: f64, bill_count: usize) -> CompanyTotals {
        CompanyTotals {
            company_name: name.to_string(),
            logo_path: "defaultlogo.png".to_string(),
            total_emission,
            bill_count,
        }
    }

    #[test]
    fn score_boundaries() {
        assert_eq!(score(0.0, 0), 100.0);
        assert_eq!(score(5000.0, 0), 0.0);
        assert_eq!(score(10000.0, 10), 0.0);
    }

    #[test]
    fn bill_bonus_is_capped() {
        assert_eq!(score(2500.0, 1), 55.0);
        assert_eq!(score(2500.0, 5), 75.0);
        assert_eq!(score(2500.0, 50), 75.0);
        assert_eq!(score(0.0, 3), 100.0);
    }

    #[test]
    fn score_rounds_to_two_decimals() {
        assert_eq!(score(1234.5678, 0), 75.31);
    }

    #[test]
    fn rounding_follows_the_stored_binary_value() {
        assert_eq!(score(0.75, 0), 99.98);
        assert_eq!(score(1.25, 0), 99.97);
        assert_eq!(round2(2.675), 2.67);
    }

    #[test]
    fn trend_uses_last_two_months() {
        assert_eq!(trend_percent(&[100.0, 150.0]), 50.0);
        assert_eq!(trend_percent(&[10.0, 200.0, 100.0]), -50.0);
    }

    #[test]
    fn trend_guards_short_series_and_zero_baseline() {
        assert_eq!(trend_percent(&[]), 0.0);
        assert_eq!(trend_percent(&[42.0]), 0.0);
        assert_eq!(trend_percent(&[0.0, 50.0]), 0.0);
    }

    #[test]
    fn ties_break_on_lower_emission() {
        let ranked = rank_scored(vec![
            entry("A", 80.0, 100.0),
            entry("B", 80.0, 50.0),
            entry("C", 90.0, 200.0),
        ]);
        let order: Vec<(&str, usize)> = ranked
            .iter()
            .map(|e| (e.company_name.as_str(), e.rank))
            .collect();
        assert_eq!(order, vec![("C", 1), ("B", 2), ("A", 3)]);
    }

    #[test]
    fn full_ties_get_sequential_ranks_in_input_order() {
        let ranked = rank_scored(vec![entry("X", 70.0, 10.0), entry("Y", 70.0, 10.0)]);
        assert_eq!(ranked[0].company_name, "X");
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].rank, 2);
    }

    #[test]
    fn leaderboard_scores_each_company() {
        let ranked = rank_leaderboard(vec![
            totals("Heavy", 6000.0, 2),
            totals("Idle", 0.0, 0),
            totals("Steady", 1000.0, 4),
        ]);
        let names: Vec<&str> = ranked.iter().map(|e| e.company_name.as_str()).collect();
        assert_eq!(names, vec!["Idle", "Steady", "Heavy"]);
        assert_eq!(ranked[1].score, 100.0);
        assert_eq!(ranked[1].rank, 2);
        assert_eq!(ranked[2].score, 0.0);
    }
}
