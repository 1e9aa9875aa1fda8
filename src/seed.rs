//! Deterministic synthetic candidates for benchmarking
//!
//! The same count always yields the same rows, so runs on different
//! machines and strategies see identical input. The data covers every tier,
//! exact tier boundaries, exception-clause matches and near misses,
//! incomplete rows and rows enrolled before the default cutoff.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

use crate::models::CandidateRecord;

/// Matching addresses for the default exception clause
const MATCHING_ADDRESS: (&str, &str) = ("서울특별시 송파구", "풍납1동");

/// Generate `count` candidates with identifiers `C00000001`, `C00000002`, ...
pub fn synthetic_candidates(count: usize) -> Vec<CandidateRecord> {
    (1..=count as u64).map(synthetic_candidate).collect()
}

/// The `n`-th synthetic candidate (1-based).
pub fn synthetic_candidate(n: u64) -> CandidateRecord {
    let h = mix(n);

    let credit_limit = match n % 50 {
        10 => Decimal::new(100_000, 2),
        20 => Decimal::new(350_000, 2),
        30 => Decimal::new(300_000, 2),
        40 => Decimal::new(400_000, 2),
        _ => Decimal::new((h % 600_000) as i64, 2),
    };

    let gender = if n % 50 == 20 || h % 3 != 0 { "F" } else { "M" };

    let address2 = format!("{} {}", MATCHING_ADDRESS.1, n % 200 + 1);
    let (address1, address2) = match n % 4 {
        0 => (Some(MATCHING_ADDRESS.0), Some(address2.as_str())),
        1 => (Some(MATCHING_ADDRESS.0), Some("잠실동")),
        2 => (Some("부산광역시 해운대구"), None),
        _ => (None, Some(address2.as_str())),
    };

    let mut record = CandidateRecord::new(
        format!("C{:08}", n),
        format!("user{}@example.com", n),
        credit_limit,
    )
    .with_gender(gender)
    .with_address(address1, address2)
    .with_enrolled_at(enrollment(n, h));

    if n % 97 == 0 {
        record.email = None;
    }
    if n % 89 == 0 {
        record.credit_limit = None;
    }
    record
}

fn enrollment(n: u64, h: u64) -> NaiveDateTime {
    let base = if n % 13 == 0 {
        NaiveDate::from_ymd_opt(2010, 3, 1)
    } else {
        NaiveDate::from_ymd_opt(2013, 1, 1)
    }
    .and_then(|d| d.and_hms_opt(0, 0, 0))
    .unwrap_or_default();

    base + Duration::days((h % 1_000) as i64) + Duration::seconds((h % 86_400) as i64)
}

/// Cheap integer hash (splitmix64 finalizer).
fn mix(n: u64) -> u64 {
    let mut z = n.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ClassificationRule;
    use crate::database::SelectionPredicate;
    use crate::models::CategoryCode;
    use std::collections::HashSet;

    #[test]
    fn test_generation_is_deterministic() {
        assert_eq!(synthetic_candidates(100), synthetic_candidates(100));
        assert_eq!(synthetic_candidates(3)[2].id, "C00000003");
    }

    #[test]
    fn test_covers_every_code() {
        let rule = ClassificationRule::default();
        let codes: HashSet<CategoryCode> = synthetic_candidates(500)
            .iter()
            .filter_map(|r| rule.classify_record(r))
            .collect();
        assert_eq!(codes.len(), CategoryCode::ALL.len());
    }

    #[test]
    fn test_includes_rows_the_run_skips() {
        let predicate = SelectionPredicate::new(NaiveDate::from_ymd_opt(2013, 1, 1).unwrap());
        let records = synthetic_candidates(500);
        assert!(records.iter().any(|r| !r.is_complete()));
        assert!(records.iter().any(|r| !predicate.admits_enrollment(r.enrolled_at)));
        assert!(records.iter().filter(|r| predicate.accepts(r)).count() > 400);
    }

    #[test]
    fn test_second_record_is_eligible() {
        let predicate = SelectionPredicate::new(NaiveDate::from_ymd_opt(2013, 1, 1).unwrap());
        assert!(predicate.accepts(&synthetic_candidate(2)));
    }
}
