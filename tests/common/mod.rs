//! Shared fixtures for the pipeline integration tests

#![allow(dead_code)]

use chrono::NaiveDateTime;
use coupon_pipeline::models::CandidateRecord;
use rust_decimal::Decimal;

pub const SOURCE: &str = "customer";
pub const SINK: &str = "bonus_coupon";

pub fn enrolled() -> NaiveDateTime {
    NaiveDateTime::parse_from_str("2015-06-01 09:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
}

/// Five eligible candidates, one per code in the order AA, BB, CC, C2, DD.
pub fn scenario() -> Vec<CandidateRecord> {
    vec![
        CandidateRecord::new("C001", "a@example.com", Decimal::from(500))
            .with_gender("M")
            .with_enrolled_at(enrolled()),
        CandidateRecord::new("C002", "b@example.com", Decimal::from(2500))
            .with_gender("F")
            .with_enrolled_at(enrolled()),
        CandidateRecord::new("C003", "c@example.com", Decimal::from(3500))
            .with_gender("F")
            .with_address(Some("서울특별시 송파구"), Some("잠실동"))
            .with_enrolled_at(enrolled()),
        CandidateRecord::new("C004", "d@example.com", Decimal::from(3500))
            .with_gender("F")
            .with_address(Some("서울특별시 송파구"), Some("풍납1동 12"))
            .with_enrolled_at(enrolled()),
        CandidateRecord::new("C005", "e@example.com", Decimal::from(5000))
            .with_gender("M")
            .with_enrolled_at(enrolled()),
    ]
}

pub fn scenario_codes() -> Vec<&'static str> {
    vec!["AA", "BB", "CC", "C2", "DD"]
}
