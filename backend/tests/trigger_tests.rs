//! Trigger evaluator tests
//!
//! Unit and property-based tests for:
//! - Rule order and first-match semantics
//! - Condition cache suppression and TTL expiry
//! - Severity warning rule and warning cache
//! - Missing data and the forced idle check

use chrono::{DateTime, Duration, TimeZone, Utc};
use shared::{
    ForecastField, Location, Measurement, Severity, SeverityWarning, SuppressionReason,
    TriggerReason,
};
use stormcast_backend::config::{CacheConfig, TriggerConfig};
use stormcast_backend::services::TriggerEvaluator;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
}

fn minutes(n: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(n)
}

fn evaluator() -> TriggerEvaluator {
    TriggerEvaluator::new(
        &Location::default(),
        TriggerConfig::default(),
        CacheConfig::default(),
    )
}

fn reading(at: DateTime<Utc>, probability: f64) -> Measurement {
    Measurement::new("station", at)
        .with(ForecastField::Temperature, 22.0)
        .with(ForecastField::Humidity, 60.0)
        .with(ForecastField::Pressure, 1014.0)
        .with(ForecastField::WindSpeed, 4.0)
        .with(ForecastField::PrecipitationProbability, probability)
}

fn warning(id: &str, severity: Severity, start: DateTime<Utc>) -> SeverityWarning {
    SeverityWarning {
        id: id.to_string(),
        event: "Thunderstorms".to_string(),
        severity,
        window_start: start,
        window_end: Some(start + Duration::hours(6)),
        description: None,
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

mod unit_tests {
    use super::*;

    #[test]
    fn test_missing_measurement_is_no_data() {
        let e = evaluator();
        let decision = e.evaluate_at(t0(), None, &[]);
        assert!(!decision.fired());
        assert_eq!(decision.suppression(), Some(SuppressionReason::NoData));
        assert!(decision.cache_key.is_none());
    }

    #[test]
    fn test_malformed_measurement_is_no_data() {
        let e = evaluator();
        let empty = Measurement::new("station", t0());
        assert_eq!(
            e.evaluate_at(t0(), Some(&empty), &[]).suppression(),
            Some(SuppressionReason::NoData)
        );

        let nan = Measurement::new("station", t0())
            .with(ForecastField::PrecipitationProbability, f64::NAN);
        assert_eq!(
            e.evaluate_at(t0(), Some(&nan), &[]).suppression(),
            Some(SuppressionReason::NoData)
        );
        assert!(e.cache_entries(t0()).is_empty());
    }

    #[test]
    fn test_quiet_weather_does_not_fire() {
        let e = evaluator();
        let decision = e.evaluate_at(t0(), Some(&reading(t0(), 40.0)), &[]);
        assert_eq!(decision.suppression(), Some(SuppressionReason::NoCondition));
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let e = evaluator();
        let m = reading(t0(), 92.0)
            .with(ForecastField::Precipitation, 12.0)
            .with(ForecastField::WindSpeed, 30.0);
        let decision = e.evaluate_at(t0(), Some(&m), &[]);
        assert!(decision.fired());
        assert_eq!(decision.reason(), Some(TriggerReason::PrecipitationProbability));

        // Gale outranks a storm keyword in the condition label
        let e = evaluator();
        let m = Measurement::new("station", t0())
            .with(ForecastField::WindSpeed, 25.0)
            .with_condition("Thunderstorm");
        let decision = e.evaluate_at(t0(), Some(&m), &[]);
        assert_eq!(decision.reason(), Some(TriggerReason::Gale));
        assert_eq!(decision.reason().map(|r| r.rule_number()), Some(4));
    }

    #[test]
    fn test_each_measurement_rule() {
        let cases = [
            (
                Measurement::new("s", t0()).with(ForecastField::Precipitation, 9.5),
                TriggerReason::HeavyPrecipitation,
            ),
            (
                Measurement::new("s", t0())
                    .with(ForecastField::Humidity, 88.0)
                    .with(ForecastField::Pressure, 1001.0),
                TriggerReason::StormSignature,
            ),
            (
                Measurement::new("s", t0())
                    .with(ForecastField::Temperature, 25.0)
                    .with_condition("Thunderstorm with hail"),
                TriggerReason::StormKeyword,
            ),
            (
                Measurement::new("s", t0()).with(ForecastField::WindSpeed, 20.0),
                TriggerReason::Gale,
            ),
        ];
        for (measurement, expected) in cases {
            let e = evaluator();
            let decision = e.evaluate_at(t0(), Some(&measurement), &[]);
            assert_eq!(decision.reason(), Some(expected), "{:?}", measurement);
        }
    }

    #[test]
    fn test_same_bucket_within_ttl_is_cache_hit() {
        let e = evaluator();
        assert!(e.evaluate_at(t0(), Some(&reading(t0(), 90.0)), &[]).fired());

        // 93% falls in the same 10-point probability band
        let decision = e.evaluate_at(minutes(10), Some(&reading(minutes(10), 93.0)), &[]);
        assert_eq!(decision.suppression(), Some(SuppressionReason::CacheHit));
        assert!(matches!(
            decision.outcome,
            shared::TriggerOutcome::Suppressed {
                matched: Some(TriggerReason::PrecipitationProbability),
                ..
            }
        ));
    }

    #[test]
    fn test_different_bucket_fires_again() {
        let e = evaluator();
        assert!(e.evaluate_at(t0(), Some(&reading(t0(), 90.0)), &[]).fired());

        let gale = reading(minutes(10), 90.0).with(ForecastField::WindSpeed, 22.0);
        let decision = e.evaluate_at(minutes(10), Some(&gale), &[]);
        assert!(decision.fired());
        assert_ne!(
            decision.cache_key,
            e.recent_decisions(2)[1].cache_key,
            "wind band must change the bucket"
        );
    }

    #[test]
    fn test_expired_entry_fires_after_observation_break() {
        let e = evaluator();
        assert!(e.evaluate_at(t0(), Some(&reading(t0(), 90.0)), &[]).fired());

        let decision = e.evaluate_at(minutes(70), Some(&reading(minutes(70), 90.0)), &[]);
        assert!(decision.fired());
        assert_eq!(e.last_fired_at(), Some(minutes(70)));
    }

    #[test]
    fn test_sustained_condition_does_not_refire_on_expiry() {
        let e = evaluator();
        let mut fires = 0;
        for step in 0..=9 {
            let at = minutes(step * 10);
            if e.evaluate_at(at, Some(&reading(at, 90.0)), &[]).fired() {
                fires += 1;
            }
        }
        assert_eq!(fires, 1);

        let last = e.recent_decisions(1).remove(0);
        assert_eq!(last.suppression(), Some(SuppressionReason::SustainedCondition));
    }

    #[test]
    fn test_forced_check_after_max_idle() {
        let e = evaluator();
        let quiet = reading(t0(), 30.0);
        assert!(!e.evaluate_at(t0(), Some(&quiet), &[]).fired());
        assert!(!e.evaluate_at(minutes(179), Some(&quiet), &[]).fired());

        let decision = e.evaluate_at(minutes(181), Some(&quiet), &[]);
        assert_eq!(decision.reason(), Some(TriggerReason::ForcedCheck));

        // The idle clock restarts at the forced fire
        let again = e.evaluate_at(minutes(190), Some(&quiet), &[]);
        assert_eq!(again.suppression(), Some(SuppressionReason::NoCondition));
    }

    #[test]
    fn test_warning_rule_and_warning_cache() {
        let e = evaluator();
        let quiet = reading(t0(), 20.0);
        let warnings = vec![warning("w-1", Severity::Severe, minutes(120))];

        let decision = e.evaluate_at(t0(), Some(&quiet), &warnings);
        assert_eq!(decision.reason(), Some(TriggerReason::SeverityWarning));
        assert_eq!(decision.warning_ids, vec!["w-1".to_string()]);

        // Covered for the warning TTL even though the condition TTL is shorter
        let later = e.evaluate_at(minutes(90), Some(&reading(minutes(90), 20.0)), &warnings);
        assert_eq!(later.suppression(), Some(SuppressionReason::CacheHit));

        // A new warning id is not covered
        let mut more = warnings.clone();
        more.push(warning("w-2", Severity::Extreme, minutes(60)));
        let decision = e.evaluate_at(minutes(100), Some(&reading(minutes(100), 20.0)), &more);
        assert!(decision.fired());
        assert_eq!(decision.warning_ids, vec!["w-2".to_string()]);
    }

    #[test]
    fn test_minor_and_distant_warnings_ignored() {
        let e = evaluator();
        let quiet = reading(t0(), 20.0);
        let warnings = vec![
            warning("minor", Severity::Minor, t0()),
            warning("distant", Severity::Severe, t0() + Duration::hours(30)),
        ];
        let decision = e.evaluate_at(t0(), Some(&quiet), &warnings);
        assert_eq!(decision.suppression(), Some(SuppressionReason::NoCondition));
    }

    #[test]
    fn test_measurement_rule_outranks_warning() {
        let e = evaluator();
        let warnings = vec![warning("w-1", Severity::Severe, t0())];
        let decision = e.evaluate_at(t0(), Some(&reading(t0(), 95.0)), &warnings);
        assert_eq!(decision.reason(), Some(TriggerReason::PrecipitationProbability));
        assert!(decision.warning_ids.is_empty());
    }

    #[test]
    fn test_rescope_clears_cache() {
        let e = evaluator();
        assert!(e.evaluate_at(t0(), Some(&reading(t0(), 90.0)), &[]).fired());
        assert!(!e.cache_entries(t0()).is_empty());

        e.rescope(&Location::new("Brno", 49.1951, 16.6068));
        assert!(e.cache_entries(t0()).is_empty());
        assert!(e
            .evaluate_at(minutes(5), Some(&reading(minutes(5), 90.0)), &[])
            .fired());
    }
}

// ============================================================================
// Property Tests
// ============================================================================

mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// A second reading in the fired bucket is suppressed within the TTL
        #[test]
        fn prop_same_bucket_suppressed_within_ttl(
            band in 9u32..10,
            offset_a in 0.1f64..9.9,
            offset_b in 0.1f64..9.9,
            delay in 1i64..60,
        ) {
            let e = evaluator();
            let p1 = band as f64 * 10.0 + offset_a;
            let p2 = band as f64 * 10.0 + offset_b;

            let first = e.evaluate_at(t0(), Some(&reading(t0(), p1)), &[]);
            prop_assert!(first.fired());

            let at = minutes(delay);
            let second = e.evaluate_at(at, Some(&reading(at, p2)), &[]);
            prop_assert!(!second.fired());
            prop_assert_eq!(second.suppression(), Some(SuppressionReason::CacheHit));
        }

        /// After the TTL, an equivalent reading seen after a break fires again
        #[test]
        fn prop_eligible_again_after_ttl(delay in 61i64..170, probability in 86.0f64..99.9) {
            let e = evaluator();
            prop_assert!(e.evaluate_at(t0(), Some(&reading(t0(), probability)), &[]).fired());

            let at = minutes(delay);
            prop_assert!(e.evaluate_at(at, Some(&reading(at, probability)), &[]).fired());
        }

        /// Evaluation is deterministic for identical inputs and state
        #[test]
        fn prop_deterministic(
            probability in 0.0f64..100.0,
            wind in 0.0f64..40.0,
            humidity in 0.0f64..100.0,
            pressure in 960.0f64..1040.0,
        ) {
            let m = Measurement::new("s", t0())
                .with(ForecastField::PrecipitationProbability, probability)
                .with(ForecastField::WindSpeed, wind)
                .with(ForecastField::Humidity, humidity)
                .with(ForecastField::Pressure, pressure);

            let a = evaluator().evaluate_at(t0(), Some(&m), &[]);
            let b = evaluator().evaluate_at(t0(), Some(&m), &[]);
            prop_assert_eq!(a.outcome, b.outcome);
            prop_assert_eq!(a.cache_key, b.cache_key);
        }
    }
}
