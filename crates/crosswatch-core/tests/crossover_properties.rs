//! 크로스오버 정책 속성 테스트

use chrono::{Duration, TimeZone, Utc};
use crosswatch_core::{AlertState, CrossoverDecision, CrossoverPolicy, Observation, Side};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn decimal(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

proptest! {
    /// 알림 간격은 항상 쿨다운 이상이다.
    #[test]
    fn alerts_respect_cooldown(
        prices in prop::collection::vec(1i64..100_000, 2..200),
        step_secs in 1i64..600,
        cooldown_secs in 0i64..3_600,
    ) {
        let policy = CrossoverPolicy::new(Duration::seconds(cooldown_secs));
        let mut state = AlertState::default();
        let indicator = decimal(50_000);
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let mut last_alert = None;
        for (i, pair) in prices.windows(2).enumerate() {
            let now = start + Duration::seconds(step_secs * i as i64);
            let prev = Observation::new(decimal(pair[0]), indicator);
            let curr = Observation::new(decimal(pair[1]), indicator);

            if let CrossoverDecision::Alert(_) = policy.evaluate(&mut state, prev, curr, now) {
                if let Some(previous) = last_alert {
                    prop_assert!(now - previous >= Duration::seconds(cooldown_secs));
                }
                last_alert = Some(now);
            }
            // 판단 후 상태의 위치는 항상 현재 관측과 일치
            prop_assert_eq!(state.side, Some(curr.side()));
        }
    }

    /// 같은 쪽에 머무르면 절대 알림이 발생하지 않는다.
    #[test]
    fn same_side_never_alerts(a in 1i64..100_000, b in 1i64..100_000) {
        let policy = CrossoverPolicy::new(Duration::zero());
        let mut state = AlertState::default();
        let prev = Observation::new(decimal(a), decimal(a));
        let curr = Observation::new(decimal(b), decimal(b));

        let decision = policy.evaluate(&mut state, prev, curr, Utc::now());
        prop_assert_eq!(decision, CrossoverDecision::Unchanged(Side::Below));
    }
}
