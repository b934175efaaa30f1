//! 가격/지표 크로스오버 판단과 알림 쿨다운.
//!
//! 두 개의 연속된 (가격, 지표) 관측값과 이전 알림 상태만으로 결정하는 순수
//! 함수입니다. 상태 갱신은 결정을 반환하기 전에 완료됩니다.

use crate::types::Price;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 가격이 지표의 어느 쪽에 있는지.
///
/// 가격과 지표가 정확히 같으면 `Below`로 분류합니다. 따라서 "가격 > 지표"로
/// 올라서는 순간만 상향 교차가 되고, 같은 값에 닿는 것만으로는 상향 교차가
/// 아닙니다. 같은 값에서 아래로 내려가는 것도 교차가 아닙니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// 가격 > 지표
    Above,
    /// 가격 <= 지표
    Below,
}

impl Side {
    /// 가격과 지표 값으로 위치를 결정합니다. 같으면 `Below`입니다.
    pub fn of(price: Price, indicator: Price) -> Self {
        if price > indicator {
            Side::Above
        } else {
            Side::Below
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Above => write!(f, "above"),
            Side::Below => write!(f, "below"),
        }
    }
}

/// 한 시점의 가격과 지표 값.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub price: Price,
    pub indicator: Price,
}

impl Observation {
    pub fn new(price: Price, indicator: Price) -> Self {
        Self { price, indicator }
    }

    pub fn side(&self) -> Side {
        Side::of(self.price, self.indicator)
    }

    /// 지표 대비 가격 차이(%). 지표가 0이면 0입니다.
    pub fn difference_pct(&self) -> Decimal {
        if self.indicator.is_zero() {
            return Decimal::ZERO;
        }
        (self.price - self.indicator) / self.indicator * Decimal::ONE_HUNDRED
    }
}

/// 심볼별 알림 상태.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertState {
    /// 마지막으로 관측된 위치 (첫 관측 전에는 없음)
    pub side: Option<Side>,
    /// 마지막 알림 시각
    pub last_alert_at: Option<DateTime<Utc>>,
}

impl AlertState {
    pub fn new(side: Side, last_alert_at: DateTime<Utc>) -> Self {
        Self {
            side: Some(side),
            last_alert_at: Some(last_alert_at),
        }
    }
}

/// 발생한 크로스오버.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crossover {
    /// 새 위치
    pub direction: Side,
    /// 현재 가격
    pub price: Price,
    /// 현재 지표 값
    pub indicator: Price,
    /// 지표 대비 가격 차이(%)
    pub difference_pct: Decimal,
    /// 판단 시각
    pub at: DateTime<Utc>,
}

/// 정책 판단 결과.
#[derive(Debug, Clone, PartialEq)]
pub enum CrossoverDecision {
    /// 알림 발송
    Alert(Crossover),
    /// 방향이 바뀌었지만 쿨다운 중
    Suppressed { direction: Side, remaining: Duration },
    /// 방향 변화 없음
    Unchanged(Side),
}

impl CrossoverDecision {
    pub fn is_alert(&self) -> bool {
        matches!(self, CrossoverDecision::Alert(_))
    }
}

/// 크로스오버 알림 정책.
#[derive(Debug, Clone, Copy)]
pub struct CrossoverPolicy {
    cooldown: Duration,
}

impl CrossoverPolicy {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// 방향 변화 여부만 판단합니다. 상태는 건드리지 않습니다.
    ///
    /// 중간 틱의 잠정 크로스오버 확인에 사용합니다.
    pub fn detect(prev: Observation, curr: Observation) -> Option<Side> {
        let side = curr.side();
        (side != prev.side()).then_some(side)
    }

    /// 두 관측값과 알림 상태로 알림 여부를 결정합니다.
    ///
    /// 알림이 억제되어도 `state.side`는 최신 위치로 갱신됩니다.
    pub fn evaluate(
        &self,
        state: &mut AlertState,
        prev: Observation,
        curr: Observation,
        now: DateTime<Utc>,
    ) -> CrossoverDecision {
        let side = curr.side();

        let Some(direction) = Self::detect(prev, curr) else {
            state.side = Some(side);
            return CrossoverDecision::Unchanged(side);
        };

        if let Some(last) = state.last_alert_at {
            let elapsed = now - last;
            if elapsed < self.cooldown {
                state.side = Some(side);
                return CrossoverDecision::Suppressed {
                    direction,
                    remaining: self.cooldown - elapsed,
                };
            }
        }

        state.side = Some(side);
        state.last_alert_at = Some(now);

        CrossoverDecision::Alert(Crossover {
            direction,
            price: curr.price,
            indicator: curr.indicator,
            difference_pct: curr.difference_pct(),
            at: now,
        })
    }
}
