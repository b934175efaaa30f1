//! 가격 계산용 Decimal 유틸리티.

use rust_decimal::Decimal;

/// 가격 타입.
pub type Price = Decimal;

/// 거래량 타입.
pub type Quantity = Decimal;

/// `from` 대비 `to`의 변화율(%)을 계산합니다.
///
/// 기준값이 0이면 `None`을 반환합니다.
pub fn percent_change(from: Decimal, to: Decimal) -> Option<Decimal> {
    if from.is_zero() {
        return None;
    }
    Some((to - from) / from * Decimal::ONE_HUNDRED)
}
