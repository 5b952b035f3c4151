use rust_decimal::{Decimal, RoundingStrategy};

use crate::ports::venue::OrderSide;

/// Rounds a limit price onto the tick grid: buys round down, sells round up.
pub fn round_price_by_tick(price: Decimal, tick: Decimal, side: OrderSide) -> Decimal {
    if tick <= Decimal::ZERO {
        return price;
    }
    let rounding = match side {
        OrderSide::Buy => RoundingStrategy::ToNegativeInfinity,
        OrderSide::Sell => RoundingStrategy::ToPositiveInfinity,
    };
    let mut multiples = (price / tick).round_dp_with_strategy(0, rounding);
    if multiples < Decimal::ONE {
        multiples = Decimal::ONE;
    }
    let rounded = multiples * tick;
    rounded.round_dp_with_strategy(tick.scale(), RoundingStrategy::ToZero)
}

/// Floors `size` to a multiple of `step`. May return zero; callers gate on the minimum.
pub fn quantize_size_by_step(size: Decimal, step: Decimal) -> Decimal {
    if size <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    if step <= Decimal::ZERO {
        return size;
    }
    let rounded = (size / step).trunc() * step;
    rounded.round_dp_with_strategy(step.scale(), RoundingStrategy::ToZero)
}

/// Rounds `size` up to a multiple of `step`. Used for reduce-only closes so no dust is left.
pub fn quantize_size_by_step_ceiling(size: Decimal, step: Decimal) -> Decimal {
    if size <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    if step <= Decimal::ZERO {
        return size;
    }
    let multiples = (size / step).round_dp_with_strategy(0, RoundingStrategy::ToPositiveInfinity);
    let rounded = multiples.max(Decimal::ONE) * step;
    rounded.round_dp_with_strategy(step.scale(), RoundingStrategy::ToZero)
}

/// Worst acceptable price for an IOC order: `reference * (1 ± slippage)` on the tick grid.
pub fn acceptable_price(
    reference: Decimal,
    slippage_pct: Decimal,
    tick: Decimal,
    side: OrderSide,
) -> Decimal {
    let raw = match side {
        OrderSide::Buy => reference * (Decimal::ONE + slippage_pct),
        OrderSide::Sell => reference * (Decimal::ONE - slippage_pct),
    };
    round_price_by_tick(raw, tick, side)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn round_price_by_tick_rounds_buy_down() {
        let quantized = round_price_by_tick(dec!(100.123), dec!(0.01), OrderSide::Buy);
        assert_eq!(quantized, dec!(100.12));
    }

    #[test]
    fn round_price_by_tick_rounds_sell_up() {
        let quantized = round_price_by_tick(dec!(100.123), dec!(0.01), OrderSide::Sell);
        assert_eq!(quantized, dec!(100.13));
    }

    #[test]
    fn round_price_by_tick_enforces_minimum_tick() {
        let quantized = round_price_by_tick(dec!(0.0001), dec!(0.005), OrderSide::Buy);
        assert_eq!(quantized, dec!(0.005));
    }

    #[test]
    fn quantize_size_by_step_floors() {
        assert_eq!(quantize_size_by_step(dec!(0.0023), dec!(0.001)), dec!(0.002));
        assert_eq!(quantize_size_by_step(dec!(0.0004), dec!(0.001)), Decimal::ZERO);
    }

    #[test]
    fn quantize_size_by_step_ceiling_rounds_up() {
        assert_eq!(
            quantize_size_by_step_ceiling(dec!(0.0023), dec!(0.001)),
            dec!(0.003)
        );
        assert_eq!(quantize_size_by_step_ceiling(dec!(2), dec!(0.5)), dec!(2.0));
    }

    #[test]
    fn acceptable_price_is_capped_by_slippage() {
        let buy = acceptable_price(dec!(100), dec!(0.05), dec!(0.1), OrderSide::Buy);
        let sell = acceptable_price(dec!(100), dec!(0.05), dec!(0.1), OrderSide::Sell);
        assert_eq!(buy, dec!(105.0));
        assert_eq!(sell, dec!(95.0));
    }
}
