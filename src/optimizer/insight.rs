//! Insight scoring for the insight-weighted method

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::AssetStats;
use crate::correlation::CorrelationMatrix;
use crate::data::InsightData;
use crate::math;

const SENTIMENT_WEIGHT: Decimal = dec!(0.3);
const CONFIDENCE_WEIGHT: Decimal = dec!(0.2);
const RETURN_WEIGHT: Decimal = dec!(0.3);
const DIVERSIFICATION_WEIGHT: Decimal = dec!(0.2);

/// Score components for one symbol
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InsightScore {
    /// price_target / price - 1
    pub implied_return: Decimal,
    /// implied_return / volatility
    pub risk_adjusted_return: Decimal,
    pub average_correlation: Decimal,
    pub raw: Decimal,
    /// `raw` floored at zero
    pub clamped: Decimal,
}

/// score = 0.3·sentiment + 0.2·confidence + 0.3·tanh(rar) + 0.2·(1 − avgCorrelation)
pub fn insight_score(
    asset: &AssetStats,
    insight: &InsightData,
    correlation: &CorrelationMatrix,
) -> InsightScore {
    let implied_return = insight.implied_return(asset.price);
    let risk_adjusted_return = if asset.volatility > Decimal::ZERO {
        implied_return / asset.volatility
    } else {
        Decimal::ZERO
    };
    let average_correlation = correlation.average_correlation(&asset.symbol);

    let raw = SENTIMENT_WEIGHT * insight.sentiment
        + CONFIDENCE_WEIGHT * insight.confidence
        + RETURN_WEIGHT * math::tanh(risk_adjusted_return)
        + DIVERSIFICATION_WEIGHT * (Decimal::ONE - average_correlation);

    InsightScore {
        implied_return,
        risk_adjusted_return,
        average_correlation,
        raw,
        clamped: raw.max(Decimal::ZERO),
    }
}
