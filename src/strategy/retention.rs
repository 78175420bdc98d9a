use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Share of the gain above the take-profit to keep while the peak is younger than `under_minutes`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetentionBand {
    pub under_minutes: i64,
    pub fraction: Decimal,
}

impl RetentionBand {
    pub const fn new(under_minutes: i64, fraction: Decimal) -> Self {
        Self {
            under_minutes,
            fraction,
        }
    }
}

/// Decides whether a greedy take-profit still holds enough of its gain
///
/// The longer ago the peak was set, the larger the share of the gain above
/// the take-profit price that must still be retained to keep holding.
#[derive(Debug, Clone, PartialEq)]
pub struct GainRetentionPolicy {
    bands: Vec<RetentionBand>,
    otherwise: Decimal,
}

impl GainRetentionPolicy {
    /// Bands are checked in order; the first whose limit exceeds the peak age wins
    pub fn new(mut bands: Vec<RetentionBand>, otherwise: Decimal) -> Self {
        bands.sort_by_key(|b| b.under_minutes);
        Self { bands, otherwise }
    }

    /// Candles lag the market, so they start out keeping a larger share
    pub fn candle_defaults() -> Self {
        Self::new(
            vec![
                RetentionBand::new(3, dec!(0.20)),
                RetentionBand::new(5, dec!(0.40)),
                RetentionBand::new(8, dec!(0.60)),
                RetentionBand::new(10, dec!(0.70)),
            ],
            dec!(0.75),
        )
    }

    pub fn market_price_defaults() -> Self {
        Self::new(
            vec![
                RetentionBand::new(3, dec!(0.07)),
                RetentionBand::new(5, dec!(0.15)),
                RetentionBand::new(8, dec!(0.50)),
                RetentionBand::new(10, dec!(0.70)),
            ],
            dec!(0.75),
        )
    }

    pub fn defaults_for(use_market_price: bool) -> Self {
        if use_market_price {
            Self::market_price_defaults()
        } else {
            Self::candle_defaults()
        }
    }

    /// Fraction of the gain to retain for a peak of the given age
    pub fn fraction(&self, since_peak: Duration) -> Decimal {
        // compare on seconds so 2m59s is still "< 3m"
        let seconds = since_peak.num_seconds().max(0);
        self.bands
            .iter()
            .find(|band| seconds < band.under_minutes * 60)
            .map(|band| band.fraction)
            .unwrap_or(self.otherwise)
    }

    /// Lowest price that still keeps the required share of `peak - take_profit`
    pub fn minimum_acceptable_price(
        &self,
        take_profit: Decimal,
        peak: Decimal,
        since_peak: Duration,
    ) -> Decimal {
        take_profit + (peak - take_profit) * self.fraction(since_peak)
    }

    pub fn retains_enough_gain(
        &self,
        price: Decimal,
        take_profit: Decimal,
        peak: Decimal,
        since_peak: Duration,
    ) -> bool {
        price >= self.minimum_acceptable_price(take_profit, peak, since_peak)
    }
}

impl Default for GainRetentionPolicy {
    fn default() -> Self {
        Self::candle_defaults()
    }
}
