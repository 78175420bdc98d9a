//! Console rendering helpers.
//!
//! Everything here returns strings; callers decide whether they go to the
//! terminal through `println!` or into the log through `tracing`.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::models::{Greed, Order};
use crate::strategy::{Operation, Strategy};

const CHART_WIDTH: usize = 10;

const ERROR_DETAILS: &[(&str, &str)] = &[
    ("EGeneral:Invalid arguments", "The request payload is malformed, incorrect or ambiguous."),
    ("EGeneral:Invalid arguments:Index unavailable", "Index pricing is unavailable for stop/profit orders on this pair."),
    ("EService:Unavailable", "The matching engine or API is offline."),
    ("EService:Market in cancel_only mode", "Request can't be made at this time. (See SystemStatus endpoint.)"),
    ("EService:Market in post_only mode", "Request can't be made at this time. (See SystemStatus endpoint.)"),
    ("EService:Deadline elapsed", "The request timed out according to the default or specified deadline."),
    ("EAPI:Invalid key", "An invalid API-Key header was supplied."),
    ("EAPI:Invalid signature", "An invalid API-Sign header was supplied."),
    ("EAPI:Invalid nonce", "Nonce must be an always increasing, unsigned 64-bit integer for each request made with a particular API key."),
    ("EGeneral:Permission denied", "API key doesn't have permission to make this request."),
    ("EOrder:Cannot open position", "User/tier is ineligible for margin trading."),
    ("EOrder:Margin allowance exceeded", "User has exceeded their margin allowance."),
    ("EOrder:Margin level too low", "Client has insufficient equity or collateral."),
    ("EOrder:Margin position size exceeded", "Client would exceed the maximum position size for this pair."),
    ("EOrder:Insufficient margin", "Exchange does not have available funds for this margin trade."),
    ("EOrder:Insufficient funds", "Client does not have the necessary funds."),
    ("EOrder:Order minimum not met", "Order size does not meet ordermin. (See AssetPairs endpoint.)"),
    ("EOrder:Orders limit exceeded", "The number of open orders in a given pair is exceeded."),
    ("EOrder:Rate limit exceeded", "The user's max ratecount is exceeded for a given pair."),
];

/// Position of `price` between `low` (0%) and `high` (100%), truncated
///
/// Unbounded on both sides; a degenerate range reports 0.
pub fn percentage_done(price: Decimal, low: Decimal, high: Decimal) -> i64 {
    let range = high - low;
    (price - low)
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|done| done.checked_div(range))
        .and_then(|pct| pct.trunc().to_i64())
        .unwrap_or(0)
}

/// `|---O------| 42%`; the marker is clamped to the chart
pub fn progress_chart(percentage: i64) -> String {
    let index = (percentage / 10).clamp(0, CHART_WIDTH as i64 - 1) as usize;
    let canvas: String = (0..CHART_WIDTH)
        .map(|i| if i == index { 'O' } else { '-' })
        .collect();
    format!("|{}| {}%", canvas, percentage)
}

pub fn currency_symbol(pair: &str) -> &'static str {
    if pair.ends_with("EUR") {
        "€"
    } else if pair.ends_with("GBP") {
        "£"
    } else {
        "$"
    }
}

/// Venue error code with its explanation when one is known
pub fn describe_error(code: &str) -> String {
    match ERROR_DETAILS.iter().find(|(known, _)| *known == code) {
        Some((_, details)) => format!("{}. Details: {}", code, details),
        None => code.to_string(),
    }
}

/// One progress line per strategy step
pub fn progress_line(pair: &str, percentage: i64, price: Decimal) -> String {
    format!(
        "{} Progress {} Close: {}{}",
        pair,
        progress_chart(percentage),
        currency_symbol(pair),
        price
    )
}

pub fn waiting_line(pair: &str, start_price: Decimal, current: Decimal) -> String {
    let symbol = currency_symbol(pair);
    format!(
        "{} Start: {}{} Current: {}{}",
        pair, symbol, start_price, symbol, current
    )
}

/// Summary of the orders being managed, printed once before trading starts
pub fn header(pair: &str, operation: &Operation, use_market_price: bool, simulated: bool) -> String {
    let symbol = currency_symbol(pair);
    let trigger_by = if use_market_price { "market" } else { "last" };
    let edit = |order: &Order| match order.trigger {
        Some(t) => format!(
            " Change to {}{} when {} price is {}{}",
            symbol, t.replacement, trigger_by, symbol, t.threshold
        ),
        None => String::new(),
    };

    let mut lines = vec![format!("Pair:\t\t{}", pair)];
    let stop_loss = operation.strategy().stop_loss();
    lines.push(format!("Stop loss:\t{}{}{}", symbol, stop_loss.price, edit(stop_loss)));

    match operation.strategy() {
        Strategy::OneCancelsTheOther(oco) => {
            let take_profit = oco.take_profit();
            let greed = if take_profit.greed == Greed::None { "" } else { " (greedy)" };
            lines.push(format!(
                "Take profit:\t{}{}{}{}",
                symbol,
                take_profit.price,
                edit(take_profit),
                greed
            ));
            lines.push(format!("Volume:\t\t{}", take_profit.volume));
        }
        Strategy::TrailingStopLoss(trailing) => {
            let levels: Vec<String> = trailing
                .levels()
                .iter()
                .map(|level| format!("{}{}", symbol, level))
                .collect();
            lines.push(format!("Trailing:\t{}", levels.join(", ")));
            lines.push(format!("Volume:\t\t{}", stop_loss.volume));
        }
    }

    if simulated {
        lines.push(String::new());
        lines.push(" *** This is a simulation *** ".to_string());
    }
    lines.join("\n")
}

pub fn credits() -> &'static str {
    "╔═════════════════════════════════════════╗\n\
     ║          orderbot order manager         ║\n\
     ╚═════════════════════════════════════════╝"
}
