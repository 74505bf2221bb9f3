//! Plain-text renderings of signals and lifecycle events.

use std::fmt::Write;

use crate::models::{Direction, Outcome};
use crate::quality::QualityReport;
use crate::risk::RiskPermit;
use crate::signal::SignalCandidate;
use crate::store::{Recipient, SignalRecord};

/// Formats a price with precision scaled to its magnitude.
pub fn price(value: f64) -> String {
    let abs = value.abs();
    if abs >= 1000.0 {
        format!("{value:.2}")
    } else if abs >= 1.0 {
        format!("{value:.4}")
    } else {
        format!("{value:.8}")
    }
}

fn pct_from(entry: f64, level: f64) -> f64 {
    if entry == 0.0 {
        0.0
    } else {
        (level - entry) / entry * 100.0
    }
}

/// Signal message, with the recipient's sizing when a permit is given.
pub fn signal(candidate: &SignalCandidate, report: &QualityReport, permit: Option<&RiskPermit>) -> String {
    let c = candidate;
    let mut out = String::new();
    let arrow = match c.direction {
        Direction::Buy => "LONG",
        Direction::Sell => "SHORT",
    };

    let _ = writeln!(out, "{} {} ({arrow})", c.direction, c.symbol);
    let _ = writeln!(
        out,
        "Quality: {} ({:.0}%, {}/{})",
        report.strength, report.percentage, report.total_score, report.max_score
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "Entry: {}", price(c.entry));
    let _ = writeln!(
        out,
        "Stop loss: {} ({:+.2}%)",
        price(c.stop_loss),
        pct_from(c.entry, c.stop_loss)
    );
    for (i, tp) in c.targets().iter().enumerate() {
        let _ = writeln!(
            out,
            "TP{}: {} ({:+.2}%)",
            i + 1,
            price(*tp),
            pct_from(c.entry, *tp)
        );
    }
    let _ = writeln!(out, "R/R: 1:{:.2}", c.reward_risk());
    let _ = writeln!(out, "Confidence: {:.0}%", c.confidence * 100.0);
    let _ = writeln!(out, "RSI: {:.1}  ATR: {}", c.rsi, price(c.atr));

    if !c.reasons.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Reasons:");
        for reason in &c.reasons {
            let _ = writeln!(out, "- {reason}");
        }
    }

    if let Some(permit) = permit {
        let state = permit.state();
        let _ = writeln!(out);
        let _ = writeln!(out, "Your position:");
        let _ = writeln!(out, "- Size: {} (deposit {})", permit.position_size, state.deposit);
        let _ = writeln!(
            out,
            "- Risk: {}% of deposit ({}% stop distance)",
            permit.realized_risk.round_dp(2),
            permit.signal_risk.round_dp(2)
        );
        let _ = writeln!(
            out,
            "- Daily risk: {}% used of {}%",
            (state.daily_risk_used + permit.realized_risk).round_dp(2),
            state.daily_risk_limit
        );
    }

    let _ = write!(out, "\n{}", report.recommendation);
    out
}

/// Closure notice for a resolved signal.
pub fn closure(record: &SignalRecord, outcome: Outcome) -> String {
    let mut out = String::new();
    let verdict = match outcome {
        Outcome::Tp3 => "Target 3 reached",
        Outcome::Tp2 => "Target 2 reached",
        Outcome::Tp1 => "Target 1 reached",
        Outcome::StopLoss => "Stop loss hit",
        Outcome::Expired => "Signal expired",
    };
    let _ = writeln!(out, "{verdict}: {} {}", record.direction, record.symbol);
    let _ = writeln!(out, "Entry: {}", price(record.entry));
    if let Some(exit) = record.exit_price {
        let _ = writeln!(out, "Exit: {}", price(exit));
    }
    if let Some(profit) = record.profit_pct {
        let _ = writeln!(out, "Result: {profit:+.2}%");
    }
    if let Some(closed_at) = record.closed_at {
        let held = closed_at - record.opened_at;
        let _ = write!(
            out,
            "Held: {}h {}m",
            held.num_hours(),
            held.num_minutes() % 60
        );
    }
    out.trim_end().to_string()
}

/// Notice sent when a premium subscription lapses.
pub fn subscription_expired(recipient: &Recipient) -> String {
    let name = recipient.username.as_deref().unwrap_or("there");
    format!(
        "Hi {name}, your premium subscription has expired.\n\
         Signals are paused until you renew."
    )
}
