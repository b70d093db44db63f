use crate::models::IndividualVerdict;

const KNIFE_CATCH_PENALTY: f64 = 15.0;
const DISPUTED_CLAIM_PENALTY: f64 = 5.0;

fn verdict_weight(verdict: &str) -> f64 {
    match verdict {
        "STRONG_BUY" => 50.0,
        "BUY" => 40.0,
        "ACCUMULATE" => 30.0,
        "HOLD" => 20.0,
        "WATCH" => 15.0,
        "AVOID" => 5.0,
        _ => 0.0,
    }
}

fn conviction_weight(conviction: Option<&str>) -> f64 {
    match conviction {
        Some("HIGH") => 25.0,
        Some("MEDIUM") => 15.0,
        Some("LOW") => 5.0,
        _ => 0.0,
    }
}

fn risk_reward_bonus(ratio: Option<f64>) -> f64 {
    match ratio {
        Some(r) if r.is_finite() && r >= 3.0 => 20.0,
        Some(r) if r.is_finite() && r >= 2.0 => 12.0,
        Some(r) if r.is_finite() && r >= 1.5 => 6.0,
        _ => 0.0,
    }
}

/// Single 0-100 number used to rank individually analyzed candidates.
///
/// Expects a verdict that has been through `normalized()`; unknown categories
/// contribute nothing.
pub fn composite_score(verdict: &IndividualVerdict) -> f64 {
    let mut score = verdict_weight(&verdict.verdict)
        + conviction_weight(verdict.conviction.as_deref())
        + risk_reward_bonus(verdict.risk_reward);

    if verdict.knife_catch_warning {
        score -= KNIFE_CATCH_PENALTY;
    }
    score -= DISPUTED_CLAIM_PENALTY * verdict.disputed_claims.len() as f64;

    score.clamp(0.0, 100.0)
}
