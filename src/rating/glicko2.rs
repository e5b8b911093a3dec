//! Glicko-2 rating period mathematics
//!
//! Pure functions over [`Glicko2Rating`] values from the skillratings crate.
//! Ratings are converted to the internal Glicko-2 scale (mu, phi), updated for
//! one rating period and converted back. The volatility is found with the
//! Illinois variant of regula falsi, bounded by an iteration limit so a
//! pathological input reports an error instead of spinning.

use crate::config::RatingSettings;
use crate::error::{MatchmakingError, Result};
use skillratings::glicko2::Glicko2Rating;
use std::f64::consts::PI;

/// Conversion factor between the display scale and the Glicko-2 scale
pub const GLICKO2_SCALE: f64 = 173.7178;

/// Display rating that maps to mu = 0
pub const BASE_RATING: f64 = 1500.0;

/// Solver parameters of one rating period
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Glicko2Params {
    /// System constant constraining volatility change
    pub tau: f64,
    pub convergence_tolerance: f64,
    pub max_iterations: usize,
}

impl Default for Glicko2Params {
    fn default() -> Self {
        Self {
            tau: 0.5,
            convergence_tolerance: 0.000_001,
            max_iterations: 100,
        }
    }
}

impl From<&RatingSettings> for Glicko2Params {
    fn from(settings: &RatingSettings) -> Self {
        Self {
            tau: settings.tau(),
            convergence_tolerance: settings.convergence_tolerance(),
            max_iterations: settings.max_volatility_iterations,
        }
    }
}

/// One game of a rating period, seen from the rated player
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GameResult {
    pub opponent_rating: f64,
    pub opponent_deviation: f64,
    /// 1.0 for a win, 0.0 for a loss
    pub score: f64,
}

impl GameResult {
    pub fn against(opponent: &Glicko2Rating, score: f64) -> Self {
        Self {
            opponent_rating: opponent.rating,
            opponent_deviation: opponent.deviation,
            score,
        }
    }
}

fn to_mu(rating: f64) -> f64 {
    (rating - BASE_RATING) / GLICKO2_SCALE
}

fn to_phi(deviation: f64) -> f64 {
    deviation / GLICKO2_SCALE
}

/// Weighting that shrinks the impact of uncertain opponents
pub fn g(phi: f64) -> f64 {
    1.0 / (1.0 + 3.0 * phi * phi / (PI * PI)).sqrt()
}

/// Expected score against an opponent, on the Glicko-2 scale
pub fn expected_score(mu: f64, opponent_mu: f64, opponent_phi: f64) -> f64 {
    1.0 / (1.0 + (-g(opponent_phi) * (mu - opponent_mu)).exp())
}

/// Win probability of `player` against `opponent` on the display scale
pub fn win_probability(player: &Glicko2Rating, opponent: &Glicko2Rating) -> f64 {
    expected_score(
        to_mu(player.rating),
        to_mu(opponent.rating),
        to_phi(opponent.deviation),
    )
}

/// Update a rating for one rating period
///
/// An empty `results` slice is a period without games: only the deviation
/// grows. Deviation clamping is left to the caller.
pub fn rate_period(
    player: &Glicko2Rating,
    results: &[GameResult],
    params: &Glicko2Params,
) -> Result<Glicko2Rating> {
    let mu = to_mu(player.rating);
    let phi = to_phi(player.deviation);
    let sigma = player.volatility;

    if results.is_empty() {
        return Ok(Glicko2Rating {
            rating: player.rating,
            deviation: (phi * phi + sigma * sigma).sqrt() * GLICKO2_SCALE,
            volatility: sigma,
        });
    }

    let mut inverse_variance = 0.0;
    let mut improvement_sum = 0.0;
    for result in results {
        let opponent_mu = to_mu(result.opponent_rating);
        let opponent_phi = to_phi(result.opponent_deviation);
        let g_phi = g(opponent_phi);
        let expected = expected_score(mu, opponent_mu, opponent_phi);

        inverse_variance += g_phi * g_phi * expected * (1.0 - expected);
        improvement_sum += g_phi * (result.score - expected);
    }

    if inverse_variance <= 0.0 || !inverse_variance.is_finite() {
        return Err(MatchmakingError::RatingCalculationFailed {
            reason: format!("Degenerate estimated variance ({})", inverse_variance),
        });
    }

    let variance = 1.0 / inverse_variance;
    let delta = variance * improvement_sum;

    let new_sigma = solve_volatility(phi, sigma, variance, delta, params)?;
    let phi_star = (phi * phi + new_sigma * new_sigma).sqrt();
    let new_phi = 1.0 / (1.0 / (phi_star * phi_star) + 1.0 / variance).sqrt();
    let new_mu = mu + new_phi * new_phi * improvement_sum;

    Ok(Glicko2Rating {
        rating: new_mu * GLICKO2_SCALE + BASE_RATING,
        deviation: new_phi * GLICKO2_SCALE,
        volatility: new_sigma,
    })
}

/// New volatility via the Illinois root-finder
fn solve_volatility(
    phi: f64,
    sigma: f64,
    variance: f64,
    delta: f64,
    params: &Glicko2Params,
) -> Result<f64> {
    let tau = params.tau;
    let a = (sigma * sigma).ln();
    let delta_sq = delta * delta;
    let phi_sq = phi * phi;

    let f = |x: f64| {
        let ex = x.exp();
        let denom = phi_sq + variance + ex;
        ex * (delta_sq - phi_sq - variance - ex) / (2.0 * denom * denom) - (x - a) / (tau * tau)
    };

    let mut lower = a;
    let mut upper = if delta_sq > phi_sq + variance {
        (delta_sq - phi_sq - variance).ln()
    } else {
        let mut k = 1.0;
        let mut steps = 0;
        while f(a - k * tau) < 0.0 {
            steps += 1;
            if steps > params.max_iterations {
                return Err(MatchmakingError::RatingCalculationFailed {
                    reason: "Volatility bracket search did not terminate".to_string(),
                });
            }
            k += 1.0;
        }
        a - k * tau
    };

    let mut f_lower = f(lower);
    let mut f_upper = f(upper);
    let mut iterations = 0;

    while (upper - lower).abs() > params.convergence_tolerance {
        iterations += 1;
        if iterations > params.max_iterations {
            return Err(MatchmakingError::RatingCalculationFailed {
                reason: format!(
                    "Volatility did not converge within {} iterations",
                    params.max_iterations
                ),
            });
        }

        let candidate = lower + (lower - upper) * f_lower / (f_upper - f_lower);
        let f_candidate = f(candidate);

        if f_candidate * f_upper <= 0.0 {
            lower = upper;
            f_lower = f_upper;
        } else {
            f_lower /= 2.0;
        }
        upper = candidate;
        f_upper = f_candidate;
    }

    Ok((lower / 2.0).exp())
}

/// Grow a deviation over `periods` rating periods without games
pub fn inflate_deviation(deviation: f64, volatility: f64, periods: f64) -> f64 {
    let phi = to_phi(deviation);
    (phi * phi + periods.max(0.0) * volatility * volatility).sqrt() * GLICKO2_SCALE
}
