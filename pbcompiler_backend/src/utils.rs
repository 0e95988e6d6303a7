//! Time bookkeeping shared by the timing model and the program builder.
//!
//! All user-facing times are seconds (`f64`), stored rounded to [`TIME_DECIMALS`]
//! decimal places. Everything that reaches the board is an integer number of
//! nanoseconds. There is exactly one conversion policy between the two:
//!
//! 1. snap the value to the picosecond grid (this absorbs the binary representation
//!    noise of values like `1.5e-9`),
//! 2. round half-up to whole nanoseconds.
//!
//! The clock-cycle count handed back to acquisition code uses the same half-up rule
//! on the integer nanosecond values, see [`clock_cycle_count`].

use std::sync::OnceLock;

use regex::Regex;

/// Number of decimal places (in seconds) kept for every stored time parameter.
pub const TIME_DECIMALS: i32 = 8;

/// Rounds a time in seconds to [`TIME_DECIMALS`] decimal places.
///
/// ```
/// use pbcompiler_backend::utils::round_seconds;
/// assert_eq!(round_seconds(5.0000000049e-6), 5e-6);
/// assert_eq!(round_seconds(1.234567891e-3), 1.23457e-3);
/// ```
pub fn round_seconds(t: f64) -> f64 {
    let scale = 10f64.powi(TIME_DECIMALS);
    (t * scale).round() / scale
}

/// Longest time, in seconds, accepted for a single parameter (the picosecond count
/// fits in an `i64`, about 106 days). Sums of such times still convert exactly.
pub const MAX_TIME_SECONDS: f64 = i64::MAX as f64 / 1e12;

/// Converts seconds to integer nanoseconds (picosecond snap, then half-up).
///
/// Negative inputs are converted with the same rule so that the timing model can
/// report an infeasible (negative) pulse start instead of silently clipping it.
/// Only inputs far beyond [`MAX_TIME_SECONDS`] (about 290 years) saturate.
///
/// ```
/// use pbcompiler_backend::utils::seconds_to_ns;
/// assert_eq!(seconds_to_ns(5e-6), 5000);
/// assert_eq!(seconds_to_ns(1.5e-9), 2);
/// assert_eq!(seconds_to_ns(2.499e-9), 2);
/// assert_eq!(seconds_to_ns(-2e-7), -200);
/// ```
pub fn seconds_to_ns(t: f64) -> i64 {
    let ps = (t * 1e12).round() as i128;
    let ns = ps.div_euclid(1000) + i128::from(ps.rem_euclid(1000) >= 500);
    ns.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Integer division rounded half-up. `den` must be positive.
pub fn div_round_half_up(num: u64, den: u64) -> u64 {
    (num + den / 2) / den
}

/// Number of clock periods in one cycle, rounded half-up.
///
/// This is the sample count an acquisition card clocked from the clock channel has to
/// expect per cycle. It rounds, while the clock expansion itself only emits whole
/// periods (see [`crate::instruction::clock_intervals`]).
///
/// ```
/// use pbcompiler_backend::utils::clock_cycle_count;
/// assert_eq!(clock_cycle_count(30_000, 200), 150);
/// assert_eq!(clock_cycle_count(300, 200), 2);
/// assert_eq!(clock_cycle_count(299, 200), 1);
/// ```
pub fn clock_cycle_count(cycle_width_ns: u64, clock_period_ns: u64) -> u64 {
    div_round_half_up(cycle_width_ns, clock_period_ns)
}

fn duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)\s*(s|ms|us|µs|ns)?\s*$")
            .unwrap()
    })
}

/// Parses a duration such as `"5e-6"`, `"200ns"`, `"1.5 us"` or `"10ms"` into seconds.
///
/// A bare number is taken to be seconds. Returns `None` for anything else.
///
/// ```
/// use pbcompiler_backend::utils::parse_seconds;
/// assert_eq!(parse_seconds("200ns"), Some(200e-9));
/// assert_eq!(parse_seconds("5e-6"), Some(5e-6));
/// assert_eq!(parse_seconds("1.5 us"), Some(1.5e-6));
/// assert_eq!(parse_seconds("fast"), None);
/// ```
pub fn parse_seconds(text: &str) -> Option<f64> {
    let caps = duration_regex().captures(text)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let per_second = match caps.get(2).map(|m| m.as_str()) {
        None | Some("s") => 1.0,
        Some("ms") => 1e3,
        Some("us") | Some("µs") => 1e6,
        Some("ns") => 1e9,
        Some(_) => return None,
    };
    Some(value / per_second)
}
