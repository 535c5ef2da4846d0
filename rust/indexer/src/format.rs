use ethers::types::U256;

/// Human vote weight: whole tokens (18 decimals, truncated) with a `K`/`M`
/// suffix and two decimals.
pub fn format_votes(votes: U256) -> String {
    let whole = votes / U256::exp10(18);
    let n: f64 = whole.to_string().parse().unwrap_or(f64::MAX);
    if n >= 1_000_000.0 {
        format!("{:.2}M", n / 1_000_000.0)
    } else if n >= 1_000.0 {
        format!("{:.2}K", n / 1_000.0)
    } else {
        format!("{:.2}", n)
    }
}
