use std::env;
use std::sync::OnceLock;

static TRACED_PASS_MAX_ITERS: OnceLock<Option<usize>> = OnceLock::new();
static TRACED_PASS_STATS: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// Fixpoint iteration cap override (`TRACED_PASS_MAX_ITERS`). Zero and garbage are ignored.
pub(crate) fn pass_max_iters() -> Option<usize> {
    *TRACED_PASS_MAX_ITERS.get_or_init(|| match env::var("TRACED_PASS_MAX_ITERS") {
        Ok(value) => value.trim().parse::<usize>().ok().filter(|iters| *iters > 0),
        Err(_) => None,
    })
}

/// Whether to log a per-pass stats summary (`TRACED_PASS_STATS`).
pub(crate) fn pass_stats_enabled() -> bool {
    *TRACED_PASS_STATS.get_or_init(|| match env::var("TRACED_PASS_STATS") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}
