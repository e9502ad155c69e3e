/// Resolves a requested thread count against the host
///
/// `0` selects every available CPU; larger requests are capped at that count.
pub fn resolve_threads(requested: usize) -> usize {
    let available = num_cpus::get();
    if requested == 0 {
        available
    } else {
        requested.min(available)
    }
}
