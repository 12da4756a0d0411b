use rand::Rng;
use std::collections::BTreeSet;

/// The catalog refuses to serve discovery pages past this point.
pub const MAX_SAMPLED_PAGE: u32 = 50;

/// Draws `min(count, clamped_total)` distinct page numbers uniformly from
/// `[1, clamped_total]`, where the total is clamped to [`MAX_SAMPLED_PAGE`].
pub fn sample_pages<R: Rng + ?Sized>(total_pages: i64, count: usize, rng: &mut R) -> BTreeSet<u32> {
    if total_pages <= 0 || count == 0 {
        return BTreeSet::new();
    }
    let clamped = total_pages.min(i64::from(MAX_SAMPLED_PAGE)) as usize;
    let amount = count.min(clamped);
    rand::seq::index::sample(rng, clamped, amount)
        .into_iter()
        .map(|index| index as u32 + 1)
        .collect()
}

pub fn sample(total_pages: i64, count: usize) -> BTreeSet<u32> {
    sample_pages(total_pages, count, &mut rand::thread_rng())
}
