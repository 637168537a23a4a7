//! Dimension algebra: fingerprinting dimension sets, enumerating the sets
//! a bot can satisfy, and matching a request's requirements against a
//! bot's offering.

use itertools::Itertools;
use models::{DimensionValue, Dimensions};

/// 32-bit fingerprint of a dimension mapping: the first four bytes of the
/// MD5 digest of its canonical JSON rendering, read little-endian. Stored
/// on every ready-queue entry, so the encoding must stay stable across
/// releases.
pub fn hash(dimensions: &Dimensions) -> u32 {
    hash_encoded(dimensions.canonical_json().as_bytes())
}

fn hash_encoded(encoded: &[u8]) -> u32 {
    let digest = md5::compute(encoded);
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Enumerates every single-valued dimension set a bot can satisfy: each
/// subset of its labels, crossed with each choice of value for labels
/// offering several. The most restrictive sets come first and the empty
/// set is last.
pub fn powerset(bot: &Dimensions) -> Vec<Dimensions> {
    let labels: Vec<&str> = bot.keys().collect();

    let mut out = Vec::new();
    for size in (0..=labels.len()).rev() {
        for subset in labels.iter().copied().combinations(size) {
            explode(bot, &subset, &mut out);
        }
    }
    out
}

// Expands one label subset into single-valued mappings, one per choice of
// value for each multivalued label.
fn explode(bot: &Dimensions, labels: &[&str], out: &mut Vec<Dimensions>) {
    if labels.is_empty() {
        out.push(Dimensions::new());
        return;
    }
    let choices: Vec<Vec<(&str, &String)>> = labels
        .iter()
        .map(|label| {
            bot.get(label)
                .expect("label was drawn from this mapping")
                .values()
                .iter()
                .map(|value| (*label, value))
                .collect()
        })
        .collect();

    for choice in choices.into_iter().multi_cartesian_product() {
        out.push(
            choice
                .into_iter()
                .map(|(label, value)| (label, DimensionValue::Single(value.clone())))
                .collect(),
        );
    }
}

/// True iff every label the request asks for is offered by the bot with at
/// least one acceptable value.
pub fn matches(request: &Dimensions, bot: &Dimensions) -> bool {
    request.iter().all(|(label, required)| match bot.get(label) {
        Some(offered) => required
            .values()
            .iter()
            .any(|value| offered.values().contains(value)),
        None => false,
    })
}
