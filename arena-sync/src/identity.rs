//! Display identity allocation.
//!
//! Two reserved identities go to the first participants for whom they are
//! free. Everyone else gets a numbered `Player N` identity whose color walks
//! the hue circle by the golden angle, so neighbouring numbers stay visually
//! distinct.
//!
//! Allocation is a pure function of the identities currently held, which
//! keeps the relay's registry the only source of truth.

use crate::protocol::DisplayIdentity;

/// Reserved identities, handed out in order.
pub const RESERVED_IDENTITIES: [(&str, u32); 2] = [("Red", 0xE5_39_35), ("Blue", 0x1E_88_E5)];

/// Golden angle in degrees.
const GOLDEN_ANGLE: f32 = 137.507_77;

/// Pick the identity for a participant joining next to `held`.
///
/// `held` is every identity owned by a currently registered participant.
pub fn allocate_identity<'a, I>(held: I) -> DisplayIdentity
where
    I: IntoIterator<Item = &'a DisplayIdentity>,
{
    let held: Vec<&DisplayIdentity> = held.into_iter().collect();
    let in_use = |name: &str| held.iter().any(|identity| identity.name == name);

    if let Some((name, color)) = RESERVED_IDENTITIES
        .iter()
        .find(|(name, _)| !in_use(name))
    {
        return DisplayIdentity::new(*name, *color);
    }

    // Numbered from the registry size; bumped past names still in use.
    let mut number = held.len() + 1;
    while in_use(&fallback_name(number)) {
        number += 1;
    }
    DisplayIdentity::new(fallback_name(number), fallback_color(number))
}

fn fallback_name(number: usize) -> String {
    format!("Player {number}")
}

/// Stable vivid color for the `number`-th fallback identity.
pub fn fallback_color(number: usize) -> u32 {
    let hue = (number as f32 * GOLDEN_ANGLE).rem_euclid(360.0) / 360.0;
    let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.55);
    pack_rgb(r, g, b)
}

fn pack_rgb(r: f32, g: f32, b: f32) -> u32 {
    let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u32;
    (channel(r) << 16) | (channel(g) << 8) | channel(b)
}

/// HSL to RGB conversion helper.
fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l); // Achromatic
    }

    let q = if l < 0.5 {
        l * (1.0 + s)
    } else {
        l + s - l * s
    };
    let p = 2.0 * l - q;

    let r = hue_to_rgb(p, q, h + 1.0 / 3.0);
    let g = hue_to_rgb(p, q, h);
    let b = hue_to_rgb(p, q, h - 1.0 / 3.0);

    (r, g, b)
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 { t += 1.0; }
    if t > 1.0 { t -= 1.0; }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}
