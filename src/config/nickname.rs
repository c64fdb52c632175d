//! Fallback nickname for configs that do not name one.
//!
//! Nicknames look like `quietowl42`: a short lowercase word pair plus two
//! digits, never longer than [`MAX_GENERATED_LEN`].

use rand::RngExt;

/// Many servers still cap nicknames at nine characters.
pub const MAX_GENERATED_LEN: usize = 9;

const FIRST: &[&str] = &[
    "blue", "calm", "dry", "fast", "grey", "keen", "mild", "odd", "pale", "red", "shy", "sly",
    "tan", "wet", "wry",
];

const SECOND: &[&str] = &[
    "ant", "bee", "cat", "cod", "elk", "emu", "fox", "gnu", "jay", "owl", "ram", "yak",
];

pub fn generate_nickname() -> String {
    let mut rng = rand::rng();
    let first = FIRST[rng.random_range(0..FIRST.len())];
    let second = SECOND[rng.random_range(0..SECOND.len())];
    let num: u8 = rng.random_range(10..100);
    let mut nick = format!("{first}{second}{num}");
    nick.truncate(MAX_GENERATED_LEN);
    nick
}
