//! Identity assignment: random usernames and colors.
//!
//! Names and colors come from fixed dictionaries. Username uniqueness against
//! the live set is the caller's job (retry until unused under the registry
//! lock); this module only samples.

/// Two-word display names handed to connections without a username hint.
pub(crate) const RANDOM_NAMES: &[&str] = &[
    "Amazing Koala",
    "Curious Rapier",
    "Brave Falcon",
    "Shiny Lantern",
    "Lonely Wizard",
    "Lazy Panda",
    "Crazy Octopus",
    "Swift Lion",
    "Friendly Giraffe",
    "Mighty Hammer",
    "Sneaky Snake",
    "Golden Eagle",
    "Quiet Ghost",
    "Rapid River",
    "Fuzzy Bunny",
    "Tiny Dragon",
    "Ancient Tome",
    "Wild Stallion",
    "Silver Fox",
    "Bold Ranger",
    "Epic Quest",
    "Magic Arrow",
    "Rusty Shield",
    "Sacred Sword",
    "Silly Monkey",
    "Nimble Kitten",
    "Charming Sprite",
    "Clever Raven",
    "Bright Star",
    "Frozen Lake",
    "Glowing Ember",
    "Swift Arrow",
    "Mystic Orb",
    "Dark Phantom",
    "Sunny Meadow",
    "Crisp Morning",
    "Silent Storm",
    "Rolling Thunder",
    "Thundering Hooves",
    "Icy Breeze",
    "Silver Trout",
    "Radiant Pearl",
    "Fearless Knight",
    "Scarlet Rose",
    "Vibrant Melody",
    "Secret Garden",
    "Giant Redwood",
    "Blazing Comet",
    "Velvet Night",
    "Rustling Leaves",
    "Tiny Sparrow",
    "Dancing Flame",
    "Jolly Wanderer",
    "Cobalt Sky",
    "Emerald Isle",
    "Wildflower Field",
    "Mysterious Cave",
    "Crimson Tide",
    "Blue Lagoon",
    "Golden Sunrise",
    "Whispering Wind",
    "Frosty Peak",
    "Glistening Dew",
    "Enchanted Forest",
    "Raging Torrent",
    "Burning Ember",
    "Cool Shadow",
    "Starry Horizon",
    "Sapphire Lake",
    "Velvet Fox",
    "Lucky Clover",
    "Wandering Spirit",
    "Timid Mouse",
    "Bold Explorer",
    "Gentle Breeze",
    "Cunning Fox",
    "Playful Dolphin",
    "Thunderous Roar",
    "Mellow Sunset",
    "Rustic Cabin",
    "Fabled Tale",
    "Shimmering Sea",
    "Vast Prairie",
    "Stormy Sky",
    "Misty Valley",
    "Blustering Gale",
    "Tranquil Pond",
    "Spicy Pepper",
    "Sweet Honey",
    "Clever Dolphin",
    "Rugged Peak",
    "Quiet Harbor",
    "Golden Grain",
    "Sharp Blade",
    "Feathered Quill",
    "Silver Moon",
    "Crystal Cave",
    "Thick Forest",
];

/// Display color palette, one uniform pick per connection.
pub(crate) const RANDOM_COLORS: &[&str] = &[
    "#E6194B", // red
    "#3CB44B", // green
    "#FFE119", // yellow
    "#4363D8", // blue
    "#F58231", // orange
    "#911EB4", // purple
    "#46F0F0", // cyan
    "#F032E6", // magenta
    "#BCF60C", // lime
    "#FABEBE", // pink
    "#008080", // teal
    "#E6BEFF", // lavender
    "#9A6324", // brown
    "#FFFAC8", // beige
    "#800000", // maroon
    "#AAFFC3", // mint
    "#808000", // olive
    "#FFD8B1", // apricot
    "#000075", // navy
    "#808080", // gray
];

/// A uniformly random index below `len` from the OS CSPRNG.
fn random_index(len: usize) -> usize {
    let mut bytes = [0u8; 4];
    #[allow(clippy::expect_used)]
    getrandom::getrandom(&mut bytes)
        .expect("invariant: OS RNG failure is unrecoverable for identity assignment");
    u32::from_be_bytes(bytes) as usize % len
}

/// A random name from the dictionary. Does NOT check uniqueness.
pub fn random_username() -> &'static str {
    RANDOM_NAMES[random_index(RANDOM_NAMES.len())]
}

/// A uniformly random color from the palette.
pub fn random_color() -> &'static str {
    RANDOM_COLORS[random_index(RANDOM_COLORS.len())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_plentiful_and_distinct() {
        let unique: std::collections::HashSet<_> = RANDOM_NAMES.iter().collect();
        assert_eq!(unique.len(), RANDOM_NAMES.len());
        assert_eq!(RANDOM_NAMES.len(), 100);
    }

    #[test]
    fn colors_are_seven_char_hex() {
        assert_eq!(RANDOM_COLORS.len(), 20);
        for color in RANDOM_COLORS {
            assert_eq!(color.len(), 7);
            assert!(color.starts_with('#'));
            assert!(color[1..].chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn sampling_stays_in_range() {
        for _ in 0..256 {
            let _ = random_username();
            let _ = random_color();
        }
    }
}
