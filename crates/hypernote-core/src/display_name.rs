//! Friendly, deterministic names for peers ("Ivy Otter 17").

const ADJECTIVES: [&str; 15] = [
    "Amber", "Brisk", "Calm", "Dawn", "Ember", "Frost", "Golden", "Ivy", "Lunar", "Mellow", "Nova",
    "Quiet", "River", "Solar", "Velvet",
];

const NOUNS: [&str; 15] = [
    "Badger", "Falcon", "Fox", "Harbor", "Lynx", "Maple", "Otter", "Pine", "Raven", "Sable",
    "Sparrow", "Stone", "Tide", "Willow", "Wolf",
];

/// Same peer id, same name, on every instance.
pub fn peer_display_name(peer_id: &str) -> String {
    let seed = seed(peer_id) as usize;
    let adjective = ADJECTIVES[seed % ADJECTIVES.len()];
    let noun = NOUNS[(seed / ADJECTIVES.len()) % NOUNS.len()];
    let badge = seed % 90 + 10;
    format!("{adjective} {noun} {badge}")
}

// 31-multiplier hash over the leading UTF-16 unit of each char
fn seed(peer_id: &str) -> u32 {
    let mut units = [0u16; 2];
    peer_id.chars().fold(0u32, |hash, ch| {
        let unit = ch.encode_utf16(&mut units)[0];
        hash.wrapping_mul(31).wrapping_add(u32::from(unit))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_names() {
        assert_eq!(peer_display_name("a"), "Ivy Otter 17");
        // Empty id hashes to zero
        assert_eq!(peer_display_name(""), "Amber Badger 10");
    }

    #[test]
    fn test_deterministic() {
        let id = "a1b2c3d4e5f67890";
        assert_eq!(peer_display_name(id), peer_display_name(id));
    }

    #[test]
    fn test_badge_range() {
        for id in ["x", "peer-1", "ffffffffffffffff", "héllo", "🦊"] {
            let name = peer_display_name(id);
            let badge: u32 = name.rsplit(' ').next().unwrap().parse().unwrap();
            assert!((10..100).contains(&badge), "{name}");
        }
    }
}
