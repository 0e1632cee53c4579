//! When the bot speaks up in a channel.

use rand::Rng;

/// Reply when `bot_nick` is mentioned anywhere in the line, otherwise when
/// `draw` falls under `random_reply_percent`.
///
/// `draw` must be a fresh [`draw`] per message. A percentage of `0` means
/// the bot only answers when mentioned.
pub fn should_reply(raw_text: &str, bot_nick: &str, random_reply_percent: f64, draw: f64) -> bool {
    mentions(raw_text, bot_nick) || draw < random_reply_percent
}

/// Case-insensitive substring match of the nick.
pub fn mentions(raw_text: &str, bot_nick: &str) -> bool {
    !bot_nick.is_empty() && raw_text.to_lowercase().contains(&bot_nick.to_lowercase())
}

/// Uniform sample from `[1, 100)`.
pub fn draw<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.gen_range(1.0..100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn mention_always_replies() {
        for percent in [0.0, 50.0, 100.0] {
            assert!(should_reply("hey COBE, talk to me", "cobe", percent, 99.9));
            assert!(should_reply("xcobex", "Cobe", percent, 99.9));
        }
    }

    #[test]
    fn zero_percent_without_mention_never_replies() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            assert!(!should_reply("just chatting", "cobe", 0.0, draw(&mut rng)));
        }
    }

    #[test]
    fn draw_below_percentage_replies() {
        assert!(should_reply("just chatting", "cobe", 10.0, 9.5));
        assert!(!should_reply("just chatting", "cobe", 10.0, 10.0));
        assert!(should_reply("just chatting", "cobe", 100.0, 99.99));
    }

    #[test]
    fn draw_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..1000 {
            let d = draw(&mut rng);
            assert!((1.0..100.0).contains(&d), "{d}");
        }
    }

    #[test]
    fn empty_nick_is_never_mentioned() {
        assert!(!mentions("anything", ""));
    }
}
