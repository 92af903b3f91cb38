//! Human-typist behavior shaping: adaptive reply delays and occasional
//! deliberate mistakes.
//!
//! All randomness flows through the injected `Rng`, so a seeded generator
//! makes every decision reproducible.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::arabic;
use crate::config::BehaviorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MistakeKind {
    /// One character replaced by a keyboard neighbor.
    Typo,
    /// A shuffled subset of the tokens.
    Partial,
    /// All tokens, shuffled.
    Reorder,
    /// Same text, twice the delay.
    Delayed,
}

#[derive(Debug, Clone)]
pub struct PlannedReply {
    pub text: String,
    pub delay: Duration,
    pub mistake: Option<MistakeKind>,
}

pub struct BehaviorEngine<R: Rng> {
    config: BehaviorConfig,
    rng: R,
}

impl BehaviorEngine<StdRng> {
    pub fn new(config: BehaviorConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }
}

impl<R: Rng> BehaviorEngine<R> {
    pub fn with_rng(config: BehaviorConfig, rng: R) -> Self {
        Self { config, rng }
    }

    /// Shape one outbound reply from the resolved tokens.
    pub fn plan(&mut self, tokens: &[String]) -> PlannedReply {
        let mistake = if self.rng.gen::<f64>() < self.config.mistake_probability {
            Some(self.pick_mistake())
        } else {
            None
        };

        let words = match mistake {
            Some(MistakeKind::Typo) => self.apply_typo(tokens),
            Some(MistakeKind::Partial) => self.apply_partial(tokens),
            Some(MistakeKind::Reorder) => self.apply_reorder(tokens),
            Some(MistakeKind::Delayed) | None => tokens.to_vec(),
        };

        let delay = self.delay_for(words.len(), mistake == Some(MistakeKind::Delayed));
        PlannedReply {
            text: words.join(" "),
            delay,
            mistake,
        }
    }

    fn pick_mistake(&mut self) -> MistakeKind {
        if self.rng.gen::<f64>() < self.config.typo_probability {
            MistakeKind::Typo
        } else {
            *[MistakeKind::Partial, MistakeKind::Reorder, MistakeKind::Delayed]
                .choose(&mut self.rng)
                .expect("variant list is non-empty")
        }
    }

    /// Replace one character of one token with an adjacent key. A token of
    /// one character, or a character without a keyboard position or
    /// neighbor, leaves the reply untouched.
    fn apply_typo(&mut self, tokens: &[String]) -> Vec<String> {
        let mut words = tokens.to_vec();
        if words.is_empty() {
            return words;
        }
        let index = self.rng.gen_range(0..words.len());
        let chars: Vec<char> = words[index].chars().collect();
        if chars.len() <= 1 {
            return words;
        }

        let pos = self.rng.gen_range(0..chars.len());
        let neighbors = arabic::key_neighbors(chars[pos]);
        if let Some(&replacement) = neighbors.as_slice().choose(&mut self.rng) {
            let mut mutated = chars;
            mutated[pos] = replacement;
            words[index] = mutated.into_iter().collect();
        }
        words
    }

    fn apply_partial(&mut self, tokens: &[String]) -> Vec<String> {
        let keep = ((tokens.len() as f64 * self.config.partial_keep_ratio).floor() as usize).max(1);
        let mut shuffled = tokens.to_vec();
        shuffled.shuffle(&mut self.rng);
        shuffled.truncate(keep);
        shuffled
    }

    fn apply_reorder(&mut self, tokens: &[String]) -> Vec<String> {
        let mut shuffled = tokens.to_vec();
        shuffled.shuffle(&mut self.rng);
        shuffled
    }

    fn delay_for(&mut self, token_count: usize, delayed: bool) -> Duration {
        let jitter = if self.config.jitter_ms > 0 {
            self.rng.gen_range(0..self.config.jitter_ms)
        } else {
            0
        };
        let mut millis = (self.config.base_delay_ms
            + self.config.per_token_delay_ms * token_count.saturating_sub(1) as u64
            + jitter) as f64;
        if delayed {
            millis *= self.config.delayed_multiplier;
        }
        Duration::from_millis(millis as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn engine(config: BehaviorConfig, seed: u64) -> BehaviorEngine<StdRng> {
        BehaviorEngine::with_rng(config, StdRng::seed_from_u64(seed))
    }

    #[test]
    fn clean_mode_joins_tokens_verbatim() {
        let config = BehaviorConfig {
            mistake_probability: 0.0,
            ..BehaviorConfig::default()
        };
        let mut engine = engine(config, 7);
        let reply = engine.plan(&tokens(&["a", "b"]));
        assert_eq!(reply.text, "a b");
        assert_eq!(reply.mistake, None);
    }

    #[test]
    fn clean_delay_scales_with_token_count() {
        let config = BehaviorConfig {
            mistake_probability: 0.0,
            base_delay_ms: 50,
            per_token_delay_ms: 25,
            jitter_ms: 0,
            ..BehaviorConfig::default()
        };
        let mut engine = engine(config, 7);
        let one = engine.plan(&tokens(&["a"]));
        let three = engine.plan(&tokens(&["a", "b", "c"]));
        assert_eq!(one.delay, Duration::from_millis(50));
        assert_eq!(three.delay, Duration::from_millis(100));
    }

    #[test]
    fn reorder_is_a_permutation() {
        let config = BehaviorConfig::default();
        let mut engine = engine(config, 11);
        let original = tokens(&["a", "b", "c", "d"]);
        let reordered = engine.apply_reorder(&original);

        let mut sorted_original = original.clone();
        sorted_original.sort();
        let mut sorted_reordered = reordered.clone();
        sorted_reordered.sort();
        assert_eq!(sorted_original, sorted_reordered);
    }

    #[test]
    fn partial_keeps_a_strict_subset() {
        let config = BehaviorConfig::default();
        let mut engine = engine(config, 3);
        let original = tokens(&["a", "b", "c", "d"]);
        let partial = engine.apply_partial(&original);
        assert_eq!(partial.len(), 2); // floor(4 * 0.7) = 2
        for word in &partial {
            assert!(original.contains(word));
        }
    }

    #[test]
    fn partial_of_single_token_keeps_it() {
        let config = BehaviorConfig::default();
        let mut engine = engine(config, 3);
        assert_eq!(engine.apply_partial(&tokens(&["a"])), tokens(&["a"]));
    }

    #[test]
    fn typo_changes_exactly_one_mapped_character() {
        let config = BehaviorConfig::default();
        let mut engine = engine(config, 5);
        let original = tokens(&["غوكو", "فيجيتا"]);
        let mutated = engine.apply_typo(&original);

        assert_eq!(mutated.len(), original.len());
        let changed: Vec<_> = original
            .iter()
            .zip(&mutated)
            .filter(|(a, b)| a != b)
            .collect();
        assert_eq!(changed.len(), 1);
        let (before, after) = changed[0];
        assert_eq!(before.chars().count(), after.chars().count());
        let diffs = before
            .chars()
            .zip(after.chars())
            .filter(|(a, b)| a != b)
            .count();
        assert_eq!(diffs, 1);
    }

    #[test]
    fn typo_on_unmapped_characters_is_a_no_op() {
        let config = BehaviorConfig::default();
        let mut engine = engine(config, 5);
        let original = tokens(&["xyz"]);
        assert_eq!(engine.apply_typo(&original), original);
    }

    #[test]
    fn delayed_mistake_doubles_the_delay() {
        let config = BehaviorConfig {
            base_delay_ms: 100,
            per_token_delay_ms: 0,
            jitter_ms: 0,
            delayed_multiplier: 2.0,
            ..BehaviorConfig::default()
        };
        let mut engine = engine(config, 5);
        assert_eq!(engine.delay_for(1, false), Duration::from_millis(100));
        assert_eq!(engine.delay_for(1, true), Duration::from_millis(200));
    }

    #[test]
    fn seeded_engines_agree() {
        let plan = |seed| {
            let mut e = engine(BehaviorConfig::default(), seed);
            e.plan(&tokens(&["غوكو", "فيجيتا", "ناروتو"]))
        };
        let a = plan(42);
        let b = plan(42);
        assert_eq!(a.text, b.text);
        assert_eq!(a.delay, b.delay);
        assert_eq!(a.mistake, b.mistake);
    }

    #[test]
    fn forced_mistake_mode_still_covers_every_token_on_reorder() {
        let config = BehaviorConfig {
            mistake_probability: 1.0,
            typo_probability: 0.0,
            ..BehaviorConfig::default()
        };
        // Sample seeds until the uniform three-way pick lands on reorder;
        // the output must be a permutation, never a sub- or superset.
        for seed in 0..64 {
            let mut engine = engine(config.clone(), seed);
            let reply = engine.plan(&tokens(&["a", "b"]));
            if reply.mistake == Some(MistakeKind::Reorder) {
                let mut words: Vec<&str> = reply.text.split(' ').collect();
                words.sort_unstable();
                assert_eq!(words, vec!["a", "b"]);
                return;
            }
        }
        panic!("no seed produced a reorder mistake");
    }
}
