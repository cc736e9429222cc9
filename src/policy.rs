//! Intent → retrieval-policy mapping.
//!
//! A pure lookup table, same shape as `scan.rs`'s `describe()` extension
//! table: a fixed set of rows keyed by a small enum, with a fallback for
//! anything the caller overrides. No I/O, no learning loop — `interaction.rs`
//! is where observed outcomes eventually feed back into `seed_weights` for
//! a repo.

use serde::{Deserialize, Serialize};

use crate::intent::Intent;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeedWeights {
    pub vector: f64,
    pub bm25: f64,
    pub memory: f64,
    pub symbol: f64,
}

impl SeedWeights {
    /// Clamp every weight to `[0, 3]` and renormalize to sum to 4.0 (the
    /// unweighted default sum), so a learned override from
    /// `interaction.rs` can't zero out a stream or blow up the fusion math.
    #[must_use]
    pub fn clamped(self) -> Self {
        let clamp = |w: f64| w.clamp(0.0, 3.0);
        let (v, b, m, s) = (clamp(self.vector), clamp(self.bm25), clamp(self.memory), clamp(self.symbol));
        let sum = v + b + m + s;
        if sum <= 0.0 {
            return SeedWeights::default();
        }
        let scale = 4.0 / sum;
        SeedWeights { vector: v * scale, bm25: b * scale, memory: m * scale, symbol: s * scale }
    }
}

impl Default for SeedWeights {
    fn default() -> Self {
        SeedWeights { vector: 1.0, bm25: 1.0, memory: 1.0, symbol: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrievalPolicy {
    pub max_depth: usize,
    pub early_stop_threshold: f64,
    pub include_symbols: bool,
    pub include_files: bool,
    pub include_content: bool,
    pub seed_weights: SeedWeights,
    /// 0.0 favors breadth (cheap, many shallow candidates), 1.0 favors depth
    /// (fewer candidates, more graph expansion); used by `assembler.rs` to
    /// pick between `TraversalStrategy::BreadthFirst`/`QualityFirst`.
    pub cost_bias: f64,
}

/// Policy defaults, one row per intent.
#[must_use]
pub fn default_policy(intent: Intent) -> RetrievalPolicy {
    match intent {
        Intent::Symbol => RetrievalPolicy {
            max_depth: 2,
            early_stop_threshold: 0.80,
            include_symbols: true,
            include_files: true,
            include_content: true,
            seed_weights: SeedWeights { vector: 0.6, bm25: 0.8, memory: 0.4, symbol: 1.8 },
            cost_bias: 0.7,
        },
        Intent::Config => RetrievalPolicy {
            max_depth: 1,
            early_stop_threshold: 0.75,
            include_symbols: false,
            include_files: true,
            include_content: true,
            seed_weights: SeedWeights { vector: 0.7, bm25: 1.4, memory: 0.6, symbol: 0.3 },
            cost_bias: 0.3,
        },
        Intent::Api => RetrievalPolicy {
            max_depth: 3,
            early_stop_threshold: 0.70,
            include_symbols: true,
            include_files: true,
            include_content: true,
            seed_weights: SeedWeights { vector: 1.0, bm25: 1.0, memory: 0.5, symbol: 1.2 },
            cost_bias: 0.6,
        },
        Intent::Incident => RetrievalPolicy {
            max_depth: 3,
            early_stop_threshold: 0.65,
            include_symbols: true,
            include_files: true,
            include_content: true,
            seed_weights: SeedWeights { vector: 0.9, bm25: 1.3, memory: 1.2, symbol: 0.9 },
            cost_bias: 0.8,
        },
        Intent::Search => RetrievalPolicy {
            max_depth: 1,
            early_stop_threshold: 0.60,
            include_symbols: true,
            include_files: true,
            include_content: true,
            seed_weights: SeedWeights::default(),
            cost_bias: 0.4,
        },
    }
}

/// Symbol-boost multiplier applied during fusion when a candidate's entity
/// type matches the query's extracted entity shape.
pub const SYMBOL_BOOST: f64 = 1.5;

/// Apply a learned `seed_weights` override (e.g. from per-repo interaction
/// history) on top of an intent's default policy, clamping it first.
#[must_use]
pub fn with_learned_weights(mut policy: RetrievalPolicy, weights: SeedWeights) -> RetrievalPolicy {
    policy.seed_weights = weights.clamped();
    policy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_intent_favors_symbol_stream() {
        let policy = default_policy(Intent::Symbol);
        assert!(policy.seed_weights.symbol > policy.seed_weights.vector);
    }

    #[test]
    fn config_intent_disables_symbol_traversal() {
        let policy = default_policy(Intent::Config);
        assert!(!policy.include_symbols);
    }

    #[test]
    fn clamped_weights_never_exceed_three_and_sum_to_four() {
        let extreme = SeedWeights { vector: 100.0, bm25: -5.0, memory: 2.0, symbol: 0.0 };
        let clamped = extreme.clamped();
        assert!(clamped.vector <= 3.0);
        assert!(clamped.bm25 >= 0.0);
        let sum = clamped.vector + clamped.bm25 + clamped.memory + clamped.symbol;
        assert!((sum - 4.0).abs() < 1e-6);
    }

    #[test]
    fn zeroed_weights_fall_back_to_default() {
        let zero = SeedWeights { vector: 0.0, bm25: 0.0, memory: 0.0, symbol: 0.0 };
        assert_eq!(zero.clamped(), SeedWeights::default());
    }
}
