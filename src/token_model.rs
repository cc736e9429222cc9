//! Per-model token accounting and packing profiles.
//!
//! Built on top of `tokenizer.rs`'s `Tokenizer` trait: that module answers
//! "how many tokens is this string," this module answers "how many tokens
//! does this *model* allow, and how should a budget be carved up across
//! priority tiers." Grounded in `tokenizer.rs`'s dispatch pattern
//! (`create_tokenizer` by name) and its `--tokenizer` CLI flag.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::tokenizer::{create_tokenizer, Tokenizer};
use crate::types::PriorityClass;

/// A named model family with a context window, max output budget, and the
/// char-per-token ratio used when an exact tokenizer isn't wired up for it.
#[derive(Debug, Clone)]
pub struct ModelProfile {
    pub name: &'static str,
    pub context_size: usize,
    pub max_output_tokens: usize,
    pub chars_per_token: f64,
    pub tokenizer_name: &'static str,
}

/// Known model families. New models can be added here without touching
/// callers — they all go through `ModelProfile::for_model`.
const KNOWN_MODELS: &[ModelProfile] = &[
    ModelProfile {
        name: "gpt-4o",
        context_size: 128_000,
        max_output_tokens: 16_384,
        chars_per_token: 3.5,
        tokenizer_name: "tiktoken",
    },
    ModelProfile {
        name: "gpt-4-turbo",
        context_size: 128_000,
        max_output_tokens: 4_096,
        chars_per_token: 3.5,
        tokenizer_name: "tiktoken",
    },
    ModelProfile {
        name: "claude-3-5-sonnet",
        context_size: 200_000,
        max_output_tokens: 8_192,
        chars_per_token: 4.0,
        tokenizer_name: "bytes-estimate",
    },
    ModelProfile {
        name: "claude-3-opus",
        context_size: 200_000,
        max_output_tokens: 4_096,
        chars_per_token: 4.0,
        tokenizer_name: "bytes-estimate",
    },
    ModelProfile {
        name: "gemini-1.5-pro",
        context_size: 1_000_000,
        max_output_tokens: 8_192,
        chars_per_token: 4.0,
        tokenizer_name: "bytes-estimate",
    },
    ModelProfile {
        name: "llama-3-70b",
        context_size: 128_000,
        max_output_tokens: 4_096,
        chars_per_token: 3.8,
        tokenizer_name: "bytes-estimate",
    },
];

const DEFAULT_MODEL: &ModelProfile = &KNOWN_MODELS[0];

impl ModelProfile {
    #[must_use]
    pub fn for_model(model: &str) -> &'static ModelProfile {
        KNOWN_MODELS.iter().find(|m| m.name == model).unwrap_or(DEFAULT_MODEL)
    }

    #[must_use]
    pub fn names() -> Vec<&'static str> {
        KNOWN_MODELS.iter().map(|m| m.name).collect()
    }

    /// Default per-session budget: 70% of the context window, leaving
    /// headroom for the system prompt, conversation history, and the
    /// model's own reply.
    #[must_use]
    pub fn default_session_budget(&self) -> usize {
        (self.context_size as f64 * 0.7).floor() as usize
    }
}

/// A `TokenModel` pairs a model profile with a concrete tokenizer, caching
/// the tokenizer instance so repeated `count_tokens` calls during context
/// assembly don't reconstruct a BPE table per call.
pub struct TokenModel {
    profile: &'static ModelProfile,
    tokenizer: Arc<dyn Tokenizer>,
}

impl TokenModel {
    #[must_use]
    pub fn for_model(model: &str) -> Self {
        let profile = ModelProfile::for_model(model);
        let tokenizer = create_tokenizer(profile.tokenizer_name);
        TokenModel { profile, tokenizer }
    }

    /// Build from an explicit tokenizer override (the CLI's `--tokenizer` flag).
    #[must_use]
    pub fn with_tokenizer(model: &str, tokenizer_name: &str) -> Self {
        let profile = ModelProfile::for_model(model);
        TokenModel { profile, tokenizer: create_tokenizer(tokenizer_name) }
    }

    #[must_use]
    pub fn count_tokens(&self, text: &str) -> usize {
        self.tokenizer.count_tokens(text)
    }

    #[must_use]
    pub fn context_size(&self) -> usize {
        self.profile.context_size
    }

    #[must_use]
    pub fn max_output_tokens(&self) -> usize {
        self.profile.max_output_tokens
    }

    #[must_use]
    pub fn default_session_budget(&self) -> usize {
        self.profile.default_session_budget()
    }

    #[must_use]
    pub fn tokenizer_name(&self) -> &str {
        self.tokenizer.name()
    }

    #[must_use]
    pub fn model_name(&self) -> &'static str {
        self.profile.name
    }
}

// ---------------------------------------------------------------------------
// Packing profiles
// ---------------------------------------------------------------------------

/// The four ordered admission tiers a hit is classified into before the
/// budget walk, plus `reserve` (held back for tail items, never spent by
/// the primary walk). Distinct from `PriorityClass`: a chunk's content type
/// (code/tests/docs/...) only feeds `PackingProfile::priorities` weighting,
/// which is one input to *which* admission tier a hit lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionTier {
    MustHave,
    Important,
    Supplementary,
    Optional,
}

impl AdmissionTier {
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            AdmissionTier::MustHave => "must_have",
            AdmissionTier::Important => "important",
            AdmissionTier::Supplementary => "supplementary",
            AdmissionTier::Optional => "optional",
        }
    }

    /// Bucket a hit's rank (0 = best) among `total` candidates into one of
    /// the four tiers by quartile. The caller ranks candidates by a
    /// priority-weighted score (see `PackingProfile::priority_weight`)
    /// before calling this, so content-type weighting and fusion rank both
    /// feed the classification spec §4.9 step 1 asks for.
    #[must_use]
    pub fn for_rank(rank: usize, total: usize) -> Self {
        if total == 0 {
            return AdmissionTier::Optional;
        }
        let frac = rank as f64 / total as f64;
        if frac < 0.25 {
            AdmissionTier::MustHave
        } else if frac < 0.5 {
            AdmissionTier::Important
        } else if frac < 0.75 {
            AdmissionTier::Supplementary
        } else {
            AdmissionTier::Optional
        }
    }
}

/// Two independent axes, per spec §4.8: `priorities` weighs a chunk's
/// *content type* (code/tests/comments/examples/config/docs) on `[0,1]`
/// and feeds admission-tier classification; `budget_allocation` carves the
/// session budget across the four ordered *admission tiers* plus a
/// `reserve` held back for tail items, summing to 1.0. One profile is kept
/// per `(repo, model)` in storage so a repo can tune allocation without
/// affecting other repos sharing the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackingProfile {
    pub repo: String,
    pub model: String,
    pub priorities: HashMap<String, f64>,
    pub budget_allocation: HashMap<String, f64>,
    pub capsule_strategies: HashMap<String, CapsuleStrategy>,
    pub truncation_strategy: TruncationStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapsuleStrategy {
    /// Signature + doc comment + first N lines of the body.
    SignatureAndDoc,
    /// Manifest line only (`path — description`), used for the lowest tiers.
    ManifestLine,
    /// No capsule: the tier is skipped entirely once its share is spent.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationStrategy {
    /// Truncate the lowest-scored admitted chunk first.
    LowestScoreFirst,
    /// Truncate the largest admitted chunk first (frees the most budget per cut).
    LargestFirst,
}

impl Default for PackingProfile {
    fn default() -> Self {
        let mut priorities = HashMap::new();
        priorities.insert("code".to_string(), 1.0);
        priorities.insert("tests".to_string(), 0.7);
        priorities.insert("config".to_string(), 0.6);
        priorities.insert("docs".to_string(), 0.5);
        priorities.insert("examples".to_string(), 0.45);
        priorities.insert("comments".to_string(), 0.3);

        let mut budget_allocation = HashMap::new();
        budget_allocation.insert("must_have".to_string(), 0.40);
        budget_allocation.insert("important".to_string(), 0.30);
        budget_allocation.insert("supplementary".to_string(), 0.20);
        budget_allocation.insert("optional".to_string(), 0.07);
        budget_allocation.insert("reserve".to_string(), 0.03);

        let mut capsule_strategies = HashMap::new();
        capsule_strategies.insert("code".to_string(), CapsuleStrategy::SignatureAndDoc);
        capsule_strategies.insert("tests".to_string(), CapsuleStrategy::SignatureAndDoc);
        capsule_strategies.insert("config".to_string(), CapsuleStrategy::ManifestLine);
        capsule_strategies.insert("docs".to_string(), CapsuleStrategy::ManifestLine);
        capsule_strategies.insert("examples".to_string(), CapsuleStrategy::ManifestLine);
        capsule_strategies.insert("comments".to_string(), CapsuleStrategy::None);

        PackingProfile {
            repo: String::new(),
            model: String::new(),
            priorities,
            budget_allocation,
            capsule_strategies,
            truncation_strategy: TruncationStrategy::LowestScoreFirst,
        }
    }
}

impl PackingProfile {
    #[must_use]
    pub fn for_repo_model(repo: &str, model: &str) -> Self {
        let mut profile = PackingProfile::default();
        profile.repo = repo.to_string();
        profile.model = model.to_string();
        profile
    }

    /// Content-type weight on `[0,1]` used to classify a hit into an
    /// admission tier (spec §4.9 step 1), not to size a budget directly.
    #[must_use]
    pub fn priority_weight(&self, priority: PriorityClass) -> f64 {
        self.priorities.get(priority_key(priority)).copied().unwrap_or(0.5)
    }

    /// Share of `total_budget` available to `tier`'s admission walk.
    #[must_use]
    pub fn tier_budget(&self, total_budget: usize, tier: AdmissionTier) -> usize {
        let share = self.budget_allocation.get(tier.key()).copied().unwrap_or(0.0);
        (total_budget as f64 * share).floor() as usize
    }

    /// Budget held back from the primary tier walk, spent only on tail
    /// items once every tier has been walked (spec §4.8's "Budget
    /// arithmetic" paragraph).
    #[must_use]
    pub fn reserve_budget(&self, total_budget: usize) -> usize {
        let share = self.budget_allocation.get("reserve").copied().unwrap_or(0.0);
        (total_budget as f64 * share).floor() as usize
    }

    #[must_use]
    pub fn capsule_strategy(&self, priority: PriorityClass) -> CapsuleStrategy {
        self.capsule_strategies.get(priority_key(priority)).copied().unwrap_or(CapsuleStrategy::ManifestLine)
    }
}

fn priority_key(priority: PriorityClass) -> &'static str {
    match priority {
        PriorityClass::Code => "code",
        PriorityClass::Tests => "tests",
        PriorityClass::Comments => "comments",
        PriorityClass::Examples => "examples",
        PriorityClass::Config => "config",
        PriorityClass::Docs => "docs",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_falls_back_to_default_profile() {
        let model = TokenModel::for_model("some-unreleased-model");
        assert_eq!(model.model_name(), "gpt-4o");
    }

    #[test]
    fn session_budget_is_seventy_percent_of_context() {
        let model = TokenModel::for_model("claude-3-5-sonnet");
        assert_eq!(model.default_session_budget(), 140_000);
    }

    #[test]
    fn packing_profile_shares_sum_to_one() {
        let profile = PackingProfile::default();
        let total: f64 = profile.budget_allocation.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn tier_budget_scales_with_share() {
        let profile = PackingProfile::default();
        let budget = profile.tier_budget(10_000, AdmissionTier::MustHave);
        assert_eq!(budget, 4_000);
    }

    #[test]
    fn reserve_is_held_back_from_the_tier_shares() {
        let profile = PackingProfile::default();
        let tiers_total: f64 = [AdmissionTier::MustHave, AdmissionTier::Important, AdmissionTier::Supplementary, AdmissionTier::Optional]
            .iter()
            .map(|t| profile.budget_allocation[t.key()])
            .sum();
        let reserve = profile.budget_allocation["reserve"];
        assert!((tiers_total + reserve - 1.0).abs() < 1e-9);
        assert_eq!(profile.reserve_budget(10_000), 300);
    }

    #[test]
    fn rank_quartiles_map_to_the_four_admission_tiers() {
        assert_eq!(AdmissionTier::for_rank(0, 8), AdmissionTier::MustHave);
        assert_eq!(AdmissionTier::for_rank(2, 8), AdmissionTier::Important);
        assert_eq!(AdmissionTier::for_rank(4, 8), AdmissionTier::Supplementary);
        assert_eq!(AdmissionTier::for_rank(7, 8), AdmissionTier::Optional);
    }

    #[test]
    fn priority_weight_favors_code_over_comments() {
        let profile = PackingProfile::default();
        assert!(profile.priority_weight(PriorityClass::Code) > profile.priority_weight(PriorityClass::Comments));
    }
}
