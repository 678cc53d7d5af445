//! Voice filter derived from the active implementation.

use serde::{Deserialize, Serialize};

use super::selection::LoadPlan;

/// Voices a caller may offer for the current serving path.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "voices", rename_all = "lowercase")]
pub enum VoiceFilter {
    /// Every configured voice is supported.
    #[default]
    All,
    /// Only the listed voices are known to work.
    Only(Vec<String>),
}

impl VoiceFilter {
    /// Filter for a loaded plan. `known_good` is the subset constrained
    /// implementations are known to handle.
    pub fn for_plan(plan: Option<&LoadPlan>, known_good: &[String]) -> Self {
        match plan {
            Some(plan) if plan.variant.is_constrained() => VoiceFilter::Only(known_good.to_vec()),
            _ => VoiceFilter::All,
        }
    }

    pub fn allows(&self, voice: &str) -> bool {
        match self {
            VoiceFilter::All => true,
            VoiceFilter::Only(list) => list.iter().any(|v| v == voice),
        }
    }

    /// Narrow `all` to the allowed voices, keeping the order of `all`.
    ///
    /// Every returned name passes [`VoiceFilter::allows`]. The result may be
    /// empty when the catalog shares no names with the known-good list.
    pub fn apply(&self, all: &[String]) -> Vec<String> {
        all.iter().filter(|v| self.allows(v)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::selection::{Device, EngineVariant};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn only_quantized_plans_are_constrained() {
        let known = names(&["Binh", "Tuyen"]);
        let quantized = LoadPlan {
            variant: EngineVariant::Quantized,
            backbone_device: Device::Cpu,
            codec_device: Device::Cpu,
        };
        let standard = LoadPlan {
            variant: EngineVariant::Standard,
            ..quantized
        };

        assert_eq!(VoiceFilter::for_plan(Some(&quantized), &known), VoiceFilter::Only(known.clone()));
        assert_eq!(VoiceFilter::for_plan(Some(&standard), &known), VoiceFilter::All);
        assert_eq!(VoiceFilter::for_plan(None, &known), VoiceFilter::All);
    }

    #[test]
    fn apply_keeps_configured_order() {
        let filter = VoiceFilter::Only(names(&["Vinh", "Binh"]));
        let all = names(&["Binh", "Doan", "Vinh"]);
        assert_eq!(filter.apply(&all), names(&["Binh", "Vinh"]));
        assert!(filter.allows("Vinh"));
        assert!(!filter.allows("Doan"));
    }

    #[test]
    fn empty_intersection_offers_nothing() {
        let filter = VoiceFilter::Only(names(&["Nobody"]));
        let all = names(&["Binh", "Doan"]);
        let offered = filter.apply(&all);
        assert!(offered.is_empty());
        assert!(all.iter().all(|v| !filter.allows(v)));
    }

    #[test]
    fn offered_voices_are_always_allowed() {
        let all = names(&["Binh", "Doan", "Vinh"]);
        for filter in [VoiceFilter::All, VoiceFilter::Only(names(&["Vinh", "Ghost"]))] {
            assert!(filter.apply(&all).iter().all(|v| filter.allows(v)));
        }
    }
}
