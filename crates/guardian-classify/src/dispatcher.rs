//! The classifier dispatcher: mode selection, escalation, rate limiting,
//! and the fall-through chain.
//!
//! Auto mode calls the fast tier and escalates to the deep tier only when
//! the fast verdict is `unknown` or below 60% confidence. The deep tier
//! runs behind a sliding-window quota; when exhausted, calls fall through
//! to the fast tier and then to the local tier. When every cloud tier is
//! unreachable the local verdict stands and the caller is told to rank
//! the spectrogram into the offline sync queue.

use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use guardian_types::{ClassificationResult, Label};

use crate::classifier::{Classifier, ClassifyInput};
use crate::rate_limit::SlidingWindow;
use crate::{ClassifyError, Result};

/// Escalation threshold for Auto mode: a fast verdict below this
/// confidence goes to the deep tier.
const ESCALATION_CONFIDENCE: u8 = 60;

/// Dispatch mode, selected per request with a config default.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Deep,
    Fast,
    Local,
    #[default]
    Auto,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deep" => Ok(Mode::Deep),
            "fast" => Ok(Mode::Fast),
            "local" => Ok(Mode::Local),
            "auto" => Ok(Mode::Auto),
            other => Err(format!("unknown AI mode: {other}")),
        }
    }
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Deep => "deep",
            Mode::Fast => "fast",
            Mode::Local => "local",
            Mode::Auto => "auto",
        }
    }
}

/// Which tier produced a verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    Local,
    FastCloud,
    DeepCloud,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Local => "local",
            Tier::FastCloud => "fast_cloud",
            Tier::DeepCloud => "deep_cloud",
        }
    }
}

/// A successful dispatch.
#[derive(Clone, Debug)]
pub struct Outcome {
    pub result: ClassificationResult,
    pub tier: Tier,
    /// Auto mode escalated the fast verdict to the deep tier.
    pub escalated: bool,
    /// A cloud tier was unreachable; the caller should enqueue the
    /// spectrogram for re-classification when connectivity returns.
    pub cloud_unreachable: bool,
}

/// Composes the three tiers behind one entry point.
pub struct Dispatcher {
    mode: Mode,
    local: Box<dyn Classifier>,
    fast: Option<Box<dyn Classifier>>,
    deep: Option<Box<dyn Classifier>>,
    deep_quota: Mutex<SlidingWindow>,
}

impl Dispatcher {
    pub fn new(
        mode: Mode,
        local: Box<dyn Classifier>,
        fast: Option<Box<dyn Classifier>>,
        deep: Option<Box<dyn Classifier>>,
        deep_rate_limit: u32,
        deep_rate_window_ms: u64,
    ) -> Self {
        Self {
            mode,
            local,
            fast,
            deep,
            deep_quota: Mutex::new(SlidingWindow::new(deep_rate_limit, deep_rate_window_ms)),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Deep-tier calls remaining in the current window.
    pub fn quota_remaining(&self, now_ms: u64) -> u32 {
        self.deep_quota.lock().expect("quota lock").remaining(now_ms)
    }

    /// When the next deep-tier slot frees up, if any are held.
    pub fn quota_reset_at(&self, now_ms: u64) -> Option<u64> {
        self.deep_quota.lock().expect("quota lock").reset_at(now_ms)
    }

    /// Which tiers are configured, for the status surface.
    pub fn services(&self) -> Vec<&'static str> {
        let mut services = vec![self.local.name()];
        if let Some(fast) = &self.fast {
            services.push(fast.name());
        }
        if let Some(deep) = &self.deep {
            services.push(deep.name());
        }
        services
    }

    /// Call the deep tier through the quota. `RateLimited` without a
    /// quota slot; the slot is consumed only when the call is attempted.
    fn call_deep(&self, input: &ClassifyInput, now_ms: u64) -> Result<ClassificationResult> {
        let deep = self
            .deep
            .as_ref()
            .ok_or_else(|| ClassifyError::Unsupported("deep tier not configured".into()))?;
        if !self.deep_quota.lock().expect("quota lock").try_acquire(now_ms) {
            return Err(ClassifyError::RateLimited);
        }
        let result = deep.classify(input);
        if matches!(result, Err(ClassifyError::Unreachable(_))) {
            // The request never reached the service; give the slot back.
            self.deep_quota.lock().expect("quota lock").refund();
        }
        result
    }

    fn call_fast(&self, input: &ClassifyInput) -> Result<ClassificationResult> {
        let fast = self
            .fast
            .as_ref()
            .ok_or_else(|| ClassifyError::Unsupported("fast tier not configured".into()))?;
        fast.classify(input)
    }

    /// Classify with the dispatcher's configured mode.
    pub fn classify(&self, input: &ClassifyInput, now_ms: u64) -> Result<Outcome> {
        self.classify_with(self.mode, input, now_ms)
    }

    /// Classify with an explicit mode override.
    pub fn classify_with(&self, mode: Mode, input: &ClassifyInput, now_ms: u64) -> Result<Outcome> {
        match mode {
            Mode::Local => self.local.classify(input).map(|result| Outcome {
                result,
                tier: Tier::Local,
                escalated: false,
                cloud_unreachable: false,
            }),
            Mode::Fast => self.fast_then_local(input),
            Mode::Deep => self.deep_chain(input, now_ms),
            Mode::Auto => self.auto(input, now_ms),
        }
    }

    /// Fast tier with local fallback.
    fn fast_then_local(&self, input: &ClassifyInput) -> Result<Outcome> {
        match self.call_fast(input) {
            Ok(result) => Ok(Outcome {
                result,
                tier: Tier::FastCloud,
                escalated: false,
                cloud_unreachable: false,
            }),
            Err(e) => {
                let unreachable = matches!(e, ClassifyError::Unreachable(_));
                tracing::warn!(error = %e, "fast tier failed, falling back to local");
                self.local.classify(input).map(|result| Outcome {
                    result,
                    tier: Tier::Local,
                    escalated: false,
                    cloud_unreachable: unreachable,
                })
            }
        }
    }

    /// Deep tier with the full fall-through chain: deep -> fast -> local.
    fn deep_chain(&self, input: &ClassifyInput, now_ms: u64) -> Result<Outcome> {
        match self.call_deep(input, now_ms) {
            Ok(result) => {
                return Ok(Outcome {
                    result,
                    tier: Tier::DeepCloud,
                    escalated: false,
                    cloud_unreachable: false,
                })
            }
            Err(e) => {
                let unreachable = matches!(e, ClassifyError::Unreachable(_));
                tracing::warn!(error = %e, "deep tier failed, falling through to fast");
                match self.call_fast(input) {
                    Ok(result) => {
                        return Ok(Outcome {
                            result,
                            tier: Tier::FastCloud,
                            escalated: false,
                            cloud_unreachable: unreachable,
                        })
                    }
                    Err(e2) => {
                        let unreachable =
                            unreachable || matches!(e2, ClassifyError::Unreachable(_));
                        tracing::warn!(error = %e2, "fast tier failed, falling through to local");
                        self.local.classify(input).map(|result| Outcome {
                            result,
                            tier: Tier::Local,
                            escalated: false,
                            cloud_unreachable: unreachable,
                        })
                    }
                }
            }
        }
    }

    /// Auto mode: fast first, deep only for weak or unknown verdicts.
    fn auto(&self, input: &ClassifyInput, now_ms: u64) -> Result<Outcome> {
        let fast_result = match self.call_fast(input) {
            Ok(result) => result,
            Err(e) => {
                let unreachable = matches!(e, ClassifyError::Unreachable(_));
                tracing::warn!(error = %e, "fast tier failed in auto mode");
                // Try the deep tier before surrendering to local.
                return match self.call_deep(input, now_ms) {
                    Ok(result) => Ok(Outcome {
                        result,
                        tier: Tier::DeepCloud,
                        escalated: true,
                        cloud_unreachable: false,
                    }),
                    Err(e2) => {
                        let unreachable =
                            unreachable || matches!(e2, ClassifyError::Unreachable(_));
                        self.local.classify(input).map(|result| Outcome {
                            result,
                            tier: Tier::Local,
                            escalated: false,
                            cloud_unreachable: unreachable,
                        })
                    }
                };
            }
        };

        let weak = fast_result.label == Label::Unknown
            || fast_result.confidence < ESCALATION_CONFIDENCE;
        if !weak {
            return Ok(Outcome {
                result: fast_result,
                tier: Tier::FastCloud,
                escalated: false,
                cloud_unreachable: false,
            });
        }

        match self.call_deep(input, now_ms) {
            Ok(mut deep_result) => {
                deep_result.reasoning = merge_reasoning(&fast_result, &deep_result);
                Ok(Outcome {
                    result: deep_result,
                    tier: Tier::DeepCloud,
                    escalated: true,
                    cloud_unreachable: false,
                })
            }
            Err(e) => {
                // Rate limited or unreachable: the fast verdict stands.
                let unreachable = matches!(e, ClassifyError::Unreachable(_));
                tracing::debug!(error = %e, "escalation unavailable, keeping fast verdict");
                Ok(Outcome {
                    result: fast_result,
                    tier: Tier::FastCloud,
                    escalated: false,
                    cloud_unreachable: unreachable,
                })
            }
        }
    }
}

fn merge_reasoning(
    fast: &ClassificationResult,
    deep: &ClassificationResult,
) -> Option<String> {
    match (&fast.reasoning, &deep.reasoning) {
        (Some(f), Some(d)) => Some(format!("fast: {f}; deep: {d}")),
        (None, Some(d)) => Some(d.clone()),
        (Some(f), None) => Some(format!("fast: {f}")),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guardian_types::Grid;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Scripted tier for dispatcher tests: counts calls and returns a
    /// fixed answer or error.
    struct ScriptedTier {
        name: &'static str,
        calls: Arc<AtomicU32>,
        verdict: std::result::Result<(Label, u8), fn() -> ClassifyError>,
    }

    impl ScriptedTier {
        fn ok(name: &'static str, label: Label, confidence: u8) -> (Box<dyn Classifier>, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Box::new(Self {
                    name,
                    calls: calls.clone(),
                    verdict: Ok((label, confidence)),
                }),
                calls,
            )
        }

        fn failing(name: &'static str, error: fn() -> ClassifyError) -> (Box<dyn Classifier>, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Box::new(Self {
                    name,
                    calls: calls.clone(),
                    verdict: Err(error),
                }),
                calls,
            )
        }
    }

    impl Classifier for ScriptedTier {
        fn name(&self) -> &'static str {
            self.name
        }

        fn classify(&self, _input: &ClassifyInput) -> Result<ClassificationResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.verdict {
                Ok((label, confidence)) => Ok(ClassificationResult::new(*label, *confidence)
                    .with_reasoning(format!("{} verdict", self.name))),
                Err(make) => Err(make()),
            }
        }
    }

    fn input() -> ClassifyInput {
        ClassifyInput {
            png: vec![0u8; 8],
            grid: Grid::new(),
        }
    }

    fn unreachable() -> ClassifyError {
        ClassifyError::Unreachable("no route".into())
    }

    #[test]
    fn test_auto_confident_fast_skips_deep() {
        let (fast, _) = ScriptedTier::ok("fast_cloud", Label::Chainsaw, 90);
        let (deep, deep_calls) = ScriptedTier::ok("deep_cloud", Label::Chainsaw, 95);
        let (local, _) = ScriptedTier::ok("local", Label::Natural, 50);
        let d = Dispatcher::new(Mode::Auto, local, Some(fast), Some(deep), 5, 900_000);

        let outcome = d.classify(&input(), 0).expect("classify");
        assert_eq!(outcome.tier, Tier::FastCloud);
        assert!(!outcome.escalated);
        assert_eq!(deep_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_auto_weak_fast_escalates() {
        let (fast, _) = ScriptedTier::ok("fast_cloud", Label::Unknown, 40);
        let (deep, deep_calls) = ScriptedTier::ok("deep_cloud", Label::Chainsaw, 88);
        let (local, _) = ScriptedTier::ok("local", Label::Natural, 50);
        let d = Dispatcher::new(Mode::Auto, local, Some(fast), Some(deep), 5, 900_000);

        let outcome = d.classify(&input(), 0).expect("classify");
        assert_eq!(outcome.tier, Tier::DeepCloud);
        assert!(outcome.escalated);
        assert_eq!(outcome.result.label, Label::Chainsaw);
        assert_eq!(deep_calls.load(Ordering::SeqCst), 1);
        // Merged reasoning carries both tiers.
        let reasoning = outcome.result.reasoning.expect("reasoning");
        assert!(reasoning.contains("fast:"));
        assert!(reasoning.contains("deep:"));
    }

    #[test]
    fn test_rate_limit_falls_back_to_fast_verdict() {
        let (fast, fast_calls) = ScriptedTier::ok("fast_cloud", Label::Unknown, 30);
        let (deep, deep_calls) = ScriptedTier::ok("deep_cloud", Label::Chainsaw, 95);
        let (local, _) = ScriptedTier::ok("local", Label::Natural, 50);
        let d = Dispatcher::new(Mode::Auto, local, Some(fast), Some(deep), 5, 900_000);

        // Five escalations exhaust the quota.
        for i in 0..5 {
            let outcome = d.classify(&input(), i * 1000).expect("classify");
            assert_eq!(outcome.tier, Tier::DeepCloud);
        }
        assert_eq!(d.quota_remaining(5000), 0);

        // The sixth gets the fast verdict; the deep counter is unchanged.
        let outcome = d.classify(&input(), 6000).expect("classify");
        assert_eq!(outcome.tier, Tier::FastCloud);
        assert!(!outcome.escalated);
        assert_eq!(deep_calls.load(Ordering::SeqCst), 5);
        assert_eq!(fast_calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_deep_mode_rate_limit_chain() {
        let (fast, _) = ScriptedTier::ok("fast_cloud", Label::Vehicle, 72);
        let (deep, _) = ScriptedTier::ok("deep_cloud", Label::Chainsaw, 95);
        let (local, _) = ScriptedTier::ok("local", Label::Natural, 50);
        let d = Dispatcher::new(Mode::Deep, local, Some(fast), Some(deep), 1, 900_000);

        let first = d.classify(&input(), 0).expect("classify");
        assert_eq!(first.tier, Tier::DeepCloud);

        // Quota gone: transparently falls through to fast.
        let second = d.classify(&input(), 1000).expect("classify");
        assert_eq!(second.tier, Tier::FastCloud);
        assert_eq!(second.result.label, Label::Vehicle);
    }

    #[test]
    fn test_offline_falls_to_local_and_flags_sync() {
        let (fast, _) = ScriptedTier::failing("fast_cloud", unreachable);
        let (deep, _) = ScriptedTier::failing("deep_cloud", unreachable);
        let (local, local_calls) = ScriptedTier::ok("local", Label::Chainsaw, 65);
        let d = Dispatcher::new(Mode::Auto, local, Some(fast), Some(deep), 5, 900_000);

        let outcome = d.classify(&input(), 0).expect("classify");
        assert_eq!(outcome.tier, Tier::Local);
        assert!(outcome.cloud_unreachable);
        assert_eq!(local_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_quota_not_consumed_without_attempt() {
        let (fast, _) = ScriptedTier::ok("fast_cloud", Label::Chainsaw, 90);
        let (deep, _) = ScriptedTier::ok("deep_cloud", Label::Chainsaw, 95);
        let (local, _) = ScriptedTier::ok("local", Label::Natural, 50);
        let d = Dispatcher::new(Mode::Auto, local, Some(fast), Some(deep), 5, 900_000);

        // Confident fast verdicts never touch the quota.
        for i in 0..20 {
            d.classify(&input(), i * 100).expect("classify");
        }
        assert_eq!(d.quota_remaining(10_000), 5);
    }

    #[test]
    fn test_quota_window_slides() {
        let (fast, _) = ScriptedTier::ok("fast_cloud", Label::Unknown, 10);
        let (deep, deep_calls) = ScriptedTier::ok("deep_cloud", Label::Chainsaw, 95);
        let (local, _) = ScriptedTier::ok("local", Label::Natural, 50);
        let d = Dispatcher::new(Mode::Auto, local, Some(fast), Some(deep), 2, 10_000);

        d.classify(&input(), 0).expect("classify");
        d.classify(&input(), 1000).expect("classify");
        d.classify(&input(), 2000).expect("classify"); // rate limited
        assert_eq!(deep_calls.load(Ordering::SeqCst), 2);

        // Window slid: the oldest slot freed.
        d.classify(&input(), 10_500).expect("classify");
        assert_eq!(deep_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_local_mode_only_local() {
        let (fast, fast_calls) = ScriptedTier::ok("fast_cloud", Label::Chainsaw, 90);
        let (local, local_calls) = ScriptedTier::ok("local", Label::Natural, 70);
        let d = Dispatcher::new(Mode::Local, local, Some(fast), None, 5, 900_000);

        let outcome = d.classify(&input(), 0).expect("classify");
        assert_eq!(outcome.tier, Tier::Local);
        assert_eq!(fast_calls.load(Ordering::SeqCst), 0);
        assert_eq!(local_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("auto".parse::<Mode>().expect("parse"), Mode::Auto);
        assert_eq!("DEEP".parse::<Mode>().expect("parse"), Mode::Deep);
        assert!("cosmic".parse::<Mode>().is_err());
    }
}
