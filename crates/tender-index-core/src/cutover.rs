//! Cutover configuration and migration-mode resolution.
//!
//! A *capability* is a named, independently migratable unit of behavior
//! (retrieval, ingestion, ...). Each capability runs in one of four
//! migration modes of increasing commitment to the new implementation.
//! [`CutoverConfig`] is loaded once at startup from environment-style
//! key/value pairs, is immutable afterwards, and is shared as an
//! `Arc<CutoverConfig>`; resolution is read-only and lock-free.
//!
//! Resolution precedence for `(capability, tenant)`:
//!
//! 1. Request-scoped forced mode, honored only when
//!    `DEBUG_MODE_OVERRIDE_ENABLED=true` (testing/tooling, never production
//!    traffic). Carried in an explicit [`RequestContext`], never in
//!    thread-local state.
//! 2. Tenant override from `CUTOVER_TENANT_OVERRIDES`, checked
//!    `NEW_ONLY > PREFER_NEW > SHADOW`. A tenant appearing in several
//!    lists is operator error; the most-committed mode wins deterministically.
//! 3. The capability's global default (`<CAPABILITY>_MODE`, default `OLD`).

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use crate::errors::CutoverError;

/// The fixed set of migratable capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Retrieval,
    Ingest,
    Extract,
    Review,
    Rules,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::Retrieval,
        Capability::Ingest,
        Capability::Extract,
        Capability::Review,
        Capability::Rules,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Retrieval => "retrieval",
            Capability::Ingest => "ingest",
            Capability::Extract => "extract",
            Capability::Review => "review",
            Capability::Rules => "rules",
        }
    }

    /// The environment key holding this capability's global default mode,
    /// e.g. `RETRIEVAL_MODE`.
    pub fn env_key(&self) -> String {
        format!("{}_MODE", self.as_str().to_uppercase())
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Capability {
    type Err = CutoverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "retrieval" => Ok(Capability::Retrieval),
            "ingest" => Ok(Capability::Ingest),
            "extract" => Ok(Capability::Extract),
            "review" => Ok(Capability::Review),
            "rules" => Ok(Capability::Rules),
            other => Err(CutoverError::UnknownCapability(other.to_string())),
        }
    }
}

/// Migration mode — a total order of increasing commitment to the new
/// implementation. The derived `Ord` follows declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationMode {
    /// Only the legacy path executes.
    Old,
    /// Legacy is authoritative; new runs detached, diffs are recorded,
    /// new-path failures are swallowed.
    Shadow,
    /// New runs first; legacy is the one-shot fallback on failure.
    PreferNew,
    /// Only the new path executes; failure is terminal.
    NewOnly,
}

impl MigrationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationMode::Old => "OLD",
            MigrationMode::Shadow => "SHADOW",
            MigrationMode::PreferNew => "PREFER_NEW",
            MigrationMode::NewOnly => "NEW_ONLY",
        }
    }
}

impl std::fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MigrationMode {
    type Err = CutoverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OLD" => Ok(MigrationMode::Old),
            "SHADOW" => Ok(MigrationMode::Shadow),
            "PREFER_NEW" => Ok(MigrationMode::PreferNew),
            "NEW_ONLY" => Ok(MigrationMode::NewOnly),
            other => Err(CutoverError::UnknownMode(other.to_string())),
        }
    }
}

/// Which rule produced the resolved mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionRule {
    RequestOverride,
    TenantOverride,
    GlobalDefault,
}

impl std::fmt::Display for ResolutionRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionRule::RequestOverride => write!(f, "request_override"),
            ResolutionRule::TenantOverride => write!(f, "tenant_override"),
            ResolutionRule::GlobalDefault => write!(f, "global_default"),
        }
    }
}

/// The outcome of a mode resolution, with the rule that fired — enough for
/// the `/debug/cutover` introspection endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolved {
    pub mode: MigrationMode,
    pub rule: ResolutionRule,
}

/// Per-request state, threaded explicitly through the call chain.
///
/// `force_mode` is set from the `X-Force-Mode` header by the debug server
/// and must never leak across requests; constructing a fresh context per
/// request is the caller's job.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestContext {
    pub force_mode: Option<MigrationMode>,
}

impl RequestContext {
    pub fn forced(mode: MigrationMode) -> Self {
        Self {
            force_mode: Some(mode),
        }
    }
}

/// Process-wide cutover configuration. Immutable after load.
#[derive(Debug, Clone, Default)]
pub struct CutoverConfig {
    defaults: HashMap<Capability, MigrationMode>,
    overrides: HashMap<Capability, HashMap<MigrationMode, HashSet<String>>>,
    debug_override_enabled: bool,
}

/// Override-check order: most-committed mode wins.
const OVERRIDE_PRECEDENCE: [MigrationMode; 3] = [
    MigrationMode::NewOnly,
    MigrationMode::PreferNew,
    MigrationMode::Shadow,
];

impl CutoverConfig {
    /// Build from a captured environment map. Pure, for testability;
    /// the application calls [`CutoverConfig::from_env`].
    ///
    /// Recognized keys: `<CAPABILITY>_MODE` per capability,
    /// `CUTOVER_TENANT_OVERRIDES` (JSON `{capability: {mode: [tenant,..]}}`),
    /// and `DEBUG_MODE_OVERRIDE_ENABLED`.
    pub fn from_env_map(vars: &HashMap<String, String>) -> Result<Self, CutoverError> {
        let mut defaults = HashMap::new();
        for cap in Capability::ALL {
            let mode = match vars.get(&cap.env_key()) {
                Some(raw) => raw.parse::<MigrationMode>()?,
                None => MigrationMode::Old,
            };
            defaults.insert(cap, mode);
        }

        let mut overrides: HashMap<Capability, HashMap<MigrationMode, HashSet<String>>> =
            HashMap::new();
        if let Some(raw) = vars.get("CUTOVER_TENANT_OVERRIDES") {
            if !raw.trim().is_empty() {
                let parsed: HashMap<String, HashMap<String, Vec<String>>> =
                    serde_json::from_str(raw)
                        .map_err(|e| CutoverError::InvalidOverrides(e.to_string()))?;
                for (cap_name, by_mode) in parsed {
                    let cap = cap_name.parse::<Capability>()?;
                    let entry = overrides.entry(cap).or_default();
                    for (mode_name, tenants) in by_mode {
                        let mode = mode_name.parse::<MigrationMode>()?;
                        if mode == MigrationMode::Old {
                            return Err(CutoverError::InvalidOverrides(format!(
                                "capability '{}' lists an OLD override; OLD is the \
                                 implicit default and cannot be an override target",
                                cap
                            )));
                        }
                        entry.entry(mode).or_default().extend(tenants);
                    }
                }
            }
        }

        let debug_override_enabled = vars
            .get("DEBUG_MODE_OVERRIDE_ENABLED")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            defaults,
            overrides,
            debug_override_enabled,
        })
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self, CutoverError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_env_map(&vars)
    }

    /// Whether request-scoped forced modes (`X-Force-Mode`) are honored.
    pub fn debug_override_enabled(&self) -> bool {
        self.debug_override_enabled
    }

    /// The global default mode for a capability.
    pub fn global_mode(&self, capability: Capability) -> MigrationMode {
        self.defaults
            .get(&capability)
            .copied()
            .unwrap_or(MigrationMode::Old)
    }

    /// The tenant's override mode for a capability, if any, respecting the
    /// `NEW_ONLY > PREFER_NEW > SHADOW` precedence.
    pub fn tenant_override(&self, capability: Capability, tenant_id: &str) -> Option<MigrationMode> {
        let by_mode = self.overrides.get(&capability)?;
        for mode in OVERRIDE_PRECEDENCE {
            if let Some(tenants) = by_mode.get(&mode) {
                if tenants.contains(tenant_id) {
                    return Some(mode);
                }
            }
        }
        None
    }

    /// Resolve the effective mode for `(capability, tenant)`.
    ///
    /// Read-only and side-effect free; safe to call at high frequency.
    pub fn resolve(
        &self,
        capability: Capability,
        tenant_id: &str,
        request: &RequestContext,
    ) -> Resolved {
        if self.debug_override_enabled {
            if let Some(mode) = request.force_mode {
                return Resolved {
                    mode,
                    rule: ResolutionRule::RequestOverride,
                };
            }
        }

        if let Some(mode) = self.tenant_override(capability, tenant_id) {
            return Resolved {
                mode,
                rule: ResolutionRule::TenantOverride,
            };
        }

        Resolved {
            mode: self.global_mode(capability),
            rule: ResolutionRule::GlobalDefault,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_to_old() {
        let cfg = CutoverConfig::from_env_map(&env(&[])).unwrap();
        for cap in Capability::ALL {
            assert_eq!(cfg.global_mode(cap), MigrationMode::Old);
        }
        assert!(!cfg.debug_override_enabled());
    }

    #[test]
    fn test_global_mode_from_env() {
        let cfg = CutoverConfig::from_env_map(&env(&[
            ("RETRIEVAL_MODE", "PREFER_NEW"),
            ("INGEST_MODE", "shadow"),
        ]))
        .unwrap();
        assert_eq!(cfg.global_mode(Capability::Retrieval), MigrationMode::PreferNew);
        assert_eq!(cfg.global_mode(Capability::Ingest), MigrationMode::Shadow);
        assert_eq!(cfg.global_mode(Capability::Extract), MigrationMode::Old);
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let err = CutoverConfig::from_env_map(&env(&[("RETRIEVAL_MODE", "CANARY")]));
        assert!(matches!(err, Err(CutoverError::UnknownMode(_))));
    }

    #[test]
    fn test_unknown_capability_in_overrides_rejected() {
        let err = CutoverConfig::from_env_map(&env(&[(
            "CUTOVER_TENANT_OVERRIDES",
            r#"{"billing": {"SHADOW": ["t1"]}}"#,
        )]));
        assert!(matches!(err, Err(CutoverError::UnknownCapability(_))));
    }

    #[test]
    fn test_old_override_rejected() {
        let err = CutoverConfig::from_env_map(&env(&[(
            "CUTOVER_TENANT_OVERRIDES",
            r#"{"retrieval": {"OLD": ["t1"]}}"#,
        )]));
        assert!(matches!(err, Err(CutoverError::InvalidOverrides(_))));
    }

    #[test]
    fn test_tenant_override_beats_global() {
        let cfg = CutoverConfig::from_env_map(&env(&[
            ("RETRIEVAL_MODE", "OLD"),
            (
                "CUTOVER_TENANT_OVERRIDES",
                r#"{"retrieval": {"PREFER_NEW": ["acme"]}}"#,
            ),
        ]))
        .unwrap();

        let r = cfg.resolve(Capability::Retrieval, "acme", &RequestContext::default());
        assert_eq!(r.mode, MigrationMode::PreferNew);
        assert_eq!(r.rule, ResolutionRule::TenantOverride);

        let other = cfg.resolve(Capability::Retrieval, "other", &RequestContext::default());
        assert_eq!(other.mode, MigrationMode::Old);
        assert_eq!(other.rule, ResolutionRule::GlobalDefault);
    }

    #[test]
    fn test_overlapping_overrides_pick_most_committed() {
        // Tenant listed under both SHADOW and PREFER_NEW: operator error,
        // must not crash, PREFER_NEW wins every time.
        let cfg = CutoverConfig::from_env_map(&env(&[(
            "CUTOVER_TENANT_OVERRIDES",
            r#"{"retrieval": {"SHADOW": ["dup"], "PREFER_NEW": ["dup"]}}"#,
        )]))
        .unwrap();

        for _ in 0..10 {
            let r = cfg.resolve(Capability::Retrieval, "dup", &RequestContext::default());
            assert_eq!(r.mode, MigrationMode::PreferNew);
        }
    }

    #[test]
    fn test_new_only_beats_prefer_new_override() {
        let cfg = CutoverConfig::from_env_map(&env(&[(
            "CUTOVER_TENANT_OVERRIDES",
            r#"{"ingest": {"PREFER_NEW": ["dup"], "NEW_ONLY": ["dup"]}}"#,
        )]))
        .unwrap();
        let r = cfg.resolve(Capability::Ingest, "dup", &RequestContext::default());
        assert_eq!(r.mode, MigrationMode::NewOnly);
    }

    #[test]
    fn test_request_override_requires_debug_flag() {
        let disabled = CutoverConfig::from_env_map(&env(&[])).unwrap();
        let forced = RequestContext::forced(MigrationMode::NewOnly);
        let r = disabled.resolve(Capability::Retrieval, "t1", &forced);
        assert_eq!(r.mode, MigrationMode::Old);
        assert_eq!(r.rule, ResolutionRule::GlobalDefault);

        let enabled =
            CutoverConfig::from_env_map(&env(&[("DEBUG_MODE_OVERRIDE_ENABLED", "true")])).unwrap();
        let r = enabled.resolve(Capability::Retrieval, "t1", &forced);
        assert_eq!(r.mode, MigrationMode::NewOnly);
        assert_eq!(r.rule, ResolutionRule::RequestOverride);
    }

    #[test]
    fn test_mode_ordering() {
        assert!(MigrationMode::Old < MigrationMode::Shadow);
        assert!(MigrationMode::Shadow < MigrationMode::PreferNew);
        assert!(MigrationMode::PreferNew < MigrationMode::NewOnly);
    }

    #[test]
    fn test_capability_roundtrip() {
        for cap in Capability::ALL {
            assert_eq!(cap.as_str().parse::<Capability>().unwrap(), cap);
        }
        assert!("billing".parse::<Capability>().is_err());
    }

    #[test]
    fn test_mode_roundtrip() {
        for mode in [
            MigrationMode::Old,
            MigrationMode::Shadow,
            MigrationMode::PreferNew,
            MigrationMode::NewOnly,
        ] {
            assert_eq!(mode.as_str().parse::<MigrationMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_env_key() {
        assert_eq!(Capability::Retrieval.env_key(), "RETRIEVAL_MODE");
        assert_eq!(Capability::Ingest.env_key(), "INGEST_MODE");
    }
}
