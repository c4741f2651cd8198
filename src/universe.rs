// =============================================================================
// Universe — execution reality and its immutable provenance record
// =============================================================================
//
// A Universe is never toggled in place. Every universe-bound component
// (broker, event bus, analytics store) is constructed for exactly one
// Universe and lives only as long as that binding does; switching universes
// means tearing the old components down and building new ones (see
// `crate::app_state`).
// =============================================================================

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trust tier of a metric recorded under a given universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidityClass {
    LiveVerified,
    PaperOnly,
    SimValidForTraining,
    SimInvalidForTraining,
}

/// Execution reality: the set of realities a Coordinator can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Universe {
    Live,
    Paper,
    Simulation,
}

impl Universe {
    /// True only for `Live` — the only universe where orders touch real capital.
    pub fn is_real_capital(self) -> bool {
        matches!(self, Universe::Live)
    }

    /// True only for `Simulation` — the only universe allowed to bypass
    /// market-hours checks (so a sim can run 24/7 against synthetic data).
    pub fn allows_market_hours_override(self) -> bool {
        matches!(self, Universe::Simulation)
    }

    /// True only for `Live` — callers that drive a destructive transition
    /// into this universe should require an explicit operator confirmation
    /// before doing so.
    pub fn requires_explicit_confirmation(self) -> bool {
        matches!(self, Universe::Live)
    }

    /// Default trust tier assigned to metrics recorded under this universe.
    pub fn default_validity_class(self) -> ValidityClass {
        match self {
            Universe::Live => ValidityClass::LiveVerified,
            Universe::Paper => ValidityClass::PaperOnly,
            Universe::Simulation => ValidityClass::SimValidForTraining,
        }
    }
}

impl fmt::Display for Universe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Universe::Live => "live",
            Universe::Paper => "paper",
            Universe::Simulation => "simulation",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseUniverseError(pub String);

impl fmt::Display for ParseUniverseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown universe: '{}'", self.0)
    }
}

impl std::error::Error for ParseUniverseError {}

impl FromStr for Universe {
    type Err = ParseUniverseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "live" => Ok(Universe::Live),
            "paper" => Ok(Universe::Paper),
            "simulation" | "sim" => Ok(Universe::Simulation),
            other => Err(ParseUniverseError(other.to_string())),
        }
    }
}

// =============================================================================
// UniverseContext
// =============================================================================

/// Immutable provenance record carried through the system for one
/// Coordinator lifetime. Replaced only by a destructive transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseContext {
    pub universe: Universe,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub data_lineage_id: String,
    pub validity_class: ValidityClass,
}

impl UniverseContext {
    /// Construct a new context, generating a fresh `session_id`.
    pub fn new(universe: Universe) -> Self {
        Self::with_lineage(universe, generate_session_id(), String::new())
    }

    /// Construct with an explicit lineage id (e.g. replay/backtest provenance).
    pub fn with_lineage(universe: Universe, session_id: String, data_lineage_id: String) -> Self {
        Self {
            universe,
            session_id,
            created_at: Utc::now(),
            data_lineage_id,
            validity_class: universe.default_validity_class(),
        }
    }

    pub fn data_path(&self, filename: &str) -> std::path::PathBuf {
        data_path(self.universe, filename)
    }

    pub fn log_path(&self, filename: &str) -> std::path::PathBuf {
        log_path(self.universe, filename)
    }
}

/// `data/<universe>/<filename>`
pub fn data_path(universe: Universe, filename: &str) -> std::path::PathBuf {
    std::path::PathBuf::from("data").join(universe.to_string()).join(filename)
}

/// `logs/<universe>/<filename>`
pub fn log_path(universe: Universe, filename: &str) -> std::path::PathBuf {
    std::path::PathBuf::from("logs").join(universe.to_string()).join(filename)
}

/// `data/shared/<filename>` — universe-agnostic shared data (sector map,
/// cached historical bars).
pub fn shared_data_path(filename: &str) -> std::path::PathBuf {
    std::path::PathBuf::from("data").join("shared").join(filename)
}

/// `session_<UTC-YYYYMMDD_HHMMSS>_<8-hex>` — matches the source's literal
/// strftime format (underscore before the time component, not a dash).
fn generate_session_id() -> String {
    let now = Utc::now();
    let stamp = now.format("%Y%m%d_%H%M%S");
    let hex = Uuid::new_v4().simple().to_string();
    format!("session_{stamp}_{}", &hex[..8])
}

// =============================================================================
// Destructive transition metadata
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionMetadata {
    pub from_universe: Universe,
    pub to_universe: Universe,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub transition_id: String,
    pub warning: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoOpTransitionError(pub Universe);

impl fmt::Display for NoOpTransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transition from {0} to {0} is not a valid destructive transition", self.0)
    }
}

impl std::error::Error for NoOpTransitionError {}

/// Validate and describe a destructive universe transition. Never performs
/// the transition itself — that is AppState's job (§4.13).
pub fn validate_universe_transition(
    from: Universe,
    to: Universe,
    reason: &str,
) -> Result<TransitionMetadata, NoOpTransitionError> {
    if from == to {
        return Err(NoOpTransitionError(from));
    }

    let warning = if to.is_real_capital() {
        format!("transitioning into {to} binds this process to real capital; verify before proceeding")
    } else {
        format!("transitioning from {from} to {to} discards all in-memory state for {from}")
    };

    Ok(TransitionMetadata {
        from_universe: from,
        to_universe: to,
        reason: reason.to_string(),
        timestamp: Utc::now(),
        transition_id: Uuid::new_v4().to_string(),
        warning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_is_real_capital_only() {
        assert!(Universe::Live.is_real_capital());
        assert!(!Universe::Paper.is_real_capital());
        assert!(!Universe::Simulation.is_real_capital());
    }

    #[test]
    fn only_simulation_allows_market_hours_override() {
        assert!(Universe::Simulation.allows_market_hours_override());
        assert!(!Universe::Live.allows_market_hours_override());
        assert!(!Universe::Paper.allows_market_hours_override());
    }

    #[test]
    fn default_validity_classes() {
        assert_eq!(Universe::Live.default_validity_class(), ValidityClass::LiveVerified);
        assert_eq!(Universe::Paper.default_validity_class(), ValidityClass::PaperOnly);
        assert_eq!(
            Universe::Simulation.default_validity_class(),
            ValidityClass::SimValidForTraining
        );
    }

    #[test]
    fn from_str_is_case_insensitive() {
        assert_eq!("LIVE".parse::<Universe>().unwrap(), Universe::Live);
        assert_eq!("Paper".parse::<Universe>().unwrap(), Universe::Paper);
        assert_eq!("sim".parse::<Universe>().unwrap(), Universe::Simulation);
        assert!("nonsense".parse::<Universe>().is_err());
    }

    #[test]
    fn session_id_matches_expected_shape() {
        let ctx = UniverseContext::new(Universe::Simulation);
        assert!(ctx.session_id.starts_with("session_"));
        assert_eq!(ctx.session_id.len(), "session_".len() + "20260101_120000".len() + 1 + 8);
    }

    #[test]
    fn transition_rejects_no_op() {
        let err = validate_universe_transition(Universe::Paper, Universe::Paper, "noop").unwrap_err();
        assert_eq!(err.0, Universe::Paper);
    }

    #[test]
    fn transition_carries_audit_fields() {
        let meta = validate_universe_transition(Universe::Simulation, Universe::Paper, "promote").unwrap();
        assert_eq!(meta.from_universe, Universe::Simulation);
        assert_eq!(meta.to_universe, Universe::Paper);
        assert_eq!(meta.reason, "promote");
        assert!(!meta.transition_id.is_empty());
    }

    #[test]
    fn data_and_log_paths_are_universe_scoped() {
        assert_eq!(data_path(Universe::Live, "x.json"), std::path::PathBuf::from("data/live/x.json"));
        assert_eq!(log_path(Universe::Paper, "y.jsonl"), std::path::PathBuf::from("logs/paper/y.jsonl"));
        assert_eq!(shared_data_path("sector_map.json"), std::path::PathBuf::from("data/shared/sector_map.json"));
    }
}
