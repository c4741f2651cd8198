// =============================================================================
// Agents — the fixed set of cooperating agents wired around one EventBus
// =============================================================================
//
// Per the source's cyclic-reference note: agents need the bus (already
// universe-bound) and the broker, never the Coordinator. Each agent owns one
// scheduling task where it is periodic; reactive agents instead register
// handlers on the bus in `start()` and unregister in `stop()`.
// =============================================================================

pub mod alert_agent;
pub mod analytics_agent;
pub mod data_agent;
pub mod execution_agent;
pub mod monitor_agent;
pub mod observability_agent;
pub mod risk_agent;
pub mod signal_agent;

pub use alert_agent::AlertAgent;
pub use analytics_agent::AnalyticsAgent;
pub use data_agent::DataAgent;
pub use execution_agent::ExecutionAgent;
pub use monitor_agent::MonitorAgent;
pub use observability_agent::ObservabilityAgent;
pub use risk_agent::RiskAgent;
pub use signal_agent::SignalAgent;

use crate::events::Provenance;
use crate::universe::UniverseContext;

/// Shorthand used by every agent to stamp outgoing events.
pub(crate) fn provenance(ctx: &UniverseContext, source: &str) -> Provenance {
    Provenance::new(ctx, source)
}
