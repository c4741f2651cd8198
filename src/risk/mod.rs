// =============================================================================
// Risk primitives — CircuitBreaker and PositionSizer (spec §4.5/§4.6)
// =============================================================================

pub mod circuit_breaker;
pub mod position_sizer;

pub use circuit_breaker::CircuitBreaker;
pub use position_sizer::PositionSizer;
