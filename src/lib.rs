// =============================================================================
// Meridian Equity Engine
// =============================================================================
//
// An autonomous, multi-agent trading decision engine for Indian cash
// equities.  On a fixed cadence the supervisor walks four stages per cycle:
//
//   Market Snapshot -> Strategy -> Risk -> Execution
//
// with a reflection side-channel every N executed trades.  Brokers are
// injected behind the `broker::Broker` capability trait; the in-process
// paper broker fills orders at the prices the snapshot stage observed.

pub mod agent;
pub mod broker;
pub mod execution;
pub mod indicators;
pub mod market_data;
pub mod message;
pub mod predict;
pub mod reflection;
pub mod regime;
pub mod risk;
pub mod runtime_config;
pub mod strategy;
pub mod supervisor;
pub mod traps;
pub mod types;
