//! Agent Host & Lifecycle (§4.7): starts, stops, lists, and resumes the
//! in-process built-in agents running against the store/bus/scheduler.

pub mod host;

pub use host::AgentHost;
