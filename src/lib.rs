//! Hivemind Policy - Staged Rate Limit Descriptor Generation
//!
//! This crate turns a route's rate limit policy into the descriptors a proxy
//! sends to an Envoy-compatible rate limit service. Rules are grouped into
//! numbered stages; each rule's actions read request attributes and the rule
//! yields a descriptor only when every action contributes.

pub mod config;
pub mod error;
pub mod proto;
pub mod ratelimit;
