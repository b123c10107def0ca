//! Rate limit policy construction and descriptor generation.

mod action;
mod context;
mod descriptor;
mod entry;
mod limit;
mod matcher;
mod metadata;
mod policy;
pub mod rules;
mod store;

pub use action::Action;
pub use context::{RequestAttributes, RequestContext};
pub use descriptor::{Descriptor, DescriptorEntry, PolicyDescriptor};
pub use entry::{RateLimitPolicyEntry, MAX_STAGE_NUMBER};
pub use limit::{EffectiveLimit, Limit, LimitOverride, TimeUnit};
pub use matcher::{HeaderMatch, HeaderMatcher};
pub use metadata::{MetadataKey, PathSegment};
pub use policy::RateLimitPolicy;
pub use rules::RateLimitConfig;
pub use store::PolicyStore;
