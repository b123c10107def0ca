//! Wire messages for `envoy.extensions.common.ratelimit.v3`.
//!
//! Only the descriptor side of the rate limit API is modelled here; these are
//! the messages a quota client attaches to a `RateLimitRequest`.

/// A list of hierarchical entries identifying one rate limit counter, with an
/// optional limit override for the rate limit service to apply.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RateLimitDescriptor {
    /// Descriptor entries.
    #[prost(message, repeated, tag = "1")]
    pub entries: ::prost::alloc::vec::Vec<rate_limit_descriptor::Entry>,
    /// Optional rate limit override to supply to the ratelimit service.
    #[prost(message, optional, tag = "2")]
    pub limit: ::core::option::Option<rate_limit_descriptor::RateLimitOverride>,
}

/// Nested message types in `RateLimitDescriptor`.
pub mod rate_limit_descriptor {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Entry {
        /// Descriptor key.
        #[prost(string, tag = "1")]
        pub key: ::prost::alloc::string::String,
        /// Descriptor value.
        #[prost(string, tag = "2")]
        pub value: ::prost::alloc::string::String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct RateLimitOverride {
        /// The number of requests per unit of time.
        #[prost(uint32, tag = "1")]
        pub requests_per_unit: u32,
        /// The unit of time.
        #[prost(enumeration = "super::RateLimitUnit", tag = "2")]
        pub unit: i32,
    }
}

/// `envoy.type.v3.RateLimitUnit`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum RateLimitUnit {
    Unknown = 0,
    Second = 1,
    Minute = 2,
    Hour = 3,
    Day = 4,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_descriptor_encodes_and_decodes() {
        let descriptor = RateLimitDescriptor {
            entries: vec![rate_limit_descriptor::Entry {
                key: "generic_key".to_string(),
                value: "foo".to_string(),
            }],
            limit: Some(rate_limit_descriptor::RateLimitOverride {
                requests_per_unit: 5,
                unit: RateLimitUnit::Minute as i32,
            }),
        };

        let bytes = descriptor.encode_to_vec();
        let decoded = RateLimitDescriptor::decode(bytes.as_slice()).unwrap();

        assert_eq!(decoded, descriptor);
        assert_eq!(decoded.limit.unwrap().unit(), RateLimitUnit::Minute);
    }
}
