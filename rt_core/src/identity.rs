//! Opaque routing identities. Case-sensitive, non-empty by convention but
//! not enforced by the type itself — the Host-header boundary behavior
//! explicitly allows an empty identity to parse and flow through to a
//! pool lookup that then simply misses.

use std::fmt;

macro_rules! identity_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                $name(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                $name(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_string())
            }
        }
    };
}

identity_newtype!(NodeIdentity);
identity_newtype!(ClusterIdentity);
identity_newtype!(TenantIdentity);
