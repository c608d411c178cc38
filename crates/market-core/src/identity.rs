//! # Identity Newtypes
//!
//! UUID-backed identifiers for every record the marketplace owns or
//! references. Each identifier is a distinct type and always valid by
//! construction; parsing from text validates the UUID format.
//!
//! Identifiers serialize transparently as their UUID string so API
//! payloads and database rows carry plain UUIDs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Access the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Parse an identifier from its UUID string form.
            ///
            /// # Errors
            ///
            /// Returns [`ValidationError::InvalidId`] if the string is not a UUID.
            pub fn parse(s: &str) -> Result<Self, ValidationError> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|_| ValidationError::InvalidId(s.to_string()))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_identifier!(
    /// A unique identifier for a dispute.
    DisputeId
);

uuid_identifier!(
    /// A unique identifier for a resolution proposal attached to a dispute.
    ProposalId
);

uuid_identifier!(
    /// A unique identifier for the job/contract a dispute is filed against.
    JobId
);

uuid_identifier!(
    /// A unique identifier for a marketplace user (client, professional or
    /// administrator).
    UserId
);

uuid_identifier!(
    /// A unique identifier for an early-warning record.
    EarlyWarningId
);

uuid_identifier!(
    /// A unique identifier for an outbound notification.
    NotificationId
);
