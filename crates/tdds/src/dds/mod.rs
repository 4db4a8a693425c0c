// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # DDS Core API
//!
//! The primary DDS API: entities, QoS-aware endpoints, conditions and
//! waitsets.
//!
//! ## Entity Hierarchy
//!
//! ```text
//! DomainParticipant
//! +-- Publisher
//! |   +-- DataWriter  ------> Topic
//! +-- Subscriber
//!     +-- DataReader  <------ Topic
//! ```
//!
//! Entities are created *disabled* and advertised by discovery only after
//! `enable`. Deletion is hierarchical: deleting a participant tears down
//! everything it contains after the configured purge delay.

/// Status/guard conditions.
pub mod condition;
/// Entity flags, handles and the generation-checked handle store.
pub mod entity;
/// Content filter expression parser and evaluator.
pub mod filter;
/// Listener traits for callback-based notifications.
pub mod listener;
/// DomainParticipant and its builder.
pub mod participant;
/// Publisher grouping entity.
pub mod publisher;
/// Read/query conditions and state masks.
pub mod read_condition;
/// DataReader endpoint.
pub mod reader;
/// Communication status structures.
pub mod status;
/// Subscriber grouping entity.
pub mod subscriber;
/// Topic entity.
pub mod topic;
/// WaitSet blocking notification.
pub mod waitset;
/// DataWriter endpoint.
pub mod writer;

pub use condition::{Condition, GuardCondition, StatusCondition};
pub use entity::{EntityFlags, InstanceHandle};
pub use filter::{ContentFilter, FieldValue, FilterError};
pub use listener::{DataReaderListener, DataWriterListener, ParticipantListener};
pub use participant::{DomainParticipant, ParticipantBuilder};
pub use publisher::Publisher;
pub use read_condition::{
    InstanceStateMask, QueryCondition, ReadCondition, SampleStateMask, ViewStateMask,
};
pub use reader::{DataReader, Sample, SampleInfo};
pub use status::{
    LivelinessChangedStatus, OfferedIncompatibleQosStatus, PublicationMatchedStatus,
    RequestedIncompatibleQosStatus, SampleLostStatus, SampleRejectedReason, SampleRejectedStatus,
    StatusKind, StatusMask, SubscriptionMatchedStatus,
};
pub use subscriber::Subscriber;
pub use topic::Topic;
pub use waitset::WaitSet;
pub use writer::DataWriter;

pub use crate::qos::Qos;

use crate::xtypes::{DynamicValue, TypeDescriptor};

/// Errors returned by TDDS operations.
///
/// The variants mirror the DDS return-code taxonomy; everything a public
/// API can report is one of these.
#[derive(Debug)]
pub enum Error {
    /// Generic failure (prefer a specific variant).
    Generic(String),
    /// Requested feature or operation is not supported.
    Unsupported,
    /// An argument was invalid (range, null-equivalent, malformed).
    BadParameter(String),
    /// The entity is not in a state that permits the operation.
    PreconditionNotMet(String),
    /// A pool or resource limit was exhausted.
    OutOfResources,
    /// The entity has not been enabled yet.
    NotEnabled,
    /// Attempt to change a policy that is immutable after enable.
    ImmutablePolicy,
    /// The QoS record is internally inconsistent.
    InconsistentPolicy(String),
    /// The entity was already deleted (stale handle).
    AlreadyDeleted,
    /// A blocking operation reached its deadline.
    Timeout,
    /// No data available to read or take.
    NoData,
    /// Operation invoked from an illegal context (e.g. listener re-entry).
    IllegalOperation,
    /// I/O error with underlying cause.
    IoError(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Generic(msg) => write!(f, "Error: {}", msg),
            Error::Unsupported => write!(f, "Unsupported operation"),
            Error::BadParameter(msg) => write!(f, "Bad parameter: {}", msg),
            Error::PreconditionNotMet(msg) => write!(f, "Precondition not met: {}", msg),
            Error::OutOfResources => write!(f, "Out of resources"),
            Error::NotEnabled => write!(f, "Entity not enabled"),
            Error::ImmutablePolicy => write!(f, "Policy is immutable once enabled"),
            Error::InconsistentPolicy(msg) => write!(f, "Inconsistent policy: {}", msg),
            Error::AlreadyDeleted => write!(f, "Entity already deleted"),
            Error::Timeout => write!(f, "Timeout"),
            Error::NoData => write!(f, "No data"),
            Error::IllegalOperation => write!(f, "Illegal operation"),
            Error::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e)
    }
}

/// Convenient alias for API results using the public `Error` type.
pub type Result<T> = core::result::Result<T, Error>;

/// Contract between application data types and the middleware.
///
/// Types either implement this directly or go through the dynamic path
/// (`DynamicValue` + a registered `TypeDescriptor`).
pub trait DdsData: Send + Sync + 'static {
    /// The registered type descriptor.
    fn type_descriptor(&self) -> &TypeDescriptor;

    /// Convert to the dynamic representation for serialization.
    fn to_dynamic(&self) -> DynamicValue;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(Error::Timeout.to_string(), "Timeout");
        assert_eq!(
            Error::BadParameter("lease_duration == 0".into()).to_string(),
            "Bad parameter: lease_duration == 0"
        );
    }

    #[test]
    fn test_io_error_source() {
        use std::error::Error as _;
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(err.source().is_some());
        assert!(Error::NoData.source().is_none());
    }
}
