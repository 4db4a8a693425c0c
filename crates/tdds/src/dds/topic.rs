// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic entity.
//!
//! A named channel binding a type name (and optionally a registered
//! descriptor) to a QoS record. Topics are refcounted by the endpoints
//! using them plus one reference per remote discovery; the participant
//! refuses to delete a topic that still has users.

use super::{Error, Result};
use crate::core::strtab::InternedStr;
use crate::qos::Qos;
use crate::xtypes::TypeDescriptor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Maximum topic name length.
pub const MAX_TOPIC_NAME: usize = 256;

/// A topic.
pub struct Topic {
    name: InternedStr,
    type_name: InternedStr,
    descriptor: Option<Arc<TypeDescriptor>>,
    qos: Arc<Qos>,
    /// Local endpoints + remote discovery references.
    refs: AtomicU32,
}

impl Topic {
    /// Validate and build. Fails on empty or oversized names.
    pub fn new(
        name: InternedStr,
        type_name: InternedStr,
        descriptor: Option<Arc<TypeDescriptor>>,
        qos: Arc<Qos>,
    ) -> Result<Self> {
        if name.as_str().is_empty() || name.as_str().len() > MAX_TOPIC_NAME {
            return Err(Error::BadParameter(format!(
                "topic name length must be 1..={}",
                MAX_TOPIC_NAME
            )));
        }
        if type_name.as_str().is_empty() {
            return Err(Error::BadParameter("type name must not be empty".into()));
        }
        if let Some(desc) = &descriptor {
            if desc.name != type_name.as_str() {
                return Err(Error::InconsistentPolicy(format!(
                    "descriptor '{}' does not match type name '{}'",
                    desc.name,
                    type_name.as_str()
                )));
            }
        }
        Ok(Topic {
            name,
            type_name,
            descriptor,
            qos,
            refs: AtomicU32::new(0),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        self.type_name.as_str()
    }

    #[must_use]
    pub fn descriptor(&self) -> Option<Arc<TypeDescriptor>> {
        self.descriptor.clone()
    }

    #[must_use]
    pub fn qos(&self) -> Arc<Qos> {
        Arc::clone(&self.qos)
    }

    /// Endpoint or discovery reference taken.
    pub fn add_ref(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Reference released.
    pub fn release_ref(&self) {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "topic refcount underflow");
    }

    #[must_use]
    pub fn ref_count(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    /// Deletable only with no outstanding references.
    #[must_use]
    pub fn in_use(&self) -> bool {
        self.ref_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::strtab::StringTable;

    fn topic(name: &str) -> Result<Topic> {
        let strings = StringTable::new();
        Topic::new(
            strings.str_new(name, false),
            strings.str_new("ShapeType", false),
            None,
            Arc::new(Qos::default()),
        )
    }

    #[test]
    fn test_valid_topic() {
        let t = topic("Square").expect("valid topic");
        assert_eq!(t.name(), "Square");
        assert_eq!(t.type_name(), "ShapeType");
        assert!(!t.in_use());
    }

    #[test]
    fn test_name_validation() {
        assert!(topic("").is_err());
        assert!(topic(&"x".repeat(MAX_TOPIC_NAME + 1)).is_err());
        assert!(topic(&"x".repeat(MAX_TOPIC_NAME)).is_ok());
    }

    #[test]
    fn test_refcounting() {
        let t = topic("Square").expect("topic");
        t.add_ref();
        t.add_ref();
        assert_eq!(t.ref_count(), 2);
        assert!(t.in_use());
        t.release_ref();
        t.release_ref();
        assert!(!t.in_use());
    }

    #[test]
    fn test_descriptor_type_name_mismatch() {
        use crate::xtypes::{Extensibility, StructType, TypeDescriptor};
        let strings = StringTable::new();
        let descriptor = Arc::new(TypeDescriptor::for_struct(StructType {
            name: "Other".to_string(),
            extensibility: Extensibility::Final,
            fields: Vec::new(),
        }));
        let result = Topic::new(
            strings.str_new("Square", false),
            strings.str_new("ShapeType", false),
            Some(descriptor),
            Arc::new(Qos::default()),
        );
        assert!(matches!(result, Err(Error::InconsistentPolicy(_))));
    }
}
