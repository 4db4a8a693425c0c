// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Extended type system: runtime type descriptors and the type registry.
//!
//! A `TypeDescriptor` is a field tree annotated with CDR type codes, member
//! ids (`@ID`), key markers (`@Key`) and extensibility (`@Extensibility`).
//! Descriptors are immutable once registered and freely shared across
//! participants; registration is idempotent (a second registration of the
//! same name returns the original handle).
//!
//! `DynamicValue` is the runtime representation used by the dynamic
//! publish/subscribe path; `cdr` serializes it against a descriptor.

/// CDR encoding/decoding of dynamic values.
pub mod cdr;

use dashmap::DashMap;
use md5::{Digest, Md5};
use std::sync::Arc;

/// Type extensibility per XTypes (`@Extensibility`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Extensibility {
    #[default]
    Final,
    Extensible,
    Mutable,
}

/// CDR type code tree.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeCode {
    Boolean,
    Char,
    Octet,
    Short,
    UShort,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
    /// 128-bit IEEE on the wire; represented as f64 in memory.
    LongDouble,
    /// Bounded (`Some(n)`) or unbounded string.
    String(Option<u32>),
    Enum {
        name: String,
        enumerators: Vec<String>,
    },
    Struct(Arc<StructType>),
    Union(Arc<UnionType>),
    Sequence {
        element: Box<TypeCode>,
        bound: Option<u32>,
    },
    Array {
        element: Box<TypeCode>,
        dims: Vec<u32>,
    },
    /// Named reference resolved through the registry at use time.
    TypeRef(String),
}

/// One struct member with its annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    /// Member id (`@ID`), used by parameterized CDR.
    pub id: u32,
    /// Host offset hint for the C-ABI surface; zero when unused.
    pub offset: u32,
    pub code: TypeCode,
    /// `@Key` annotation.
    pub key: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructType {
    pub name: String,
    pub extensibility: Extensibility,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnionType {
    pub name: String,
    pub discriminator: TypeCode,
    pub branches: Vec<UnionBranch>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnionBranch {
    pub labels: Vec<i64>,
    pub is_default: bool,
    pub field: Field,
}

/// A registered top-level type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    pub name: String,
    pub code: TypeCode,
}

impl TypeDescriptor {
    /// Convenience constructor for struct-rooted types.
    #[must_use]
    pub fn for_struct(st: StructType) -> Self {
        TypeDescriptor {
            name: st.name.clone(),
            code: TypeCode::Struct(Arc::new(st)),
        }
    }

    /// True when any member of the root struct carries `@Key`.
    #[must_use]
    pub fn has_key(&self) -> bool {
        match &self.code {
            TypeCode::Struct(st) => st.fields.iter().any(|f| f.key),
            _ => false,
        }
    }
}

/// Runtime value shaped by a `TypeCode`.
#[derive(Debug, Clone, PartialEq)]
pub enum DynamicValue {
    Boolean(bool),
    Char(u8),
    Octet(u8),
    Short(i16),
    UShort(u16),
    Long(i32),
    ULong(u32),
    LongLong(i64),
    ULongLong(u64),
    Float(f32),
    Double(f64),
    LongDouble(f64),
    String(String),
    Enum(u32),
    Struct(Vec<DynamicValue>),
    Union {
        discriminator: i64,
        value: Box<DynamicValue>,
    },
    Sequence(Vec<DynamicValue>),
    Array(Vec<DynamicValue>),
}

/// The process-wide type registry. Registration is idempotent.
pub struct TypeRegistry {
    types: DashMap<String, Arc<TypeDescriptor>>,
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        TypeRegistry {
            types: DashMap::new(),
        }
    }

    /// Register a descriptor. A second call with the same type name returns
    /// the handle from the first call, whatever the new descriptor says.
    pub fn register(&self, descriptor: TypeDescriptor) -> Arc<TypeDescriptor> {
        self.types
            .entry(descriptor.name.clone())
            .or_insert_with(|| Arc::new(descriptor))
            .clone()
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        self.types.get(name).map(|e| e.clone())
    }

    /// Resolve a `TypeRef` through the registry.
    #[must_use]
    pub fn resolve(&self, code: &TypeCode) -> Option<TypeCode> {
        match code {
            TypeCode::TypeRef(name) => self.lookup(name).map(|d| d.code.clone()),
            other => Some(other.clone()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute the RTPS key hash for a sample.
///
/// Key fields are serialized big-endian CDR; when the result fits in 16
/// bytes it is used zero-padded, otherwise it is replaced by its MD5 digest
/// (DDS-RTPS v2.5 Sec.9.6.3.8).
#[must_use]
pub fn key_hash(descriptor: &TypeDescriptor, value: &DynamicValue) -> [u8; 16] {
    let key_cdr = cdr::encode_key_fields(descriptor, value);
    let mut hash = [0u8; 16];
    if key_cdr.len() <= 16 {
        hash[..key_cdr.len()].copy_from_slice(&key_cdr);
    } else {
        let digest = Md5::digest(&key_cdr);
        hash.copy_from_slice(&digest);
    }
    hash
}

/// Reduce a 16-byte key hash to the 64-bit instance index key.
#[must_use]
pub fn instance_key(hash: &[u8; 16]) -> u64 {
    let mut lo = [0u8; 8];
    let mut hi = [0u8; 8];
    lo.copy_from_slice(&hash[0..8]);
    hi.copy_from_slice(&hash[8..16]);
    u64::from_be_bytes(lo) ^ u64::from_be_bytes(hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape_type() -> TypeDescriptor {
        TypeDescriptor::for_struct(StructType {
            name: "ShapeType".to_string(),
            extensibility: Extensibility::Final,
            fields: vec![
                Field {
                    name: "color".to_string(),
                    id: 0,
                    offset: 0,
                    code: TypeCode::String(Some(128)),
                    key: true,
                },
                Field {
                    name: "x".to_string(),
                    id: 1,
                    offset: 0,
                    code: TypeCode::Long,
                    key: false,
                },
                Field {
                    name: "y".to_string(),
                    id: 2,
                    offset: 0,
                    code: TypeCode::Long,
                    key: false,
                },
                Field {
                    name: "shapesize".to_string(),
                    id: 3,
                    offset: 0,
                    code: TypeCode::Long,
                    key: false,
                },
            ],
        })
    }

    #[test]
    fn test_registration_is_idempotent() {
        let registry = TypeRegistry::new();
        let first = registry.register(shape_type());
        let second = registry.register(shape_type());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_typeref_resolution() {
        let registry = TypeRegistry::new();
        registry.register(shape_type());
        let resolved = registry
            .resolve(&TypeCode::TypeRef("ShapeType".to_string()))
            .expect("ShapeType should resolve");
        assert!(matches!(resolved, TypeCode::Struct(_)));
        assert!(registry.resolve(&TypeCode::TypeRef("Nope".to_string())).is_none());
    }

    #[test]
    fn test_key_hash_stability() {
        let desc = shape_type();
        let red = DynamicValue::Struct(vec![
            DynamicValue::String("Red".to_string()),
            DynamicValue::Long(10),
            DynamicValue::Long(20),
            DynamicValue::Long(30),
        ]);
        let red_again = DynamicValue::Struct(vec![
            DynamicValue::String("Red".to_string()),
            DynamicValue::Long(99),
            DynamicValue::Long(98),
            DynamicValue::Long(97),
        ]);
        let blue = DynamicValue::Struct(vec![
            DynamicValue::String("Blue".to_string()),
            DynamicValue::Long(10),
            DynamicValue::Long(20),
            DynamicValue::Long(30),
        ]);

        // key fields only: same color, same hash
        assert_eq!(key_hash(&desc, &red), key_hash(&desc, &red_again));
        assert_ne!(key_hash(&desc, &red), key_hash(&desc, &blue));
        assert_ne!(instance_key(&key_hash(&desc, &red)), 0);
    }

    #[test]
    fn test_has_key() {
        assert!(shape_type().has_key());
        let keyless = TypeDescriptor::for_struct(StructType {
            name: "Plain".to_string(),
            extensibility: Extensibility::Final,
            fields: vec![Field {
                name: "v".to_string(),
                id: 0,
                offset: 0,
                code: TypeCode::Double,
                key: false,
            }],
        });
        assert!(!keyless.has_key());
    }
}
