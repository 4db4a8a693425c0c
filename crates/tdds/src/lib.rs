// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # TDDS - Data Distribution Service middleware core
//!
//! A pure Rust implementation of the OMG DDS (Data Distribution Service) and
//! RTPS (Real-Time Publish-Subscribe) 2.x specifications: participant and
//! endpoint discovery (SPDP/SEDP), reliable and best-effort RTPS state
//! machines with per-endpoint history caches, the DDS entity/QoS model with
//! conditions and waitsets, and the runtime substrate they share (pools,
//! skiplists, chained buffers, a configuration store, timers, a dispatcher).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tdds::{DomainParticipant, Qos, Result};
//!
//! fn main() -> Result<()> {
//!     let participant = DomainParticipant::builder("my_app")
//!         .domain_id(0)
//!         .build()?;
//!
//!     let topic = participant.create_topic("Square", "ShapeType", Qos::default())?;
//!     let writer = participant.create_writer(&topic, Qos::reliable())?;
//!     writer.write_raw(b"\x01\x00\x00\x00", None)?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                        Application Layer                           |
//! |  DomainParticipant -> Publisher/Subscriber -> DataWriter/DataReader|
//! +--------------------------------------------------------------------+
//! |                           DDS Layer                                |
//! |  QoS Policies | Topics | Instance Lifecycle | WaitSets/Conditions  |
//! +--------------------------------------------------------------------+
//! |                          RTPS Layer                                |
//! |  Discovery (SPDP/SEDP) | Reliability | History Cache | Fragments   |
//! +--------------------------------------------------------------------+
//! |                       Transport Layer                              |
//! |  UDP Unicast | UDP Multicast | TCP (optional) | Dynamic IP         |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`dds`] - Core DDS API (start here)
//! - [`qos`] - Quality of Service policies and compatibility rules
//! - [`discovery`] - SPDP/SEDP discovery protocols and the matching engine
//! - [`reliability`] - Reliable writer/reader state machines
//! - [`cache`] - Per-endpoint history caches
//! - [`protocol`] - RTPS wire encoding/decoding
//! - [`xtypes`] - Type descriptors and CDR serialization
//! - [`config`] - Named parameter store with change notifications
//!
//! ## See Also
//!
//! - [DDS Specification](https://www.omg.org/spec/DDS/1.4/)
//! - [RTPS Specification](https://www.omg.org/spec/DDSI-RTPS/2.5/)

/// Per-endpoint history caches (change records, instance index).
pub mod cache;
/// Named parameter store (groups, env/file loading, change callbacks).
pub mod config;
/// Runtime substrate: GUIDs, time, pools, buffers, skiplists, strings, timers.
pub mod core;
/// Core DDS API (DomainParticipant, DataReader, DataWriter, WaitSet).
pub mod dds;
/// SPDP/SEDP discovery, the matching engine and liveliness tracking.
pub mod discovery;
/// Dynamic interface/address monitor feeding transport locator lists.
pub mod dynip;
/// Dispatcher: handle polling, timer service, core-thread callbacks.
pub mod engine;
/// RTPS wire protocol (header, submessages, locators, builtin topic data).
pub mod protocol;
/// Reliability protocol state machines and fragment assembly.
pub mod reliability;
/// QoS policies and compatibility checking.
pub mod qos;
/// Transport layer (UDP unicast/multicast, TCP surface, port mapping).
pub mod transport;
/// Extended type system: descriptors, registry, CDR encoding.
pub mod xtypes;

/// Access-control policy boundary (allow/deny decisions).
pub mod security;

pub use dds::{
    DataReader, DataWriter, DdsData, DomainParticipant, Error, GuardCondition, ParticipantBuilder,
    Publisher, Qos, Result, Subscriber, Topic, WaitSet,
};

pub use crate::core::guid::{EntityId, Guid, GuidPrefix};

/// TDDS version string.
pub const VERSION: &str = "0.3.2";
