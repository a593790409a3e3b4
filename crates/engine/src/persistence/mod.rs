//! Persistence layer for workflow instances and payloads
//!
//! This module provides:
//! - [`InstanceService`] trait for durable instance records
//! - [`PayloadStore`] trait for step/workflow payloads
//! - [`InMemoryInstanceService`] and [`InMemoryPayloadStore`] for testing and single-process hosts

mod instance;
mod memory;
mod store;

pub use instance::{
    InstanceStep, InstanceSummary, RunSpec, RunStatus, StepAttribs, WorkflowInstance,
};
pub use memory::{InMemoryInstanceService, InMemoryPayloadStore, StatusEvent};
pub use store::{
    InstanceField, InstanceFilter, InstanceQuery, InstanceService, NewInstance, Page, Pagination,
    PayloadStore, StepAttribsUpdate, StepMessageChange, StepStatusChange, StoreError, WorkflowStatusChange,
};
