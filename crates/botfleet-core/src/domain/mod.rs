//! Domain models for botfleet.
//!
//! - `Instance`: one provisioned agent, with its validated `InstanceName`
//! - `PersonaChoice`: what the operator asked for at creation time
//! - `FleetError`: the error taxonomy shared by every operation

pub mod error;
pub mod instance;

pub use error::{Disposition, Entity, ErrorKind, FleetError, Result};
pub use instance::{validate_name, Instance, InstanceName, PersonaChoice, PersonaSource};
