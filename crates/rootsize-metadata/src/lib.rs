//! rootsize-metadata: who am I and what disks do I have.
//!
//! Resolves an `InstanceDescriptor` for the running node from two local
//! sources:
//!
//! ```text
//! Resolver
//!   ├── MetadataSource (ImdsClient)
//!   │   ├── PUT /latest/api/token           → session token
//!   │   ├── GET /latest/meta-data/instance-id
//!   │   └── GET /latest/meta-data/instance-type
//!   └── BlockInventory (SysfsInventory)
//!       └── /sys/block/nvme*/device/{model,serial}, /sys/block/*/size
//! ```
//!
//! Metadata reads are retried with capped exponential backoff because the
//! endpoint can lag at cold boot. Transport failures surface as
//! `MetadataError::Unavailable` once attempts run out; a response that
//! arrives but makes no sense is `MetadataError::Malformed` immediately.

pub mod error;
pub mod imds;
pub mod inventory;
pub mod resolver;

pub use error::{FetchError, MetadataError};
pub use imds::{ImdsClient, MetadataSource};
pub use inventory::{BlockInventory, DeviceKind, DiscoveredDevice, SysfsInventory};
pub use resolver::Resolver;
