#![doc(html_root_url = "https://docs.rs/xkrt/0.1.0")]

//! # xkrt
//!
//! A heterogeneous task-graph runtime: dependency resolution, software
//! coherency, and per-device offloading across mixed-vendor accelerators.
//!
//! A program registers host memory as user data, spawns tasks over
//! accesses into that data, and the runtime resolves the data-flow
//! dependencies between tasks, elects a device for each, fetches whatever
//! bytes that device doesn't already hold a coherent replica of, and
//! dispatches the task body once its data has arrived. None of this
//! requires real accelerator hardware to exercise: the `Driver` trait
//! (`driver.rs`) is the only seam a backend plugs into, and the
//! `xkrt-testutils` dev-crate provides an in-process `FakeDriver` for
//! tests.
//!
//! ## Layout
//!
//! - [`region`] / [`khp`] — the K-dimensional hyperrectangle algebra and
//!   the tree indexing it.
//! - [`access`] / [`datum`] — what a task touches, and how a user datum is
//!   named.
//! - [`dependency`] — the data-flow dependency domain (§4.3).
//! - [`coherency`] — the software-managed coherency protocol (§4.4).
//! - [`arena`] — per-device memory allocation (§4.5).
//! - [`device`] / [`driver`] — device identity/state, and the hook table a
//!   backend implements.
//! - [`offloader`] — per-device transfer/kernel streams (§4.6).
//! - [`task`] — the task state machine and moldable splitting (§3, §4.7).
//! - [`scheduler`] / [`team`] — device election (§4.8) and work stealing
//!   (§4.9).
//! - [`runtime`] — the public façade tying all of the above together.
//!
//! Fatal conditions (§7) — an out-of-memory arena after eviction retries,
//! a full offloader ring, a driver command failure surfaced off a
//! background thread — have no caller frame left to return a `Result` to;
//! these log at `error!` via [`error::fatal`] and abort the process, per
//! the policy documented in [`error`].

pub mod access;
pub mod arena;
pub mod coherency;
pub mod config;
pub mod datum;
pub mod dependency;
pub mod device;
pub mod driver;
pub mod error;
pub mod khp;
pub mod offloader;
pub mod region;
pub mod runtime;
pub mod scheduler;
pub mod task;
pub mod team;

pub use access::{Access, AccessMode, AccessRef, AccessState, AccessType, Concurrency, MemView, Scope};
pub use config::RuntimeConfig;
pub use datum::{DatumKey, UserDatum};
pub use device::{Device, DeviceId, DeviceMask, DeviceState, DriverType};
pub use driver::Driver;
pub use error::{Error, Result};
pub use region::{Hyperrect, Interval, MatrixTile, Rect2};
pub use runtime::{DistributeKind, Runtime};
pub use task::{Task, TaskBody, TaskFlags, TaskHandle, TaskState};
pub use team::Team;
