//! # wavetrace
//!
//! Interactive path tracer for static triangle scenes. Meshes are loaded
//! from OBJ/PLY, indexed by a spatial-split BVH that is cached on disk per
//! scene hash, and rendered by compute kernels in one of two pipelines:
//! a staged *wavefront* pipeline with device-resident path state, or a
//! single *megakernel*.
//!
//! ## Modules
//!
//! - [`util`] - Error type and severity classification
//! - [`scene`] - Mesh loading, materials, area light, environment map
//! - [`sbvh`] - SBVH construction, GPU layout, binary cache
//! - [`params`] / [`camera`] - Render parameters and camera controls
//! - [`input`] - Key bindings and input events
//! - [`persist`] - Saved camera/light state
//! - [`backend`] - Compute backend contract, wgpu and recording implementations
//! - [`tracer`] - Per-frame orchestration
//! - [`settings`] / [`snapshot`] - Configuration and image output
//! - `viewer` - eframe window (feature `viewer`)
//!
//! ## Example
//!
//! ```ignore
//! use wavetrace::backend::recording::RecordingBackend;
//! use wavetrace::settings::Settings;
//! use wavetrace::tracer::{HeadlessSurface, NoPicker, Tracer};
//!
//! let mut tracer = Tracer::new(
//!     RecordingBackend::new(),
//!     Settings::default(),
//!     Box::new(NoPicker),
//!     Some("assets/cornell.obj".as_ref()),
//!     (640, 480),
//! )?;
//! let mut surface = HeadlessSurface::new(640, 480);
//! tracer.update(&mut surface)?;
//! ```

pub mod util;
pub mod scene;
pub mod sbvh;
pub mod params;
pub mod camera;
pub mod input;
pub mod persist;
pub mod backend;
pub mod tracer;
pub mod settings;
pub mod snapshot;

// Interactive window (optional, enabled with "viewer" feature)
#[cfg(feature = "viewer")]
pub mod viewer;

pub use util::{Error, Result, Severity};
