//! `waysense-hal` – sensor boundary.
//!
//! # Modules
//!
//! - [`gps`] – [`SentenceSource`][gps::SentenceSource] and a line reader
//!   over serial device nodes or recorded logs.
//! - [`depth`] – [`DepthCamera`][depth::DepthCamera] trait.
//! - [`sim`] – simulated GPS walk and scripted depth camera for running
//!   without hardware.

pub mod depth;
pub mod gps;
pub mod sim;

pub use depth::DepthCamera;
pub use gps::{LineSentenceSource, SentenceSource};
pub use sim::{SimDepthCamera, SimGps};
