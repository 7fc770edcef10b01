#![cfg_attr(not(any(feature = "std", test)), no_std)]

//! # Floppy Core
//!
//! Flux-level floppy drive emulation for Shugart-interface hosts. The
//! engine translates between buffered disk-image data and real-time flux
//! on the interface cable: a DMA-fed pulse timer synthesises the read
//! stream against a virtual rotational index, and an input-capture path
//! decodes host writes back into MFM bits for the image layer. Head
//! stepping, the index pulse and the select-gated status outputs ride
//! alongside. Boards supply the hardware behind the traits in [`hal`];
//! image codecs sit behind [`image::Image`].

pub mod clock;
pub mod floppy;
pub mod hal;
pub mod image;
pub mod index;
pub mod mfm;
pub mod outputs;
pub mod rdata;
pub mod ring;
pub mod step;
pub mod types;
pub mod wdata;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#[cfg(test)]
mod engine_tests;

pub use clock::{Duration, Instant, Stamp};
pub use floppy::FloppyCore;
pub use hal::{
    Clock, FloppyHal, FluxCapture, FluxOutput, HalError, IrqController, Speaker, StatusPort,
};
pub use image::{Image, ImageError, ImageInfo, Seek, Slot, TrackBuffers};
pub use index::IndexScheduler;
pub use outputs::{pin, OutputMux};
pub use step::Drive;
pub use types::{DmaState, FloppyConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
