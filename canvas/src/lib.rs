// vellum/canvas/src/lib.rs
//
// Copyright © 2020 The Vellum Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The layout-time pipeline of the canvas engine: an immediate-mode path
//! builder that tessellates fills and strokes into reusable [`Geometry`],
//! and a per-frame [`Canvas`] compositor that turns geometries, glyph runs
//! and raw quads into scissor-clipped, style-indexed draw batches.

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;

pub mod baked;
pub mod builder;
pub mod canvas;
pub mod geometry;
pub mod storage;

mod cache;

pub use crate::baked::BakedGeometry;
pub use crate::builder::{GeometryBuilder, LineCap, LineJoin, Winding};
pub use crate::canvas::{Canvas, RawGeometry, RawVertex};
pub use crate::geometry::Geometry;
pub use crate::storage::Storage;

use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Errors raised when submitting previously prepared data to a canvas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaceError {
    /// The baked geometry was produced against an older atlas layout and
    /// must be re-baked. Nothing was emitted.
    StaleBakedGeometry,
}

impl Display for PlaceError {
    fn fmt(&self, formatter: &mut Formatter) -> fmt::Result {
        match *self {
            PlaceError::StaleBakedGeometry => {
                write!(formatter, "baked geometry is stale; re-bake against current storage")
            }
        }
    }
}

impl Error for PlaceError {}
