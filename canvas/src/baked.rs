// vellum/canvas/src/baked.rs
//
// Copyright © 2020 The Vellum Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Renderer-facing geometry with every atlas UV resolved against a
//! specific storage.
//!
//! A baked geometry is a frozen frame fragment: vertices, indices, paint
//! parameter rows, image references and batches, ready to be appended to
//! any canvas frame. It is only valid with the [`Storage`](crate::Storage)
//! that produced it, and only while that storage's atlas layout version is
//! unchanged; submission checks the version and reports staleness instead
//! of drawing garbage UVs.

use vellum_geometry::vector::Vector2F;
use vellum_gpu::data::{Batch, ImageRef, PaintParams, Vertex};

pub struct BakedGeometry {
    pub(crate) vertices: Vec<Vertex>,
    pub(crate) indices: Vec<u32>,
    pub(crate) params: Vec<PaintParams>,
    pub(crate) images: Vec<ImageRef>,
    pub(crate) batches: Vec<Batch>,
    pub(crate) payload: Vec<u8>,

    pub(crate) bounds_min: Vector2F,
    pub(crate) bounds_max: Vector2F,

    /// The storage layout version this bake resolved UVs against.
    pub(crate) atlas_version: u64,
}

impl BakedGeometry {
    #[inline]
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    #[inline]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    #[inline]
    pub fn params(&self) -> &[PaintParams] {
        &self.params
    }

    #[inline]
    pub fn images(&self) -> &[ImageRef] {
        &self.images
    }

    #[inline]
    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    pub fn bounds_min(&self) -> Vector2F {
        self.bounds_min
    }

    #[inline]
    pub fn bounds_max(&self) -> Vector2F {
        self.bounds_max
    }

    #[inline]
    pub fn atlas_version(&self) -> u64 {
        self.atlas_version
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}
