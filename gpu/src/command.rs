// vellum/gpu/src/command.rs
//
// Copyright © 2020 The Vellum Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The abstraction the GPU backend implements to consume a finished frame.

use crate::data::{Batch, ImageRef, PaintParams, Vertex};

/// Receives the flat output of a canvas at the end of a frame.
///
/// The canvas calls the upload methods once, then `draw_batches` with the
/// batches in submission order. Implementations must not call back into the
/// canvas.
pub trait CommandWriter {
    /// Uploads the frame's vertex buffer.
    fn upload_vertices(&mut self, vertices: &[Vertex]);

    /// Uploads the frame's index buffer.
    fn upload_indices(&mut self, indices: &[u32]);

    /// Uploads the paint parameters array.
    fn upload_params(&mut self, params: &[PaintParams]);

    /// Uploads the image reference table that paint parameter rows index.
    fn upload_image_table(&mut self, images: &[ImageRef]);

    /// Issues the frame's draw calls. Custom batches carry the drawer id and
    /// the payload bytes recorded at placement time.
    fn draw_batches(&mut self, batches: &[Batch], payload: &[u8]);
}

/// Maximum number of drawers a registry can hold. Id 0 is reserved for the
/// built-in pipeline.
pub const MAX_CUSTOM_DRAWERS: usize = 64;

/// Registry of custom drawer ids the canvas accepts. Placing a batch with an
/// unregistered id drops the batch.
pub struct CustomDrawerRegistry {
    names: [Option<&'static str>; MAX_CUSTOM_DRAWERS],
}

impl CustomDrawerRegistry {
    #[inline]
    pub fn new() -> CustomDrawerRegistry {
        CustomDrawerRegistry { names: [None; MAX_CUSTOM_DRAWERS] }
    }

    /// Registers a drawer under the first free id and returns it.
    pub fn register(&mut self, name: &'static str) -> Option<u16> {
        for (index, slot) in self.names.iter_mut().enumerate().skip(1) {
            if slot.is_none() {
                *slot = Some(name);
                return Some(index as u16);
            }
        }
        log::warn!("custom drawer registry full, cannot register {:?}", name);
        None
    }

    #[inline]
    pub fn is_registered(&self, id: u16) -> bool {
        (id as usize) < MAX_CUSTOM_DRAWERS && self.names[id as usize].is_some()
    }

    #[inline]
    pub fn name(&self, id: u16) -> Option<&'static str> {
        self.names.get(id as usize).copied().flatten()
    }
}

impl Default for CustomDrawerRegistry {
    #[inline]
    fn default() -> CustomDrawerRegistry {
        CustomDrawerRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::CustomDrawerRegistry;

    #[test]
    fn test_register_skips_reserved_id() {
        let mut registry = CustomDrawerRegistry::new();
        let id = registry.register("outline").unwrap();
        assert_eq!(id, 1);
        assert!(registry.is_registered(id));
        assert!(!registry.is_registered(0));
        assert_eq!(registry.name(id), Some("outline"));
    }
}
