// vellum/content/src/lib.rs
//
// Copyright © 2020 The Vellum Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Paint styles: the source of color for fragments, independent of the
//! geometry they cover.

pub mod style;

pub use crate::style::{
    box_gradient, image_pattern, linear_gradient, radial_gradient, solid_color,
    ImagePatternSettings, RenderStyle,
};
