//! # Rust CV Core
//!
//! This library provides the common abstractions and types shared by the two-view reconstruction crates.
//! This includes camera model traits, bearings, camera points, relative poses, keypoints and matches.
//! The crate is kept very small so that it adds negligable build time, and every other crate in the
//! workspace speaks in terms of the types defined here.
//!
//! The crate is designed to work with `#![no_std]`, even without an allocator. `libm` is used
//! (indirectly through `nalgebra`) for all math algorithms that aren't present in `std`.
//!
//! ## Triangulation
//!
//! [`TriangulatorRelative`] must perform a process called
//! [triangulation](https://en.wikipedia.org/wiki/Triangulation). Given
//!
//! * [The relative pose of a camera](CameraToCamera)
//! * [A bearing direction at which lies a feature](Bearing) in each camera
//!
//! we have to produce a 3d point. Cameras have an optical center which all bearings protrude from.
//! What typically happens in triangulation is that we have two optical centers and a bearing out of each
//! of those optical centers approximately pointing towards the 3d point. Since the bearings are based on
//! noisy data they do not intersect exactly, and different triangulation algorithms deal with the error
//! in different ways.
//!
//! - `p` the point we are trying to triangulate
//! - `a` the normalized keypoint on camera A
//! - `b` the normalized keypoint on camera B
//! - `O` the optical center of a camera
//! - `@` the virtual image plane
//!
//! ```text
//!                        @
//!                        @
//!               p--------b--------O
//!              /         @
//!             /          @
//!            /           @
//!           /            @
//!   @@@@@@@a@@@@@
//!         /
//!        /
//!       /
//!      O
//! ```
//!
//! ## Cheirality
//!
//! A triangulated point is only physically meaningful if it lies in front of both cameras.
//! [`Projective::depth`] gives the signed depth of a [`CameraPoint`] along the optical axis,
//! which is what relative pose disambiguation uses to pick between candidate poses.

#![no_std]

mod camera;
mod keypoint;
mod matches;
mod point;
mod pose;
mod triangulation;

pub use camera::*;
pub use keypoint::*;
pub use matches::*;
pub use nalgebra;
pub use point::*;
pub use pose::*;
pub use sample_consensus;
pub use triangulation::*;
