//! This crate contains computational geometry algorithms for [Rust CV](https://github.com/rust-cv/).
//!
//! ## Triangulation
//!
//! In this problem we know the projection matrices of two cameras and the image coordinates of the same
//! feature observed in each camera. We want to find the point of intersection of the two rays.
//!
//! - `p` the point we are trying to triangulate
//! - `a` the keypoint on camera A
//! - `b` the keypoint on camera B
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
//! When the rays are parallel the point lies at infinity and can not be recovered. This is reported
//! per point with [`triangulation::DegeneratePoint`] so that one bad correspondence does not spoil the rest.

pub mod triangulation;
