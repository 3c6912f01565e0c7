use crate::Reconstruction;
use cv_core::nalgebra::{Point3, Vector3};
use cv_core::Pose;
use ply_rs::{
    ply::{
        Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
        ScalarType,
    },
    writer::Writer,
};
use std::io::{self, Write};

const CAMERA_COLOR: [u8; 3] = [255, 0, 255];
const POINT_COLOR: [u8; 3] = [255, 255, 255];

/// A camera frustum drawn in the exported point cloud.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportCamera {
    pub optical_center: Point3<f64>,
    pub up_direction: Vector3<f64>,
    pub forward_direction: Vector3<f64>,
    pub focal_length: f64,
}

impl ExportCamera {
    /// The frusta of both cameras of a reconstruction in the frame of camera 1.
    ///
    /// The baseline has unit length, so `focal_length` is in units of the baseline.
    pub fn from_reconstruction(reconstruction: &Reconstruction, focal_length: f64) -> [Self; 2] {
        // Image y points down in camera space.
        let up = -Vector3::y();
        let forward = Vector3::z();
        let second = reconstruction.pose.inverse().isometry();
        [
            Self {
                optical_center: Point3::origin(),
                up_direction: up,
                forward_direction: forward,
                focal_length,
            },
            Self {
                optical_center: second * Point3::origin(),
                up_direction: second * up,
                forward_direction: second * forward,
                focal_length,
            },
        ]
    }
}

/// Writes the triangulated points and both camera frusta of a reconstruction as an ASCII PLY file.
pub fn export_reconstruction(
    writer: impl Write,
    reconstruction: &Reconstruction,
    focal_length: f64,
    camera_faces: bool,
) -> io::Result<()> {
    let points = reconstruction
        .point_cloud()
        .into_iter()
        .flatten()
        .map(|point| (point, POINT_COLOR))
        .collect();
    export(
        writer,
        points,
        ExportCamera::from_reconstruction(reconstruction, focal_length).to_vec(),
        camera_faces,
    )
}

/// Writes colored points and camera frusta as an ASCII PLY file.
///
/// Every camera adds five vertices, its optical center and the corners of its image plane,
/// ahead of the points. With `camera_faces` each frustum is also closed with four triangles.
pub fn export(
    mut writer: impl Write,
    points_and_colors: Vec<(Point3<f64>, [u8; 3])>,
    cameras: Vec<ExportCamera>,
    camera_faces: bool,
) -> io::Result<()> {
    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::Ascii;
    ply.header
        .comments
        .push("Exported from rust-cv/cv-sfm".to_string());

    // The vertex element holds both the frustum corners and the points.
    let mut point_element = ElementDef::new("vertex".to_string());
    for (name, scalar) in [
        ("x", ScalarType::Double),
        ("y", ScalarType::Double),
        ("z", ScalarType::Double),
        ("red", ScalarType::UChar),
        ("green", ScalarType::UChar),
        ("blue", ScalarType::UChar),
    ] {
        point_element
            .properties
            .add(PropertyDef::new(name.to_string(), PropertyType::Scalar(scalar)));
    }
    ply.header.elements.add(point_element);

    if camera_faces {
        let mut face_element = ElementDef::new("face".to_string());
        let vertex_list = PropertyDef::new(
            "vertex_index".to_string(),
            PropertyType::List(ScalarType::UChar, ScalarType::Int),
        );
        face_element.properties.add(vertex_list);
        ply.header.elements.add(face_element);
    }

    let mut faces: Vec<DefaultElement> = vec![];
    let mut vertices: Vec<DefaultElement> = vec![];

    let mut add_vertex = |p: Point3<f64>, [r, g, b]: [u8; 3]| -> usize {
        let pos = vertices.len();
        let mut point = DefaultElement::new();
        point.insert("x".to_string(), Property::Double(p.x));
        point.insert("y".to_string(), Property::Double(p.y));
        point.insert("z".to_string(), Property::Double(p.z));
        point.insert("red".to_string(), Property::UChar(r));
        point.insert("green".to_string(), Property::UChar(g));
        point.insert("blue".to_string(), Property::UChar(b));
        vertices.push(point);
        pos
    };

    let mut add_triangle = |a: usize, b: usize, c: usize| {
        let mut face = DefaultElement::new();
        face.insert(
            "vertex_index".to_string(),
            Property::ListInt(vec![a as i32, b as i32, c as i32]),
        );
        faces.push(face);
    };

    for ExportCamera {
        optical_center,
        up_direction,
        forward_direction,
        focal_length,
    } in cameras
    {
        let right_direction = forward_direction.cross(&up_direction);
        let center_point = add_vertex(optical_center, CAMERA_COLOR);
        let [up_right, up_left, down_left, down_right] =
            [(1, 1), (1, -1), (-1, -1), (-1, 1)].map(|(up, right)| {
                add_vertex(
                    optical_center
                        + forward_direction * focal_length
                        + up as f64 * up_direction * focal_length
                        + right as f64 * right_direction * focal_length,
                    CAMERA_COLOR,
                )
            });

        if camera_faces {
            add_triangle(center_point, down_right, up_right);
            add_triangle(center_point, up_right, up_left);
            add_triangle(center_point, up_left, down_left);
            add_triangle(center_point, down_left, down_right);
        }
    }

    for (p, c) in points_and_colors {
        add_vertex(p, c);
    }

    ply.payload.insert("vertex".to_string(), vertices);
    if camera_faces {
        ply.payload.insert("face".to_string(), faces);
    }

    let w = Writer::new();
    w.write_ply(&mut writer, &mut ply)?;
    Ok(())
}
