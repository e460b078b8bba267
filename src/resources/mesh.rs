//! Mesh data structures and generation

use crate::backend::traits::*;
use crate::backend::types::*;
use glam::{Vec2, Vec3, Vec4};

/// CPU-side mesh with vertex and index data
#[derive(Debug, Clone)]
pub struct Mesh {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub topology: PrimitiveTopology,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            vertices: Vec::new(),
            indices: Vec::new(),
            topology: PrimitiveTopology::TriangleList,
        }
    }

    pub fn triangle_count(&self) -> usize {
        match self.topology {
            PrimitiveTopology::TriangleList => self.indices.len() / 3,
            _ => 0,
        }
    }

    /// Upload to the device
    pub fn upload(&self, device: &mut dyn GraphicsDevice) -> BackendResult<MeshHandle> {
        device.create_mesh(&MeshDescriptor {
            label: Some(&self.name),
            vertices: &self.vertices,
            indices: &self.indices,
            topology: self.topology,
        })
    }

    /// Attach every vertex to one joint with full weight
    pub fn bind_to_joint(mut self, joint: u32) -> Self {
        for vertex in &mut self.vertices {
            *vertex = vertex.with_skin([joint, 0, 0, 0], Vec4::new(1.0, 0.0, 0.0, 0.0));
        }
        self
    }

    /// Unit cube centered at the origin, faces wound counter-clockwise from outside
    pub fn cube() -> Self {
        let mut mesh = Mesh::new("cube");

        // (normal, u axis, v axis) per face
        let faces = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (-Vec3::Z, -Vec3::X, Vec3::Y),
            (Vec3::X, -Vec3::Z, Vec3::Y),
            (-Vec3::X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, -Vec3::Z),
            (-Vec3::Y, Vec3::X, Vec3::Z),
        ];

        for (normal, u, v) in faces {
            let base = mesh.vertices.len() as u32;
            let corners = [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)];
            for (cu, cv) in corners {
                let position = normal * 0.5 + u * cu + v * cv;
                let mut vertex = Vertex::new(position, normal, Vec2::new(cu + 0.5, 0.5 - cv));
                vertex.tangent = u.extend(1.0);
                mesh.vertices.push(vertex);
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        mesh
    }

    /// UV sphere of radius 0.5
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let mut mesh = Mesh::new("sphere");
        let segments = segments.max(3);
        let rings = rings.max(2);

        for ring in 0..=rings {
            let phi = ring as f32 * std::f32::consts::PI / rings as f32;
            for segment in 0..=segments {
                let theta = segment as f32 * std::f32::consts::TAU / segments as f32;
                let normal = Vec3::new(phi.sin() * theta.cos(), phi.cos(), phi.sin() * theta.sin());
                let uv = Vec2::new(segment as f32 / segments as f32, ring as f32 / rings as f32);
                let mut vertex = Vertex::new(normal * 0.5, normal, uv);
                vertex.tangent = Vec4::new(-theta.sin(), 0.0, theta.cos(), 1.0);
                mesh.vertices.push(vertex);
            }
        }

        for ring in 0..rings {
            for segment in 0..segments {
                let current = ring * (segments + 1) + segment;
                let below = current + segments + 1;
                mesh.indices.extend_from_slice(&[
                    current,
                    current + 1,
                    below,
                    current + 1,
                    below + 1,
                    below,
                ]);
            }
        }

        mesh
    }

    /// Plane on the XZ axis facing +Y
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Self {
        let mut mesh = Mesh::new("plane");
        let subdivisions = subdivisions.max(1);
        let step = Vec2::new(width, depth) / subdivisions as f32;

        for z in 0..=subdivisions {
            for x in 0..=subdivisions {
                let px = -width / 2.0 + x as f32 * step.x;
                let pz = -depth / 2.0 + z as f32 * step.y;
                let uv = Vec2::new(x as f32, z as f32) / subdivisions as f32;
                mesh.vertices.push(Vertex::new(Vec3::new(px, 0.0, pz), Vec3::Y, uv));
            }
        }

        for z in 0..subdivisions {
            for x in 0..subdivisions {
                let current = z * (subdivisions + 1) + x;
                let next = current + subdivisions + 1;
                mesh.indices
                    .extend_from_slice(&[current, next, current + 1, current + 1, next, next + 1]);
            }
        }

        mesh
    }

    /// Quad in the XY plane facing +Z
    pub fn quad(width: f32, height: f32) -> Self {
        let mut mesh = Mesh::new("quad");
        let (hw, hh) = (width / 2.0, height / 2.0);
        mesh.vertices = vec![
            Vertex::new(Vec3::new(-hw, -hh, 0.0), Vec3::Z, Vec2::new(0.0, 1.0)),
            Vertex::new(Vec3::new(hw, -hh, 0.0), Vec3::Z, Vec2::new(1.0, 1.0)),
            Vertex::new(Vec3::new(hw, hh, 0.0), Vec3::Z, Vec2::new(1.0, 0.0)),
            Vertex::new(Vec3::new(-hw, hh, 0.0), Vec3::Z, Vec2::new(0.0, 0.0)),
        ];
        mesh.indices = vec![0, 1, 2, 0, 2, 3];
        mesh
    }
}
