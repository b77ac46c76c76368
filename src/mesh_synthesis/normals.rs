use godot::prelude::*;

use super::types::MeshBuffers;

/// Epsilon for near-zero length checks.
const NORMAL_EPSILON: f32 = 1e-6;

fn normalize_or_up(v: Vector3) -> Vector3 {
    let len = v.length();
    if len > NORMAL_EPSILON {
        v / len
    } else {
        Vector3::UP
    }
}

/// Fill per-triangle face normals and per-vertex area-weighted normals.
/// Vertices no triangle references get an up normal.
pub fn compute_normals(buffers: &mut MeshBuffers) {
    let mut accumulated = vec![Vector3::ZERO; buffers.positions.len()];

    for triangle in &mut buffers.triangles {
        let [i0, i1, i2] = triangle.vertices.map(|i| i as usize);
        let v0 = buffers.positions[i0];
        let v1 = buffers.positions[i1];
        let v2 = buffers.positions[i2];

        // Cross product magnitude is twice the area, so larger faces weigh more
        let weighted = (v1 - v0).cross(v2 - v0);
        triangle.normal = normalize_or_up(weighted);

        for idx in [i0, i1, i2] {
            accumulated[idx] += weighted;
        }
    }

    buffers.normals = accumulated.into_iter().map(normalize_or_up).collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh_synthesis::types::MeshTriangle;

    fn approx(a: Vector3, b: Vector3) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn test_flat_quad_normals_point_up() {
        let mut buffers = MeshBuffers::default();
        let a = buffers.push_vertex(Vector3::new(0.0, 0.0, 0.0));
        let b = buffers.push_vertex(Vector3::new(0.0, 0.0, 1.0));
        let c = buffers.push_vertex(Vector3::new(1.0, 0.0, 0.0));
        let d = buffers.push_vertex(Vector3::new(1.0, 0.0, 1.0));
        let uvs = [Vector2::ZERO; 3];
        buffers.triangles.push(MeshTriangle::untinted([a, b, c], uvs, 0));
        buffers.triangles.push(MeshTriangle::untinted([c, b, d], uvs, 0));

        compute_normals(&mut buffers);

        assert_eq!(buffers.normals.len(), 4);
        for n in &buffers.normals {
            assert!(approx(*n, Vector3::UP), "expected up normal, got {:?}", n);
        }
        for t in &buffers.triangles {
            assert!(approx(t.normal, Vector3::UP));
        }
    }

    #[test]
    fn test_unreferenced_vertex_defaults_up() {
        let mut buffers = MeshBuffers::default();
        buffers.push_vertex(Vector3::new(3.0, 1.0, 2.0));
        compute_normals(&mut buffers);
        assert_eq!(buffers.normals, vec![Vector3::UP]);
    }

    #[test]
    fn test_degenerate_triangle_does_not_produce_nan() {
        let mut buffers = MeshBuffers::default();
        let a = buffers.push_vertex(Vector3::ZERO);
        let b = buffers.push_vertex(Vector3::ZERO);
        let c = buffers.push_vertex(Vector3::ZERO);
        buffers
            .triangles
            .push(MeshTriangle::untinted([a, b, c], [Vector2::ZERO; 3], 0));

        compute_normals(&mut buffers);

        assert!(buffers.normals.iter().all(|n| n.x.is_finite() && n.y.is_finite()));
        assert!(approx(buffers.triangles[0].normal, Vector3::UP));
    }
}
