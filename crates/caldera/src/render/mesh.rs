//! Mesh geometry and lazy GPU upload
//!
//! A [`Mesh`] keeps its vertices and indices on the CPU and mirrors them in
//! two device buffers. [`Mesh::update`] only replaces the CPU copy and marks
//! the mesh dirty; the next [`Mesh::upload`] (or any buffer accessor) pushes
//! the data with a blocking submit-and-wait on the transfer queue.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytemuck::{Pod, Zeroable};

use crate::foundation::color::Color;
use crate::foundation::math::{Vec2, Vec3};
use crate::render::commands::CommandRecorder;
use crate::render::device::{BufferDesc, BufferId, BufferUsage, FenceId, QueueKind, Submission};
use crate::render::engine::Engine;
use crate::render::release::{PendingRelease, ReleaseQueue};
use crate::render::RenderResult;

/// Index type of every mesh
pub type Index = u32;

/// GPU vertex, std430-compatible (48 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    _pad0: f32,
    /// Vertex color
    pub color: Color,
    /// Texture coordinates
    pub uv: [f32; 2],
    _pad1: [f32; 2],
}

impl Vertex {
    /// Create a vertex
    pub fn new(position: Vec3, color: Color, uv: Vec2) -> Self {
        Self {
            position: position.into(),
            _pad0: 0.0,
            color,
            uv: uv.into(),
            _pad1: [0.0; 2],
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct GpuArray {
    buffer: BufferId,
    capacity: u64,
    address: u64,
}

#[derive(Debug)]
struct MeshState {
    vertices: Vec<Vertex>,
    indices: Vec<Index>,
    vertex_buffer: Option<GpuArray>,
    index_buffer: Option<GpuArray>,
    dirty: bool,
}

/// Indexed triangle mesh
#[derive(Debug)]
pub struct Mesh {
    release: Arc<ReleaseQueue>,
    upload_fence: FenceId,
    state: Mutex<MeshState>,
}

impl Mesh {
    /// Create a mesh; data is uploaded on first use
    pub fn new(engine: &Engine, vertices: Vec<Vertex>, indices: Vec<Index>) -> RenderResult<Arc<Self>> {
        Self::with_release(engine.release_queue(), vertices, indices)
    }

    pub(crate) fn with_release(
        release: &Arc<ReleaseQueue>,
        vertices: Vec<Vertex>,
        indices: Vec<Index>,
    ) -> RenderResult<Arc<Self>> {
        let upload_fence = release.device().create_fence(false)?;
        Ok(Arc::new(Self {
            release: release.clone(),
            upload_fence,
            state: Mutex::new(MeshState {
                vertices,
                indices,
                vertex_buffer: None,
                index_buffer: None,
                dirty: true,
            }),
        }))
    }

    /// Unit cube centered on the origin, white, with per-face UVs
    pub fn cube(engine: &Engine) -> RenderResult<Arc<Self>> {
        Self::cube_with(engine.release_queue())
    }

    pub(crate) fn cube_with(release: &Arc<ReleaseQueue>) -> RenderResult<Arc<Self>> {
        let (vertices, indices) = cube_geometry();
        Self::with_release(release, vertices, indices)
    }

    /// Replace the CPU-side geometry and mark the mesh dirty
    pub fn update(&self, vertices: Vec<Vertex>, indices: Vec<Index>) {
        let mut state = self.lock();
        state.vertices = vertices;
        state.indices = indices;
        state.dirty = true;
    }

    /// Whether CPU data has not been uploaded yet
    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// Push pending CPU data to the GPU; a no-op when clean
    pub fn upload(&self) -> RenderResult<()> {
        let mut state = self.lock();
        self.upload_locked(&mut state)
    }

    /// Index buffer, uploading first if dirty
    pub fn index_buffer(&self) -> RenderResult<BufferId> {
        let mut state = self.lock();
        self.upload_locked(&mut state)?;
        state
            .index_buffer
            .map(|array| array.buffer)
            .ok_or_else(|| crate::render::DeviceError::ResourceNotFound("mesh index buffer".to_string()).into())
    }

    /// Device address of the vertex buffer, uploading first if dirty
    pub fn vertex_address(&self) -> RenderResult<u64> {
        let mut state = self.lock();
        self.upload_locked(&mut state)?;
        Ok(state.vertex_buffer.map_or(0, |array| array.address))
    }

    /// Number of indices to draw
    pub fn index_count(&self) -> u32 {
        self.lock().indices.len() as u32
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> usize {
        self.lock().vertices.len()
    }

    fn lock(&self) -> MutexGuard<'_, MeshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn upload_locked(&self, state: &mut MeshState) -> RenderResult<()> {
        if !state.dirty {
            return Ok(());
        }

        let vertex_bytes: &[u8] = bytemuck::cast_slice(&state.vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&state.indices);

        let vertex_buffer = self.ensure_capacity(&mut state.vertex_buffer, vertex_bytes.len() as u64, BufferUsage::STORAGE, "mesh vertices")?;
        let index_buffer = self.ensure_capacity(&mut state.index_buffer, index_bytes.len() as u64, BufferUsage::INDEX, "mesh indices")?;

        let mut recorder = CommandRecorder::new();
        recorder.begin()?;
        if !vertex_bytes.is_empty() {
            recorder.update_buffer_bytes(vertex_buffer, 0, vertex_bytes)?;
        }
        if !index_bytes.is_empty() {
            recorder.update_buffer_bytes(index_buffer, 0, index_bytes)?;
        }
        recorder.end()?;

        let device = self.release.device();
        device.reset_fence(self.upload_fence)?;
        device.submit(&Submission {
            queue: QueueKind::Transfer,
            commands: recorder.commands(),
            wait: &[],
            signal: &[],
            fence: Some(self.upload_fence),
        })?;
        device.wait_fence(self.upload_fence, None)?;

        log::trace!(
            "Uploaded mesh: {} vertices, {} indices",
            state.vertices.len(),
            state.indices.len()
        );
        state.dirty = false;
        Ok(())
    }

    /// Make sure `slot` holds a buffer of at least `size` bytes
    ///
    /// A buffer that is too small is replaced; the old one goes through the
    /// release queue since in-flight draws may still read it.
    fn ensure_capacity(
        &self,
        slot: &mut Option<GpuArray>,
        size: u64,
        usage: BufferUsage,
        label: &'static str,
    ) -> RenderResult<BufferId> {
        if let Some(array) = slot {
            if array.capacity >= size {
                return Ok(array.buffer);
            }
        }

        let device = self.release.device();
        let capacity = size.max(4);
        let buffer = device.create_buffer(
            &BufferDesc {
                size: capacity,
                usage: usage | BufferUsage::TRANSFER_DST,
                label,
            },
            None,
        )?;
        let address = match device.buffer_address(buffer) {
            Ok(address) => address,
            Err(error) => {
                self.release.defer(PendingRelease::Buffer(buffer));
                return Err(error.into());
            }
        };

        if let Some(old) = slot.replace(GpuArray { buffer, capacity, address }) {
            log::debug!("Growing {label} from {} to {capacity} bytes", old.capacity);
            self.release.defer(PendingRelease::Buffer(old.buffer));
        }
        Ok(buffer)
    }
}

impl Drop for Mesh {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for array in [state.vertex_buffer.take(), state.index_buffer.take()].into_iter().flatten() {
            self.release.defer(PendingRelease::Buffer(array.buffer));
        }
        // Uploads wait on this fence before returning, so it is never pending here.
        if let Err(error) = self.release.device().destroy_fence(self.upload_fence) {
            log::error!("Failed to destroy mesh upload fence: {error}");
        }
    }
}

fn cube_geometry() -> (Vec<Vertex>, Vec<Index>) {
    // (normal, u axis, v axis) per face; corners are normal/2 ± u/2 ± v/2
    let faces = [
        (Vec3::z(), Vec3::x(), Vec3::y()),
        (-Vec3::z(), -Vec3::x(), Vec3::y()),
        (Vec3::x(), -Vec3::z(), Vec3::y()),
        (-Vec3::x(), Vec3::z(), Vec3::y()),
        (Vec3::y(), Vec3::x(), -Vec3::z()),
        (-Vec3::y(), Vec3::x(), Vec3::z()),
    ];
    let corners = [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (normal, u, v) in faces {
        let base = vertices.len() as Index;
        for (cu, cv) in corners {
            let position = normal * 0.5 + u * cu + v * cv;
            vertices.push(Vertex::new(position, Color::WHITE, Vec2::new(cu + 0.5, 0.5 - cv)));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }

    (vertices, indices)
}
