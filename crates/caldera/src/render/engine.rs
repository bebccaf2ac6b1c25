//! Engine-wide GPU state
//!
//! The [`Engine`] is the entry point: it owns the shared device handle and
//! the deferred-release queue, decides the preferred sample count, and
//! holds the defaults every renderer falls back to.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::foundation::color::Color;
use crate::render::device::{RenderDevice, SampleCount};
use crate::render::material::Material;
use crate::render::mesh::Mesh;
use crate::render::release::ReleaseQueue;
use crate::render::RenderResult;

/// Shared device, release queue and default resources
#[derive(Debug)]
pub struct Engine {
    release: Arc<ReleaseQueue>,
    config: EngineConfig,
    preferred_samples: SampleCount,
    default_material: Arc<Material>,
    cube: Arc<Mesh>,
}

impl Engine {
    /// Create the engine on top of a device
    pub fn new(device: Arc<dyn RenderDevice>, config: EngineConfig) -> RenderResult<Self> {
        log::info!("Initializing engine for '{}'", config.application_name);

        let preferred_samples = device.max_sample_count().min(config.max_samples);
        let release = Arc::new(ReleaseQueue::new(device));

        let default_material =
            Material::color_with(&release, preferred_samples, &config.default_shaders, Color::WHITE)?;
        let cube = Mesh::cube_with(&release)?;

        log::debug!("Preferred sample count: {}", preferred_samples.count());

        Ok(Self {
            release,
            config,
            preferred_samples,
            default_material,
            cube,
        })
    }

    /// Device shared by every resource of this engine
    pub fn device(&self) -> &Arc<dyn RenderDevice> {
        self.release.device()
    }

    /// Queue that defers destruction of dropped GPU objects
    pub fn release_queue(&self) -> &Arc<ReleaseQueue> {
        &self.release
    }

    /// Configuration the engine was created with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// `min(device maximum, config.max_samples)`
    pub fn preferred_samples(&self) -> SampleCount {
        self.preferred_samples
    }

    /// White color material used by mesh nodes without a material
    pub fn default_material(&self) -> &Arc<Material> {
        &self.default_material
    }

    /// Unit cube centered on the origin
    pub fn cube(&self) -> &Arc<Mesh> {
        &self.cube
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::testing::RecordingDevice;

    #[test]
    fn test_preferred_samples_capped_by_config() {
        let device = Arc::new(RecordingDevice::new().with_max_sample_count(SampleCount::X16));

        let capped = Engine::new(device.clone(), EngineConfig::default()).unwrap();
        assert_eq!(capped.preferred_samples(), SampleCount::X8);

        let low = Engine::new(device, EngineConfig::default().with_max_samples(SampleCount::X2)).unwrap();
        assert_eq!(low.preferred_samples(), SampleCount::X2);
    }

    #[test]
    fn test_preferred_samples_capped_by_device() {
        let device = Arc::new(RecordingDevice::new().with_max_sample_count(SampleCount::X4));
        let engine = Engine::new(device, EngineConfig::default()).unwrap();

        assert_eq!(engine.preferred_samples(), SampleCount::X4);
        assert_eq!(engine.default_material().template().samples(), SampleCount::X4);
        assert_eq!(engine.cube().index_count(), 36);
    }
}
