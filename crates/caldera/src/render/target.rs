//! Offscreen render targets
//!
//! A target owns its color image for its whole lifetime, a depth image when
//! created with depth, and a single-sample resolve image iff it is
//! multisampled. Presentation and sampling read the *presentable* image:
//! the resolve image when there is one, the color image otherwise.

use std::sync::Arc;

use crate::render::commands::{Extent2D, ImageLayout, LoadOp, StoreOp};
use crate::render::device::{Format, ImageDesc, ImageId, ImageUsage, SampleCount};
use crate::render::release::{PendingRelease, ReleaseQueue};
use crate::render::RenderResult;

/// Render target creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTargetInfo {
    /// Size in pixels
    pub extent: Extent2D,
    /// Samples per pixel
    pub samples: SampleCount,
    /// Whether a depth image is allocated
    pub has_depth: bool,
    /// Color format
    pub color_format: Format,
    /// Load behavior used by [`RenderSettings::clear`](super::RenderSettings::clear)
    pub default_load: LoadOp,
    /// Store behavior used by [`RenderSettings::clear`](super::RenderSettings::clear)
    pub default_store: StoreOp,
}

impl RenderTargetInfo {
    /// Single-sample target with depth
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            extent: Extent2D::new(width, height),
            samples: SampleCount::X1,
            has_depth: true,
            color_format: Format::Rgba16Float,
            default_load: LoadOp::Clear,
            default_store: StoreOp::Store,
        }
    }

    /// Set the sample count
    pub fn with_samples(mut self, samples: SampleCount) -> Self {
        self.samples = samples;
        self
    }

    /// Enable or disable the depth image
    pub fn with_depth(mut self, has_depth: bool) -> Self {
        self.has_depth = has_depth;
        self
    }
}

/// Drawable surface: color image, optional depth, optional resolve image
#[derive(Debug)]
pub struct RenderTarget {
    release: Arc<ReleaseQueue>,
    info: RenderTargetInfo,
    color: ImageId,
    depth: Option<ImageId>,
    resolve: Option<ImageId>,
}

impl RenderTarget {
    /// Depth format of every target
    pub const DEPTH_FORMAT: Format = Format::D32Float;

    /// Allocate the images for a target
    pub fn new(release: Arc<ReleaseQueue>, info: RenderTargetInfo) -> RenderResult<Self> {
        let device = release.device().clone();
        let multisampled = info.samples.is_multisampled();

        let color_usage = if multisampled {
            ImageUsage::COLOR_ATTACHMENT | ImageUsage::TRANSFER_SRC
        } else {
            ImageUsage::COLOR_ATTACHMENT | ImageUsage::TRANSFER_SRC | ImageUsage::SAMPLED
        };
        let color = device.create_image(&ImageDesc {
            extent: info.extent,
            format: info.color_format,
            samples: info.samples,
            usage: color_usage,
        })?;

        // From here on, partial construction is cleaned up by Drop.
        let mut target = Self {
            release,
            info,
            color,
            depth: None,
            resolve: None,
        };

        if info.has_depth {
            target.depth = Some(device.create_image(&ImageDesc {
                extent: info.extent,
                format: Self::DEPTH_FORMAT,
                samples: info.samples,
                usage: ImageUsage::DEPTH_ATTACHMENT,
            })?);
        }

        if multisampled {
            target.resolve = Some(device.create_image(&ImageDesc {
                extent: info.extent,
                format: info.color_format,
                samples: SampleCount::X1,
                usage: ImageUsage::COLOR_ATTACHMENT
                    | ImageUsage::TRANSFER_SRC
                    | ImageUsage::TRANSFER_DST
                    | ImageUsage::SAMPLED,
            })?);
        }

        log::debug!(
            "Created render target {}x{} ({} samples, depth: {})",
            info.extent.width,
            info.extent.height,
            info.samples.count(),
            info.has_depth
        );
        Ok(target)
    }

    /// Creation parameters
    pub fn info(&self) -> &RenderTargetInfo {
        &self.info
    }

    /// Size in pixels
    pub fn extent(&self) -> Extent2D {
        self.info.extent
    }

    /// Samples per pixel
    pub fn samples(&self) -> SampleCount {
        self.info.samples
    }

    /// Whether a depth image exists
    pub fn has_depth(&self) -> bool {
        self.info.has_depth
    }

    /// Whether the color image is multisampled
    pub fn is_multisampled(&self) -> bool {
        self.info.samples.is_multisampled()
    }

    /// Image rendered into
    pub fn color_image(&self) -> ImageId {
        self.color
    }

    /// Depth image, if any
    pub fn depth_image(&self) -> Option<ImageId> {
        self.depth
    }

    /// Resolve image, present iff multisampled
    pub fn resolve_image(&self) -> Option<ImageId> {
        self.resolve
    }

    /// Single-sample image holding the final color
    pub fn presentable_image(&self) -> ImageId {
        self.resolve.unwrap_or(self.color)
    }

    /// Layout the color and resolve images rest in between passes
    pub const fn optimal_color_layout() -> ImageLayout {
        ImageLayout::ColorAttachment
    }

    pub(crate) fn release_queue(&self) -> &Arc<ReleaseQueue> {
        &self.release
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        self.release.defer(PendingRelease::Image(self.color));
        if let Some(depth) = self.depth {
            self.release.defer(PendingRelease::Image(depth));
        }
        if let Some(resolve) = self.resolve {
            self.release.defer(PendingRelease::Image(resolve));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::testing::{DeviceEvent, RecordingDevice};

    #[test]
    fn test_resolve_image_iff_multisampled() {
        let device = Arc::new(RecordingDevice::new());
        let release = Arc::new(ReleaseQueue::new(device.clone()));

        let single = RenderTarget::new(release.clone(), RenderTargetInfo::new(64, 32)).unwrap();
        assert!(single.resolve_image().is_none());
        assert_eq!(single.presentable_image(), single.color_image());
        assert!(single.depth_image().is_some());

        let multi = RenderTarget::new(
            release,
            RenderTargetInfo::new(64, 32).with_samples(SampleCount::X4).with_depth(false),
        )
        .unwrap();
        assert!(multi.resolve_image().is_some());
        assert_eq!(multi.presentable_image(), multi.resolve_image().unwrap());
        assert!(multi.depth_image().is_none());
        assert!(!multi.has_depth());
    }

    #[test]
    fn test_images_released_through_queue() {
        let device = Arc::new(RecordingDevice::new());
        let release = Arc::new(ReleaseQueue::new(device.clone()));

        let target = RenderTarget::new(
            release.clone(),
            RenderTargetInfo::new(16, 16).with_samples(SampleCount::X2),
        )
        .unwrap();
        drop(target);

        assert_eq!(release.pending_count(), 3);
        assert_eq!(device.count(|e| matches!(e, DeviceEvent::DestroyImage(_))), 0);

        release.flush().unwrap();
        assert_eq!(device.count(|e| matches!(e, DeviceEvent::DestroyImage(_))), 3);
        assert_eq!(device.live_images(), 0);
    }
}
