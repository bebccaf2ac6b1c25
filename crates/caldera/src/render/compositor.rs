//! Viewport composition onto a shared render target
//!
//! Each `render_scene` call is one pass into a target. Several passes can
//! share a target within a frame: the first clears, later ones load the
//! previous contents and draw into their own viewport rectangle. Nothing
//! prevents overlapping rectangles; overlap shows up as overdraw.

use crate::foundation::color::Color;
use crate::render::commands::{ColorAttachment, CommandRecorder, DepthAttachment, Extent2D, ImageLayout, LoadOp, Rect2D, StoreOp};
use crate::render::target::RenderTarget;
use crate::render::RenderResult;
use crate::scene::camera::Viewport;
use crate::scene::light::DirectionalLight;

/// Per-pass attachment policy and lighting
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    /// Color used by clears
    pub clear_color: Color,
    /// Color attachment load behavior
    pub color_load: LoadOp,
    /// Color attachment store behavior
    pub color_store: StoreOp,
    /// Depth attachment load behavior
    pub depth_load: LoadOp,
    /// Depth attachment store behavior
    pub depth_store: StoreOp,
    /// Clear just the viewport rectangle after rendering begins
    pub clear_viewport: bool,
    /// Ambient light term
    pub ambient_color: Color,
    /// Directional light
    pub sun: DirectionalLight,
}

impl RenderSettings {
    /// Clear both attachments and store the result
    pub fn clear() -> Self {
        Self {
            clear_color: Color::DEFAULT_CLEAR,
            color_load: LoadOp::Clear,
            color_store: StoreOp::Store,
            depth_load: LoadOp::Clear,
            depth_store: StoreOp::Store,
            clear_viewport: false,
            ambient_color: Color::new(0.1, 0.1, 0.1, 1.0),
            sun: DirectionalLight::default(),
        }
    }

    /// Keep what earlier passes drew
    pub fn load_previous() -> Self {
        Self {
            color_load: LoadOp::Load,
            depth_load: LoadOp::Load,
            ..Self::clear()
        }
    }

    /// Use the target's default load/store policy for color
    pub fn target_defaults(target: &RenderTarget) -> Self {
        Self {
            color_load: target.info().default_load,
            color_store: target.info().default_store,
            ..Self::clear()
        }
    }

    /// Set the clear color
    pub fn with_clear_color(mut self, color: Color) -> Self {
        self.clear_color = color;
        self
    }

    /// Clear the viewport rectangle at the start of the pass
    pub fn with_clear_viewport(mut self) -> Self {
        self.clear_viewport = true;
        self
    }

    /// Set the ambient term
    pub fn with_ambient(mut self, color: Color) -> Self {
        self.ambient_color = color;
        self
    }

    /// Set the directional light
    pub fn with_sun(mut self, sun: DirectionalLight) -> Self {
        self.sun = sun;
        self
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self::clear()
    }
}

/// Everything one pass needs to know about its target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassPlan {
    /// Viewport with zero axes filled in
    pub viewport: Viewport,
    /// Whole target
    pub scissor: Rect2D,
    /// Color attachment
    pub color: ColorAttachment,
    /// Depth attachment, when the target has depth
    pub depth: Option<DepthAttachment>,
    /// Rectangle to clear after rendering begins
    pub clear_rect: Option<Rect2D>,
    /// Render area
    pub extent: Extent2D,
}

impl PassPlan {
    /// Plan a pass of `viewport` into `target`
    pub fn new(target: &RenderTarget, viewport: Viewport, settings: &RenderSettings) -> Self {
        let extent = target.extent();
        let viewport = resolve_viewport(viewport, extent);

        let color = ColorAttachment {
            image: target.color_image(),
            load: settings.color_load,
            store: settings.color_store,
            clear_color: settings.clear_color,
        };

        let depth = target.depth_image().map(|image| DepthAttachment {
            image,
            load: settings.depth_load,
            store: settings.depth_store,
            clear_depth: 1.0,
        });

        let clear_rect = settings
            .clear_viewport
            .then(|| viewport_rect(&viewport, extent))
            .filter(|rect| rect.extent.width > 0 && rect.extent.height > 0);

        Self {
            viewport,
            scissor: Rect2D::full(extent),
            color,
            depth,
            clear_rect,
            extent,
        }
    }
}

/// Fill zero-sized viewport axes with the full target extent
///
/// A zero width resets `x` to 0 and a zero height resets `y` to 0;
/// non-zero axes pass through unchanged.
pub fn resolve_viewport(viewport: Viewport, extent: Extent2D) -> Viewport {
    let mut resolved = viewport;

    if resolved.width == 0.0 {
        resolved.x = 0.0;
        resolved.width = extent.width as f32;
    }
    if resolved.height == 0.0 {
        resolved.y = 0.0;
        resolved.height = extent.height as f32;
    }

    if resolved.x + resolved.width > extent.width as f32 || resolved.y + resolved.height > extent.height as f32 {
        log::warn!("Viewport {resolved:?} extends past the {}x{} target", extent.width, extent.height);
    }
    resolved
}

/// Integer rectangle covered by a resolved viewport, clipped to `extent`
pub fn viewport_rect(viewport: &Viewport, extent: Extent2D) -> Rect2D {
    let x0 = (viewport.x.max(0.0) as u32).min(extent.width);
    let y0 = (viewport.y.max(0.0) as u32).min(extent.height);
    let x1 = ((viewport.x + viewport.width).max(0.0) as u32).min(extent.width);
    let y1 = ((viewport.y + viewport.height).max(0.0) as u32).min(extent.height);

    Rect2D {
        x: x0 as i32,
        y: y0 as i32,
        extent: Extent2D::new(x1.saturating_sub(x0), y1.saturating_sub(y0)),
    }
}

/// Record the multisample resolve of `target`, if it is multisampled
///
/// Both images are moved to transfer layouts for the resolve and returned
/// to their attachment layout afterwards.
pub fn record_resolve(recorder: &mut CommandRecorder, target: &RenderTarget) -> RenderResult<()> {
    let Some(resolve) = target.resolve_image() else {
        return Ok(());
    };
    let color = target.color_image();

    recorder.transition_image(color, ImageLayout::TransferSrc)?;
    recorder.transition_image(resolve, ImageLayout::TransferDst)?;
    recorder.resolve_image(color, resolve)?;
    recorder.transition_image(color, RenderTarget::optimal_color_layout())?;
    recorder.transition_image(resolve, RenderTarget::optimal_color_layout())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::render::device::SampleCount;
    use crate::render::release::ReleaseQueue;
    use crate::render::target::RenderTargetInfo;
    use crate::render::testing::RecordingDevice;
    use crate::render::RenderCommand;

    fn target(info: RenderTargetInfo) -> RenderTarget {
        let device = Arc::new(RecordingDevice::new());
        RenderTarget::new(Arc::new(ReleaseQueue::new(device)), info).unwrap()
    }

    #[test]
    fn test_zero_axes_fill_target() {
        let extent = Extent2D::new(800, 600);

        let full = resolve_viewport(Viewport::new(10.0, 20.0, 0.0, 0.0), extent);
        assert_eq!(full, Viewport::new(0.0, 0.0, 800.0, 600.0));

        let half = resolve_viewport(Viewport::new(400.0, 35.0, 400.0, 0.0), extent);
        assert_eq!(half, Viewport::new(400.0, 0.0, 400.0, 600.0));

        let explicit = Viewport::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(resolve_viewport(explicit, extent), explicit);
    }

    #[test]
    fn test_plan_uses_settings_and_target_depth() {
        let with_depth = target(RenderTargetInfo::new(64, 64));
        let plan = PassPlan::new(&with_depth, Viewport::FULL, &RenderSettings::load_previous());
        assert_eq!(plan.color.load, LoadOp::Load);
        assert_eq!(plan.depth.map(|d| d.load), Some(LoadOp::Load));
        assert_eq!(plan.scissor, Rect2D::full(Extent2D::new(64, 64)));
        assert_eq!(plan.clear_rect, None);

        let without_depth = target(RenderTargetInfo::new(64, 64).with_depth(false));
        let plan = PassPlan::new(
            &without_depth,
            Viewport::new(0.0, 0.0, 32.0, 0.0),
            &RenderSettings::clear().with_clear_viewport(),
        );
        assert!(plan.depth.is_none());
        assert_eq!(
            plan.clear_rect,
            Some(Rect2D {
                x: 0,
                y: 0,
                extent: Extent2D::new(32, 64)
            })
        );
    }

    #[test]
    fn test_clear_rect_clipped_to_target() {
        let extent = Extent2D::new(800, 600);

        let overhanging = viewport_rect(&Viewport::new(700.0, 500.0, 300.0, 200.0), extent);
        assert_eq!(
            overhanging,
            Rect2D {
                x: 700,
                y: 500,
                extent: Extent2D::new(100, 100)
            }
        );

        let inside = Viewport::new(10.0, 20.0, 30.0, 40.0);
        assert_eq!(
            viewport_rect(&inside, extent),
            Rect2D {
                x: 10,
                y: 20,
                extent: Extent2D::new(30, 40)
            }
        );

        let small = target(RenderTargetInfo::new(64, 64));
        let settings = RenderSettings::load_previous().with_clear_viewport();
        let plan = PassPlan::new(&small, Viewport::new(100.0, 0.0, 50.0, 0.0), &settings);
        assert_eq!(plan.clear_rect, None);
    }

    #[test]
    fn test_resolve_recorded_only_when_multisampled() {
        let mut recorder = CommandRecorder::new();
        recorder.begin().unwrap();

        record_resolve(&mut recorder, &target(RenderTargetInfo::new(8, 8))).unwrap();
        assert!(recorder.commands().is_empty());

        let msaa = target(RenderTargetInfo::new(8, 8).with_samples(SampleCount::X4));
        record_resolve(&mut recorder, &msaa).unwrap();

        let resolve = msaa.resolve_image().unwrap();
        assert_eq!(
            recorder.commands(),
            &[
                RenderCommand::TransitionImage { image: msaa.color_image(), layout: ImageLayout::TransferSrc },
                RenderCommand::TransitionImage { image: resolve, layout: ImageLayout::TransferDst },
                RenderCommand::ResolveImage { src: msaa.color_image(), dst: resolve },
                RenderCommand::TransitionImage { image: msaa.color_image(), layout: ImageLayout::ColorAttachment },
                RenderCommand::TransitionImage { image: resolve, layout: ImageLayout::ColorAttachment },
            ]
        );
    }
}
