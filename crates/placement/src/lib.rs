use doc_model::{NativePosition, OverlayPosition, RenderedPage, MIN_NATIVE_Y};

pub mod session;

pub use session::{PlacementError, PlacementSession, SessionState};

/// Converts the overlay's top-left render-space corner into the bottom-left native corner of
/// the QR image, keeping it at least [`MIN_NATIVE_Y`] above the page bottom.
pub fn to_native_position(
    overlay: OverlayPosition,
    page: &RenderedPage,
    qr_size: f32,
) -> NativePosition {
    to_native_position_with_margin(overlay, page, qr_size, MIN_NATIVE_Y)
}

pub fn to_native_position_with_margin(
    overlay: OverlayPosition,
    page: &RenderedPage,
    qr_size: f32,
    bottom_margin: f32,
) -> NativePosition {
    let safe_x = overlay.x.max(0.0);
    let safe_y = overlay.y.max(0.0);

    let x = safe_x * page.scale_x();
    let raw_y = page.native_height - safe_y * page.scale_y() - qr_size;
    let y = clamp_native(NativePosition { x, y: raw_y }, bottom_margin).y;

    log::debug!(
        "overlay ({:.1}, {:.1}) -> native ({x:.1}, {y:.1}), raw y {raw_y:.1}",
        overlay.x,
        overlay.y
    );

    NativePosition { x, y }
}

/// Keeps a native anchor on the page: negative x becomes 0 and y is raised to `bottom_margin`.
pub fn clamp_native(position: NativePosition, bottom_margin: f32) -> NativePosition {
    NativePosition { x: position.x.max(0.0), y: position.y.max(bottom_margin) }
}

/// Clamps a top-left position so a `size`-square overlay stays inside `bounds`.
pub fn clamp_position(position: OverlayPosition, bounds: (f32, f32), size: f32) -> OverlayPosition {
    let max_x = (bounds.0 - size).max(0.0);
    let max_y = (bounds.1 - size).max(0.0);

    OverlayPosition { x: position.x.clamp(0.0, max_x), y: position.y.clamp(0.0, max_y) }
}

/// Bounded drag step: `clamp(position + delta, [0, 0], [width - size, height - size])`.
pub fn clamp_drag(
    position: OverlayPosition,
    delta: (f32, f32),
    bounds: (f32, f32),
    size: f32,
) -> OverlayPosition {
    clamp_position(
        OverlayPosition { x: position.x + delta.0, y: position.y + delta.1 },
        bounds,
        size,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a4_preview() -> RenderedPage {
        RenderedPage::new(600.0, 848.0, 595.0, 842.0)
    }

    #[test]
    fn centered_overlay_maps_without_clamp() {
        let native = to_native_position(OverlayPosition::new(260.0, 384.0), &a4_preview(), 80.0);

        assert!((native.x - 257.83).abs() < 0.01, "x was {}", native.x);
        assert!((native.y - 380.72).abs() < 0.01, "y was {}", native.y);
    }

    #[test]
    fn bottom_of_page_clamps_to_margin() {
        let native = to_native_position(OverlayPosition::new(260.0, 840.0), &a4_preview(), 80.0);

        assert_eq!(native.y, 40.0);
        assert!((native.x - 257.83).abs() < 0.01);
    }

    #[test]
    fn negative_coordinates_are_treated_as_zero() {
        let page = a4_preview();
        let negative = to_native_position(OverlayPosition::new(-12.0, -3.5), &page, 80.0);
        let origin = to_native_position(OverlayPosition::new(0.0, 0.0), &page, 80.0);

        assert_eq!(negative, origin);
        assert_eq!(origin, NativePosition::new(0.0, 762.0));
    }

    #[test]
    fn custom_margin_is_respected() {
        let native = to_native_position_with_margin(
            OverlayPosition::new(0.0, 848.0),
            &a4_preview(),
            80.0,
            55.0,
        );

        assert_eq!(native.y, 55.0);
    }

    #[test]
    fn non_uniform_scale_uses_each_axis() {
        let page = RenderedPage::new(100.0, 100.0, 200.0, 400.0);
        let native = to_native_position(OverlayPosition::new(10.0, 10.0), &page, 80.0);

        assert_eq!(native, NativePosition::new(20.0, 400.0 - 40.0 - 80.0));
    }

    #[test]
    fn native_anchor_below_margin_is_raised() {
        assert_eq!(clamp_native(NativePosition::new(100.0, 0.0), 40.0), NativePosition::new(100.0, 40.0));
        assert_eq!(clamp_native(NativePosition::new(-5.0, 300.0), 40.0), NativePosition::new(0.0, 300.0));
    }

    #[test]
    fn drag_is_clamped_to_bounds() {
        let start = OverlayPosition::new(500.0, 10.0);

        let moved = clamp_drag(start, (50.0, -30.0), (600.0, 848.0), 80.0);
        assert_eq!(moved, OverlayPosition::new(520.0, 0.0));

        let inside = clamp_drag(start, (-20.0, 15.0), (600.0, 848.0), 80.0);
        assert_eq!(inside, OverlayPosition::new(480.0, 25.0));
    }

    #[test]
    fn clamp_handles_bounds_smaller_than_overlay() {
        let clamped = clamp_position(OverlayPosition::new(30.0, 30.0), (50.0, 50.0), 80.0);

        assert_eq!(clamped, OverlayPosition::new(0.0, 0.0));
    }
}

#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    fn page_and_overlay() -> impl Strategy<Value = (RenderedPage, OverlayPosition)> {
        (100.0f32..2000.0, 100.0f32..2000.0, 100.0f32..2000.0, 100.0f32..2000.0)
            .prop_flat_map(|(rw, rh, nw, nh)| {
                (Just(RenderedPage::new(rw, rh, nw, nh)), 0.0f32..=rw, 0.0f32..=rh)
            })
            .prop_map(|(page, x, y)| (page, OverlayPosition::new(x, y)))
    }

    proptest! {
        #[test]
        fn native_position_stays_on_page((page, overlay) in page_and_overlay()) {
            let native = to_native_position(overlay, &page, 80.0);

            prop_assert!(native.x >= 0.0);
            prop_assert!(native.x <= page.native_width * (1.0 + 1e-5));
            prop_assert!(native.y >= MIN_NATIVE_Y);
        }

        #[test]
        fn negative_overlay_matches_clamped_overlay(
            (page, overlay) in page_and_overlay(),
            dx in -500.0f32..0.0,
            dy in -500.0f32..0.0,
        ) {
            let negative_x = OverlayPosition::new(dx, overlay.y);
            let negative_y = OverlayPosition::new(overlay.x, dy);

            prop_assert_eq!(
                to_native_position(negative_x, &page, 80.0),
                to_native_position(OverlayPosition::new(0.0, overlay.y), &page, 80.0)
            );
            prop_assert_eq!(
                to_native_position(negative_y, &page, 80.0),
                to_native_position(OverlayPosition::new(overlay.x, 0.0), &page, 80.0)
            );
        }

        #[test]
        fn bottom_of_page_lands_exactly_on_margin(
            (page, overlay) in page_and_overlay(),
            lift in 0.0f32..1.0,
        ) {
            let bottom = OverlayPosition::new(overlay.x, page.rendered_height - lift);
            let native = to_native_position(bottom, &page, 80.0);

            prop_assert_eq!(native.y, MIN_NATIVE_Y);
        }

        #[test]
        fn drag_never_leaves_bounds(
            (page, overlay) in page_and_overlay(),
            dx in -3000.0f32..3000.0,
            dy in -3000.0f32..3000.0,
        ) {
            let bounds = (page.rendered_width, page.rendered_height);
            let moved = clamp_drag(overlay, (dx, dy), bounds, 80.0);

            prop_assert!(moved.x >= 0.0 && moved.x <= (bounds.0 - 80.0).max(0.0));
            prop_assert!(moved.y >= 0.0 && moved.y <= (bounds.1 - 80.0).max(0.0));
        }
    }
}
