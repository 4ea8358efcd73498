//! Virtual-screen bounds and monitor enumeration.
//!
//! Monitors are enumerated once at [`MonitorRegistry::new`] and again only
//! on explicit [`MonitorRegistry::refresh`] -- never implicitly, so a
//! `Region`'s idea of the virtual screen stays stable across a call
//! sequence even if the display server's RandR state is noisy.

use serde::Serialize;

use crate::geometry::{Point, Rectangle};

/// A single physical (or RandR CRTC-backed) monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Monitor {
    pub id: u32,
    pub bounds: Rectangle,
    pub is_primary: bool,
    pub name: String,
}

/// Enumerated monitors plus the derived virtual-screen bounding box.
#[derive(Debug, Clone)]
pub struct MonitorRegistry {
    monitors: Vec<Monitor>,
}

impl MonitorRegistry {
    /// Build a registry from monitors already in raster order from the
    /// display server. Re-numbers ids 0..n so the primary (or, absent an
    /// explicit primary flag, the geometrically leftmost-topmost monitor)
    /// is always id 0.
    pub fn from_monitors(mut raw: Vec<(Rectangle, bool, String)>) -> Self {
        if raw.is_empty() {
            raw.push((Rectangle::new(0, 0, 1920, 1080), true, "virtual-0".to_string()));
        }

        let primary_index = raw
            .iter()
            .position(|(_, is_primary, _)| *is_primary)
            .unwrap_or_else(|| {
                // No server-reported primary: leftmost-topmost wins, ties
                // broken by the order the server handed them to us.
                raw.iter()
                    .enumerate()
                    .min_by_key(|(i, (b, _, _))| (b.y, b.x, *i))
                    .map(|(i, _)| i)
                    .unwrap_or(0)
            });

        let mut ordered: Vec<(Rectangle, String)> = Vec::with_capacity(raw.len());
        ordered.push((raw[primary_index].0, raw[primary_index].2.clone()));
        for (i, (bounds, _, name)) in raw.iter().enumerate() {
            if i != primary_index {
                ordered.push((*bounds, name.clone()));
            }
        }

        let monitors = ordered
            .into_iter()
            .enumerate()
            .map(|(id, (bounds, name))| Monitor {
                id: id as u32,
                bounds,
                is_primary: id == 0,
                name,
            })
            .collect();

        Self { monitors }
    }

    pub fn monitors(&self) -> &[Monitor] {
        &self.monitors
    }

    pub fn primary(&self) -> &Monitor {
        // Invariant: construction always yields a monitor with id 0.
        &self.monitors[0]
    }

    /// First monitor (by id order) whose bounds contain `point`; shared
    /// edges are broken by id order since `Rectangle::contains` is
    /// half-open (right/bottom edges are exclusive).
    pub fn monitor_for_point(&self, point: Point) -> Option<&Monitor> {
        self.monitors.iter().find(|m| m.bounds.contains(point))
    }

    /// Axis-aligned bounding box of every monitor; origin may be negative.
    pub fn virtual_screen_bounds(&self) -> Rectangle {
        self.monitors
            .iter()
            .fold(Rectangle::new(0, 0, 0, 0), |acc, m| acc.union(&m.bounds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_flag_wins_id_zero() {
        let reg = MonitorRegistry::from_monitors(vec![
            (Rectangle::new(1920, 0, 1920, 1080), false, "HDMI-1".into()),
            (Rectangle::new(0, 0, 1920, 1080), true, "eDP-1".into()),
        ]);
        assert_eq!(reg.primary().name, "eDP-1");
        assert!(reg.monitors()[0].is_primary);
        assert_eq!(reg.monitors().iter().filter(|m| m.is_primary).count(), 1);
    }

    #[test]
    fn no_primary_flag_falls_back_to_leftmost_topmost() {
        let reg = MonitorRegistry::from_monitors(vec![
            (Rectangle::new(1920, 0, 1920, 1080), false, "right".into()),
            (Rectangle::new(-1920, 0, 1920, 1080), false, "left".into()),
        ]);
        assert_eq!(reg.primary().name, "left");
    }

    #[test]
    fn point_membership_matches_virtual_bounds() {
        let reg = MonitorRegistry::from_monitors(vec![
            (Rectangle::new(-100, -50, 200, 100), true, "a".into()),
            (Rectangle::new(100, -50, 200, 100), false, "b".into()),
        ]);
        let vbounds = reg.virtual_screen_bounds();
        assert_eq!(vbounds, Rectangle::new(-100, -50, 400, 100));

        for x in -100..300 {
            let p = Point::new(x, 0);
            assert_eq!(
                vbounds.contains(p),
                reg.monitor_for_point(p).is_some(),
                "mismatch at x={x}"
            );
        }
    }

    #[test]
    fn shared_edge_breaks_ties_by_id_order() {
        let reg = MonitorRegistry::from_monitors(vec![
            (Rectangle::new(0, 0, 100, 100), true, "left".into()),
            (Rectangle::new(100, 0, 100, 100), false, "right".into()),
        ]);
        // x=100 belongs to "right" only, since "left"'s right edge (100) is exclusive.
        let m = reg.monitor_for_point(Point::new(100, 50)).unwrap();
        assert_eq!(m.name, "right");
    }
}
