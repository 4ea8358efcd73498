//! End-to-end scenarios against a stub `Display`, covering the literal
//! inputs spec'd as S1-S6. Each stub is backed by a plain in-memory
//! `Image`; no real X server is touched.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use approx::assert_abs_diff_eq;
use parking_lot::RwLock;

use zikuli_core::display::{Button, Display};
use zikuli_core::error::ZikuliError;
use zikuli_core::geometry::{Point, Rectangle};
use zikuli_core::image::{Image, PixelFormat};
use zikuli_core::monitor::MonitorRegistry;
use zikuli_core::region::{FindFailedResponse, Pattern, Region};

fn solid(w: u32, h: u32, rgba: [u8; 4]) -> Image {
    let mut data = Vec::with_capacity((w * h * 4) as usize);
    for _ in 0..(w * h) {
        data.extend_from_slice(&rgba);
    }
    Image::new(data, w, h, PixelFormat::Rgba).unwrap()
}

fn patch(base: &mut Image, rect: Rectangle, rgba: [u8; 4]) {
    for y in 0..rect.h {
        for x in 0..rect.w {
            base.set_pixel((rect.x as u32) + x, (rect.y as u32) + y, &rgba);
        }
    }
}

/// A stub `Display` whose frame can be swapped mid-test (for the `wait`
/// scenario) and which records pointer position / click count.
struct StubDisplay {
    frame: RwLock<Image>,
    pointer: Mutex<Point>,
    moves: AtomicU32,
    clicks: AtomicU32,
    connected: AtomicBool,
}

impl StubDisplay {
    fn new(frame: Image) -> Self {
        Self {
            frame: RwLock::new(frame),
            pointer: Mutex::new(Point::ZERO),
            moves: AtomicU32::new(0),
            clicks: AtomicU32::new(0),
            connected: AtomicBool::new(true),
        }
    }

    fn replace_frame(&self, frame: Image) {
        *self.frame.write() = frame;
    }
}

impl Display for StubDisplay {
    fn capture(&self, rect: Rectangle) -> Result<Image, ZikuliError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ZikuliError::Display { cause: "connection lost".into() });
        }
        self.frame.read().sub_image(rect)
    }

    fn move_mouse_absolute(&self, point: Point) -> Result<(), ZikuliError> {
        *self.pointer.lock().unwrap() = point;
        self.moves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn button_event(&self, _button: Button, down: bool) -> Result<(), ZikuliError> {
        if down {
            self.clicks.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn key_event(&self, _keycode: u8, _down: bool) -> Result<(), ZikuliError> {
        Ok(())
    }

    fn query_pointer(&self) -> Result<Point, ZikuliError> {
        Ok(*self.pointer.lock().unwrap())
    }

    fn monitors(&self) -> Result<MonitorRegistry, ZikuliError> {
        Ok(MonitorRegistry::from_monitors(vec![(Rectangle::new(0, 0, 1920, 1080), true, "stub".into())]))
    }
}

/// S1: exact-match find.
#[test]
fn s1_exact_match_find() {
    let mut frame = solid(100, 100, [50, 150, 200, 255]);
    patch(&mut frame, Rectangle::new(30, 40, 10, 10), [255, 0, 0, 255]);
    let display = std::sync::Arc::new(StubDisplay::new(frame));
    let region = Region::new(Rectangle::new(0, 0, 100, 100), display);

    let pattern = Pattern::new("red-patch", solid(10, 10, [255, 0, 0, 255]));
    let m = region.find(&pattern).expect("find should not error").expect("pattern should be found");

    assert_eq!(m.bounds(), Rectangle::new(30, 40, 10, 10));
    assert!(m.score() >= 0.999, "score was {}", m.score());
}

/// S2: no match in the source surfaces `FindFailed` quickly.
#[test]
fn s2_no_match_returns_find_failed() {
    let mut frame = solid(100, 100, [50, 150, 200, 255]);
    patch(&mut frame, Rectangle::new(30, 40, 10, 10), [255, 0, 0, 255]);
    let display = std::sync::Arc::new(StubDisplay::new(frame));
    let region = Region::new(Rectangle::new(0, 0, 100, 100), display);

    let pattern = Pattern::new("green-patch", solid(10, 10, [0, 255, 0, 255])).similar(0.9);

    let start = Instant::now();
    let err = region.find(&pattern).expect_err("no green patch exists in the source");
    let elapsed = start.elapsed();

    match err {
        ZikuliError::FindFailed { elapsed_ms, .. } => assert!(elapsed_ms < 1000, "elapsed_ms was {elapsed_ms}"),
        other => panic!("expected FindFailed, got {other:?}"),
    }
    assert!(elapsed < Duration::from_secs(1));
}

/// S3: an all-black target takes the plain-color/invert path and still
/// finds a planted all-zero block.
#[test]
fn s3_plain_color_black_path() {
    let mut frame = solid(50, 50, [123, 77, 201, 255]);
    patch(&mut frame, Rectangle::new(5, 5, 8, 8), [0, 0, 0, 255]);
    let display = std::sync::Arc::new(StubDisplay::new(frame));
    let region = Region::new(Rectangle::new(0, 0, 50, 50), display);

    let pattern = Pattern::new("black-block", solid(8, 8, [0, 0, 0, 255]));
    let m = region
        .find(&pattern)
        .expect("find should not error")
        .expect("black block should be found via the inverted sqdiff path");
    assert!(m.score() >= 0.95, "score was {}", m.score());
    assert_eq!(m.bounds(), Rectangle::new(5, 5, 8, 8));
}

/// S4: findAll reports every disjoint occurrence, scores descending.
#[test]
fn s4_find_all_ordering() {
    let mut frame = solid(200, 200, [5, 5, 5, 255]);
    let squares = [Rectangle::new(10, 10, 12, 12), Rectangle::new(80, 50, 12, 12), Rectangle::new(150, 120, 12, 12)];
    for r in &squares {
        patch(&mut frame, *r, [220, 30, 30, 255]);
    }
    let display = std::sync::Arc::new(StubDisplay::new(frame));
    let region = Region::new(Rectangle::new(0, 0, 200, 200), display);

    let pattern = Pattern::new("red-square", solid(12, 12, [220, 30, 30, 255]));
    let matches = region.find_all(&pattern).expect("find_all should succeed");

    assert_eq!(matches.len(), 3);
    for w in matches.windows(2) {
        assert!(w[0].score() >= w[1].score(), "scores must be non-increasing");
    }
    let mut bounds: Vec<Rectangle> = matches.iter().map(|m| m.bounds()).collect();
    bounds.sort_by_key(|r| (r.x, r.y));
    assert_eq!(bounds, vec![squares[0], squares[1], squares[2]]);
}

/// S5: `wait` succeeds once an external mutation plants the target.
#[test]
fn s5_wait_succeeds_after_external_mutation() {
    let empty = solid(100, 100, [10, 10, 10, 255]);
    let display = std::sync::Arc::new(StubDisplay::new(empty));
    let region = Region::new(Rectangle::new(0, 0, 100, 100), display.clone());

    let d2 = display.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(500));
        let mut frame = solid(100, 100, [10, 10, 10, 255]);
        patch(&mut frame, Rectangle::new(40, 40, 12, 12), [0, 200, 255, 255]);
        d2.replace_frame(frame);
    });

    let pattern = Pattern::new("cyan-box", solid(12, 12, [0, 200, 255, 255]));
    let start = Instant::now();
    let m = region
        .wait(&pattern, Some(Duration::from_secs(2)))
        .expect("wait should not error")
        .expect("target appears within budget");
    let elapsed_ms = start.elapsed().as_millis();

    assert_eq!(m.bounds(), Rectangle::new(40, 40, 12, 12));
    assert!(elapsed_ms >= 450, "elapsed_ms was {elapsed_ms} (too fast)");
    assert!(elapsed_ms <= 1500, "elapsed_ms was {elapsed_ms} (too slow)");
}

/// S6: a target-less click lands on the region's center.
#[test]
fn s6_click_with_no_target_hits_region_center() {
    let frame = solid(400, 400, [1, 1, 1, 255]);
    let display = std::sync::Arc::new(StubDisplay::new(frame));
    let region = Region::new(Rectangle::new(100, 100, 200, 200), display.clone());

    let result = region.click(None).expect("target-less click never errors");
    assert!(result.is_none(), "a target-less click has no Match to report");

    let pointer = display.query_pointer().unwrap();
    assert_eq!(pointer, Point::new(200, 200));
    assert_eq!(display.clicks.load(Ordering::SeqCst), 1);
}

/// Still-there idempotence (invariant 6): repeating a successful find on
/// an unchanged source returns the same bounds/score.
#[test]
fn still_there_find_is_idempotent() {
    let mut frame = solid(150, 150, [30, 30, 30, 255]);
    patch(&mut frame, Rectangle::new(60, 70, 14, 14), [0, 240, 0, 255]);
    let display = std::sync::Arc::new(StubDisplay::new(frame));
    let region = Region::new(Rectangle::new(0, 0, 150, 150), display);

    let pattern = Pattern::new("green-box", solid(14, 14, [0, 240, 0, 255]));
    let first = region.find(&pattern).unwrap().unwrap();
    let second = region.find(&pattern).unwrap().unwrap();

    assert_eq!(first.bounds(), second.bounds());
    assert_abs_diff_eq!(first.score(), second.score(), epsilon = 1e-6);
}

/// `skip` policy degrades a would-be abort into the documented
/// sentinel behavior at the `exists` layer, which never aborts.
#[test]
fn exists_never_applies_find_failed_response() {
    let frame = solid(60, 60, [9, 9, 9, 255]);
    let display = std::sync::Arc::new(StubDisplay::new(frame));
    let mut region = Region::new(Rectangle::new(0, 0, 60, 60), display);
    region.set_find_failed_response(FindFailedResponse::Abort);

    let pattern = Pattern::new("missing", solid(10, 10, [255, 0, 0, 255])).similar(0.95);
    let result = region.exists(&pattern, Some(Duration::from_millis(50))).expect("exists never errors");
    assert!(result.is_none());
}
