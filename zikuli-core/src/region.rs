//! Patterns, matches, and the `Region` state machine (§4.5).
//!
//! A `Region` is a rectangle on some [`Display`] plus a similarity
//! threshold and a "still-there" hint left by its last successful find.
//! `find`/`wait`/`exists`/`find_all` drive [`crate::pyramid`]; the click
//! and type operations drive the `Display`'s synthetic input directly.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::display::{Button, Display};
use crate::error::ZikuliError;
use crate::geometry::{Point, Rectangle};
use crate::image::Image;
use crate::pyramid;

/// Default similarity floor for a `Pattern` constructed without an
/// explicit `.similar(...)` call.
pub const DEFAULT_SIMILARITY: f64 = 0.7;

/// Default budget for `find`/`click`/etc. before a `FindFailed`.
pub const DEFAULT_AUTO_WAIT_TIMEOUT: Duration = Duration::from_secs(3);

/// Delay between successive capture-and-match attempts inside `wait`,
/// for a `Region` that hasn't overridden it via `set_poll_interval`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Dwell between a pointer move and a button event, and between the two
/// presses of a double-click, or at each stop of a drag-drop.
const CLICK_DWELL: Duration = Duration::from_millis(50);

/// A named template image plus the similarity floor to match it at.
#[derive(Debug, Clone)]
pub struct Pattern {
    image: Arc<Image>,
    name: String,
    similarity: f64,
}

impl Pattern {
    /// Wrap `image` (labeled `name` for error messages) at the default
    /// similarity.
    pub fn new(name: impl Into<String>, image: Image) -> Self {
        Self {
            image: Arc::new(image),
            name: name.into(),
            similarity: DEFAULT_SIMILARITY,
        }
    }

    /// Return a copy of this pattern with a different similarity floor.
    pub fn similar(&self, similarity: f64) -> Self {
        Self {
            similarity: similarity.clamp(0.0, 1.0),
            ..self.clone()
        }
    }

    /// Shorthand for `similar(1.0)` (exact, modulo floating-point
    /// rounding in the matcher).
    pub fn exact(&self) -> Self {
        self.similar(1.0)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn similarity(&self) -> f64 {
        self.similarity
    }

    pub fn image(&self) -> &Image {
        &self.image
    }
}

/// A located occurrence of a `Pattern`: the matched rectangle, the score
/// it was found at, and the target point clicks resolve to (the
/// rectangle's center, unless overridden).
#[derive(Debug, Clone)]
pub struct Match {
    bounds: Rectangle,
    score: f64,
    target_offset: Point,
}

impl Match {
    fn new(bounds: Rectangle, score: f64) -> Self {
        Self {
            bounds,
            score,
            target_offset: Point::ZERO,
        }
    }

    pub fn bounds(&self) -> Rectangle {
        self.bounds
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    /// Point an input operation targets: the match's center, shifted by
    /// any `set_target_offset` call.
    pub fn target(&self) -> Point {
        self.bounds.center().offset(self.target_offset.x, self.target_offset.y)
    }

    /// Re-target clicks on this match to an offset from its center,
    /// rather than the center itself.
    pub fn set_target_offset(&mut self, dx: i32, dy: i32) {
        self.target_offset = Point::new(dx, dy);
    }
}

/// What a `find`-family call does when no match is found. Checked when
/// the call is made, not when the `Region` (or pattern) was constructed,
/// so a script can change policy mid-run and have it take effect
/// immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindFailedResponse {
    /// Return `Err(ZikuliError::FindFailed { .. })` (the default).
    Abort,
    /// Return `Ok(None)`-shaped behavior: callers see an empty result
    /// rather than an error.
    Skip,
    /// Not meaningful without a UI; treated identically to `Abort` here.
    Prompt,
    /// Retry the search once more before giving up.
    Retry,
    /// Call the process-wide handler registered via
    /// [`set_find_failed_handler`], falling back to `Abort` if none was
    /// registered.
    Handle,
}

impl std::fmt::Display for FindFailedResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FindFailedResponse::Abort => "abort",
            FindFailedResponse::Skip => "skip",
            FindFailedResponse::Prompt => "prompt",
            FindFailedResponse::Retry => "retry",
            FindFailedResponse::Handle => "handle",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for FindFailedResponse {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(FindFailedResponse::Abort),
            "skip" => Ok(FindFailedResponse::Skip),
            "prompt" => Ok(FindFailedResponse::Prompt),
            "retry" => Ok(FindFailedResponse::Retry),
            "handle" => Ok(FindFailedResponse::Handle),
            _ => Err(format!("unknown find-failed response: {s} (use: abort, skip, prompt, retry, handle)")),
        }
    }
}

static FIND_FAILED_RESPONSE: OnceLock<Mutex<FindFailedResponse>> = OnceLock::new();
static FIND_FAILED_HANDLER: OnceLock<Mutex<Option<Arc<dyn Fn(&str) + Send + Sync>>>> = OnceLock::new();

fn response_cell() -> &'static Mutex<FindFailedResponse> {
    FIND_FAILED_RESPONSE.get_or_init(|| Mutex::new(FindFailedResponse::Abort))
}

fn handler_cell() -> &'static Mutex<Option<Arc<dyn Fn(&str) + Send + Sync>>> {
    FIND_FAILED_HANDLER.get_or_init(|| Mutex::new(None))
}

/// Process-wide default, applied to every `Region` that hasn't been
/// given its own override via [`Region::set_find_failed_response`].
pub fn set_find_failed_response(response: FindFailedResponse) {
    *response_cell().lock() = response;
}

pub fn find_failed_response() -> FindFailedResponse {
    *response_cell().lock()
}

/// Register the callback `FindFailedResponse::Handle` invokes.
pub fn set_find_failed_handler(handler: impl Fn(&str) + Send + Sync + 'static) {
    *handler_cell().lock() = Some(Arc::new(handler));
}

/// A rectangle on a `Display`, with its own similarity/timeout policy
/// and a memory of where its last successful match was.
pub struct Region {
    bounds: Rectangle,
    display: Arc<dyn Display + Send + Sync>,
    auto_wait_timeout: Duration,
    poll_interval: Duration,
    find_failed_response: Option<FindFailedResponse>,
    last_seen: Mutex<Option<Rectangle>>,
}

impl Region {
    pub fn new(bounds: Rectangle, display: Arc<dyn Display + Send + Sync>) -> Self {
        Self {
            bounds,
            display,
            auto_wait_timeout: DEFAULT_AUTO_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            find_failed_response: None,
            last_seen: Mutex::new(None),
        }
    }

    pub fn bounds(&self) -> Rectangle {
        self.bounds
    }

    pub fn set_auto_wait_timeout(&mut self, timeout: Duration) {
        self.auto_wait_timeout = timeout;
    }

    pub fn auto_wait_timeout(&self) -> Duration {
        self.auto_wait_timeout
    }

    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Override the process-wide `FindFailedResponse` for this region
    /// only.
    pub fn set_find_failed_response(&mut self, response: FindFailedResponse) {
        self.find_failed_response = Some(response);
    }

    fn effective_response(&self) -> FindFailedResponse {
        self.find_failed_response.unwrap_or_else(find_failed_response)
    }

    // -- geometric derivation -------------------------------------------------

    pub fn offset(&self, dx: i32, dy: i32) -> Region {
        Region::new(self.bounds.offset(dx, dy), self.display.clone())
    }

    pub fn grow(&self, n: i32) -> Region {
        Region::new(self.bounds.grow(n), self.display.clone())
    }

    /// A region expanded by `range` pixels in every direction -- the
    /// neighborhood SikuliX calls `nearby`.
    pub fn nearby(&self, range: i32) -> Region {
        self.grow(range)
    }

    pub fn above(&self, height: u32) -> Region {
        let h = height as i32;
        Region::new(Rectangle::new(self.bounds.x, self.bounds.y - h, self.bounds.w, height), self.display.clone())
    }

    pub fn below(&self, height: u32) -> Region {
        Region::new(
            Rectangle::new(self.bounds.x, self.bounds.bottom(), self.bounds.w, height),
            self.display.clone(),
        )
    }

    pub fn left(&self, width: u32) -> Region {
        let w = width as i32;
        Region::new(Rectangle::new(self.bounds.x - w, self.bounds.y, width, self.bounds.h), self.display.clone())
    }

    pub fn right(&self, width: u32) -> Region {
        Region::new(
            Rectangle::new(self.bounds.right(), self.bounds.y, width, self.bounds.h),
            self.display.clone(),
        )
    }

    // -- finding ---------------------------------------------------------------

    fn capture(&self) -> Result<Image, ZikuliError> {
        self.display.capture(self.bounds)
    }

    /// One attempt: capture this region and run a pyramid search for
    /// `pattern`, consulting and updating the still-there cache.
    fn try_find(&self, pattern: &Pattern) -> Result<Option<Match>, ZikuliError> {
        let frame = self.capture()?;
        let last_seen = *self.last_seen.lock();
        let found = pyramid::find_best(&frame, pattern.image(), pattern.similarity(), None, last_seen);

        Ok(found.map(|m| {
            let abs = m.location;
            let rect = Rectangle::new(self.bounds.x + abs.x, self.bounds.y + abs.y, pattern.image().width(), pattern.image().height());
            *self.last_seen.lock() = Some(Rectangle::new(abs.x, abs.y, rect.w, rect.h));
            Match::new(rect, m.score)
        }))
    }

    fn find_failed(&self, pattern: &Pattern, elapsed: Duration) -> Result<Option<Match>, ZikuliError> {
        let err = ZikuliError::FindFailed {
            target: pattern.name().to_string(),
            region: self.bounds,
            elapsed_ms: elapsed.as_millis() as u64,
        };
        match self.effective_response() {
            FindFailedResponse::Abort | FindFailedResponse::Prompt => Err(err),
            FindFailedResponse::Skip => Ok(None),
            FindFailedResponse::Retry => {
                // One extra attempt; still nothing means abort after all.
                match self.try_find(pattern)? {
                    Some(m) => Ok(Some(m)),
                    None => Err(err),
                }
            }
            FindFailedResponse::Handle => {
                if let Some(handler) = handler_cell().lock().clone() {
                    handler(pattern.name());
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Single-shot find: one capture-and-match attempt, no polling.
    ///
    /// Returns `Ok(None)` rather than erroring when `find_failed_policy`
    /// is `Skip` (or `Handle` with a registered handler) -- the "sentinel"
    /// behavior §4.5 requires, instead of reconverting that sentinel back
    /// into a synthesized `FindFailed`.
    pub fn find(&self, pattern: &Pattern) -> Result<Option<Match>, ZikuliError> {
        let start = Instant::now();
        match self.try_find(pattern)? {
            Some(m) => Ok(Some(m)),
            None => self.find_failed(pattern, start.elapsed()),
        }
    }

    /// Poll until `pattern` is found or `timeout` elapses (the region's
    /// `auto_wait_timeout` if `timeout` is `None`). Same `Skip`/`Handle`
    /// sentinel behavior as `find` once the deadline is reached.
    pub fn wait(&self, pattern: &Pattern, timeout: Option<Duration>) -> Result<Option<Match>, ZikuliError> {
        let budget = timeout.unwrap_or(self.auto_wait_timeout);
        let start = Instant::now();
        loop {
            if let Some(m) = self.try_find(pattern)? {
                return Ok(Some(m));
            }
            if start.elapsed() >= budget {
                log::debug!("wait({}): budget of {budget:?} exhausted with no match", pattern.name());
                return self.find_failed(pattern, start.elapsed());
            }
            log::debug!("wait({}): no match yet, polling again in {:?}", pattern.name(), self.poll_interval.min(budget));
            std::thread::sleep(self.poll_interval.min(budget));
        }
    }

    /// Like `wait`, but never triggers `FindFailedResponse`: `None`
    /// simply means "not there within the budget."
    pub fn exists(&self, pattern: &Pattern, timeout: Option<Duration>) -> Result<Option<Match>, ZikuliError> {
        let budget = timeout.unwrap_or(self.auto_wait_timeout);
        let start = Instant::now();
        loop {
            if let Some(m) = self.try_find(pattern)? {
                return Ok(Some(m));
            }
            if start.elapsed() >= budget {
                return Ok(None);
            }
            std::thread::sleep(self.poll_interval.min(budget));
        }
    }

    /// Every non-overlapping occurrence of `pattern` in this region,
    /// best score first.
    pub fn find_all(&self, pattern: &Pattern) -> Result<Vec<Match>, ZikuliError> {
        let frame = self.capture()?;
        let mut matches: Vec<Match> = pyramid::find_all(&frame, pattern.image(), pattern.similarity(), None)
            .into_iter()
            .map(|m| {
                let rect = Rectangle::new(
                    self.bounds.x + m.location.x,
                    self.bounds.y + m.location.y,
                    pattern.image().width(),
                    pattern.image().height(),
                );
                Match::new(rect, m.score)
            })
            .collect();
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        Ok(matches)
    }

    // -- input -------------------------------------------------------------

    /// Move, dwell 50ms, then fire `times` button-down/button-up pairs,
    /// each separated by a 50ms inter-click delay (§4.5).
    fn click_at(&self, point: Point, button: Button, times: u32) -> Result<(), ZikuliError> {
        self.display.move_mouse_absolute(point)?;
        std::thread::sleep(CLICK_DWELL);
        for i in 0..times {
            self.display.button_event(button, true)?;
            self.display.button_event(button, false)?;
            if i + 1 < times {
                std::thread::sleep(CLICK_DWELL);
            }
        }
        Ok(())
    }

    /// Resolve `target` to a click point and click it: `None` clicks this
    /// region's center (`click(null)` in §4.5/S6), `Some(pattern)` finds
    /// it first. A `Skip`-policy miss on `Some(pattern)` is a no-op --
    /// returns `Ok(None)` without moving the pointer.
    fn click_target(&self, target: Option<&Pattern>, button: Button, times: u32) -> Result<Option<Match>, ZikuliError> {
        let (point, matched) = match target {
            None => (self.bounds.center(), None),
            Some(pattern) => match self.find(pattern)? {
                Some(m) => (m.target(), Some(m)),
                None => return Ok(None),
            },
        };
        self.click_at(point, button, times)?;
        Ok(matched)
    }

    /// Left-click `target`, or this region's center if `target` is `None`.
    pub fn click(&self, target: Option<&Pattern>) -> Result<Option<Match>, ZikuliError> {
        self.click_target(target, Button::Left, 1)
    }

    /// Like `click`, with an explicit button -- the entry point the CLI
    /// uses for `--button right|middle` without a hand-rolled bypass.
    pub fn click_with_button(&self, target: Option<&Pattern>, button: Button) -> Result<Option<Match>, ZikuliError> {
        self.click_target(target, button, 1)
    }

    pub fn double_click(&self, target: Option<&Pattern>) -> Result<Option<Match>, ZikuliError> {
        self.click_target(target, Button::Left, 2)
    }

    pub fn right_click(&self, target: Option<&Pattern>) -> Result<Option<Match>, ZikuliError> {
        self.click_target(target, Button::Right, 1)
    }

    /// Press at `from`'s match, hold, move to `to`'s match, and release,
    /// dwelling 50ms at each stop. A `Skip`-policy miss on either pattern
    /// is a no-op: releases the button if already held, and returns
    /// `Ok(None)`.
    pub fn drag_drop(&self, from: &Pattern, to: &Pattern) -> Result<Option<(Match, Match)>, ZikuliError> {
        let Some(from_match) = self.find(from)? else {
            return Ok(None);
        };
        self.display.move_mouse_absolute(from_match.target())?;
        std::thread::sleep(CLICK_DWELL);
        self.display.button_event(Button::Left, true)?;
        std::thread::sleep(CLICK_DWELL);

        let to_match = match self.find(to)? {
            Some(m) => m,
            None => {
                self.display.button_event(Button::Left, false)?;
                return Ok(None);
            }
        };
        self.display.move_mouse_absolute(to_match.target())?;
        std::thread::sleep(CLICK_DWELL);
        self.display.button_event(Button::Left, false)?;

        Ok(Some((from_match, to_match)))
    }

    /// Type `text` at the current keyboard focus (no click first --
    /// callers click a field before typing into it).
    pub fn type_text(&self, text: &str) -> Result<(), ZikuliError> {
        for ch in text.chars() {
            let (keycode, needs_shift) = keycode_for_char(ch).ok_or_else(|| ZikuliError::InputError {
                event_kind: "type".into(),
                cause: format!("no keycode mapping for character {ch:?}"),
            })?;
            if needs_shift {
                self.display.key_event(SHIFT_L_KEYCODE, true)?;
            }
            self.display.key_event(keycode, true)?;
            self.display.key_event(keycode, false)?;
            if needs_shift {
                self.display.key_event(SHIFT_L_KEYCODE, false)?;
            }
        }
        Ok(())
    }
}

const SHIFT_L_KEYCODE: u8 = 50;

/// US QWERTY keycode table (X11 keycode = evdev scancode + 8). Covers
/// ASCII letters, digits, common punctuation, space, and enter -- enough
/// for the typical `type_text` payload. Unmapped characters (anything
/// outside ASCII, or symbols requiring a dead-key sequence) return
/// `None` and surface as an `InputError`.
fn keycode_for_char(ch: char) -> Option<(u8, bool)> {
    let lower = ch.to_ascii_lowercase();
    let base = match lower {
        'a' => 38, 'b' => 56, 'c' => 54, 'd' => 40, 'e' => 26, 'f' => 41, 'g' => 42,
        'h' => 43, 'i' => 31, 'j' => 44, 'k' => 45, 'l' => 46, 'm' => 58, 'n' => 57,
        'o' => 32, 'p' => 33, 'q' => 24, 'r' => 27, 's' => 39, 't' => 28, 'u' => 30,
        'v' => 55, 'w' => 25, 'x' => 53, 'y' => 29, 'z' => 52,
        '1' => 10, '2' => 11, '3' => 12, '4' => 13, '5' => 14,
        '6' => 15, '7' => 16, '8' => 17, '9' => 18, '0' => 19,
        ' ' => 65,
        '\n' => 36,
        '\t' => 23,
        '.' => 60,
        ',' => 59,
        '-' => 20,
        '/' => 61,
        ';' => 47,
        '\'' => 48,
        _ => return None,
    };
    let shift = ch.is_ascii_uppercase();
    Some((base, shift))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::PixelFormat;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubDisplay {
        frame: Image,
        moves: AtomicU32,
    }

    impl Display for StubDisplay {
        fn capture(&self, rect: Rectangle) -> Result<Image, ZikuliError> {
            self.frame.sub_image(rect)
        }
        fn move_mouse_absolute(&self, _point: Point) -> Result<(), ZikuliError> {
            self.moves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn button_event(&self, _button: Button, _down: bool) -> Result<(), ZikuliError> {
            Ok(())
        }
        fn key_event(&self, _keycode: u8, _down: bool) -> Result<(), ZikuliError> {
            Ok(())
        }
        fn query_pointer(&self) -> Result<Point, ZikuliError> {
            Ok(Point::ZERO)
        }
        fn monitors(&self) -> Result<crate::monitor::MonitorRegistry, ZikuliError> {
            Ok(crate::monitor::MonitorRegistry::from_monitors(vec![]))
        }
    }

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

    #[test]
    fn find_locates_planted_pattern() {
        let mut frame = solid(100, 100, [10, 10, 10, 255]);
        patch(&mut frame, Rectangle::new(20, 30, 16, 16), [250, 250, 0, 255]);
        let display = Arc::new(StubDisplay { frame, moves: AtomicU32::new(0) });
        let region = Region::new(Rectangle::new(0, 0, 100, 100), display);

        let pattern = Pattern::new("yellow-box", solid(16, 16, [250, 250, 0, 255]));
        let m = region.find(&pattern).unwrap().unwrap();
        assert_eq!(m.bounds(), Rectangle::new(20, 30, 16, 16));
    }

    #[test]
    fn find_failed_skip_is_a_sentinel_not_an_error() {
        let frame = solid(50, 50, [10, 10, 10, 255]);
        let display = Arc::new(StubDisplay { frame, moves: AtomicU32::new(0) });
        let mut region = Region::new(Rectangle::new(0, 0, 50, 50), display);
        region.set_find_failed_response(FindFailedResponse::Skip);

        let pattern = Pattern::new("missing", solid(10, 10, [255, 0, 0, 255])).similar(0.99);
        let result = region.find(&pattern).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn find_failed_retry_still_aborts_after_one_extra_attempt() {
        let frame = solid(50, 50, [10, 10, 10, 255]);
        let display = Arc::new(StubDisplay { frame, moves: AtomicU32::new(0) });
        let mut region = Region::new(Rectangle::new(0, 0, 50, 50), display);
        region.set_find_failed_response(FindFailedResponse::Retry);

        let pattern = Pattern::new("missing", solid(10, 10, [255, 0, 0, 255])).similar(0.99);
        let err = region.find(&pattern).unwrap_err();
        assert!(matches!(err, ZikuliError::FindFailed { .. }));
    }

    #[test]
    fn click_moves_mouse_to_match_center() {
        let mut frame = solid(100, 100, [10, 10, 10, 255]);
        patch(&mut frame, Rectangle::new(0, 0, 10, 10), [0, 255, 0, 255]);
        let display = Arc::new(StubDisplay { frame, moves: AtomicU32::new(0) });
        let region = Region::new(Rectangle::new(0, 0, 100, 100), display.clone());

        let pattern = Pattern::new("corner", solid(10, 10, [0, 255, 0, 255]));
        region.click(Some(&pattern)).unwrap();
        assert_eq!(display.moves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn click_with_no_target_hits_region_center() {
        let frame = solid(200, 200, [1, 1, 1, 255]);
        let display = Arc::new(StubDisplay { frame, moves: AtomicU32::new(0) });
        let region = Region::new(Rectangle::new(50, 50, 100, 100), display.clone());

        let result = region.click(None).unwrap();
        assert!(result.is_none());
        assert_eq!(display.moves.load(Ordering::SeqCst), 1);
        assert_eq!(region.bounds().center(), Point::new(100, 100));
    }

    #[test]
    fn keycode_table_covers_lowercase_and_uppercase() {
        assert_eq!(keycode_for_char('a'), Some((38, false)));
        assert_eq!(keycode_for_char('A'), Some((38, true)));
        assert!(keycode_for_char('@').is_none());
    }
}
