//! `zikuli` -- the thin command surface over `zikuli-core` (spec §6).
//!
//! Subcommands: `capture`, `find`, `click`, `type`, `version`. Each one
//! is a handful of lines of glue over the core library; all of the
//! interesting behavior (matching, retry/timeout policy, input timing)
//! lives in `zikuli_core::region::Region` and is exercised here, not
//! reimplemented.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use zikuli_core::config::Config;
use zikuli_core::display::{Button, Display, X11Display};
use zikuli_core::geometry::{Point, Rectangle};
use zikuli_core::image::{Image, PixelFormat};
use zikuli_core::region::{Pattern, Region};
use zikuli_core::ZikuliError;

#[derive(Parser)]
#[command(name = "zikuli", about = "Visual GUI automation: capture, find, click, type", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture a screen region to a PNG file
    Capture {
        /// Region to capture as "x,y,w,h"; omit for the whole virtual screen
        #[arg(long)]
        rect: Option<String>,
        /// Output PNG path
        #[arg(short, long)]
        output: String,
    },
    /// Search the screen for a pattern image
    Find {
        /// Path to the pattern PNG
        pattern: String,
        /// Similarity floor, 0.0-1.0 (default from config/0.7)
        #[arg(long)]
        similarity: Option<f64>,
    },
    /// Find-then-click a pattern, or click raw coordinates
    Click {
        /// Pattern PNG path, or "X Y" absolute coordinates
        target: Vec<String>,
        /// Which button to press
        #[arg(short, long, default_value = "left")]
        button: String,
    },
    /// Type text at the current keyboard focus
    Type {
        /// Text to type
        text: String,
    },
    /// Print version information
    Version,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            eprintln!("zikuli: error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

/// Maps the propagated error onto spec §6's exit-code contract. Usage
/// errors are caught by `clap` itself before we get here (it exits 2
/// directly), so the only usage-shaped failure left to classify here is
/// a malformed `--rect`/coordinate argument, surfaced as
/// `ZikuliError::InvalidArgument`.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ZikuliError>() {
        Some(ZikuliError::FindFailed { .. }) => 3,
        Some(ZikuliError::Timeout { .. }) => 5,
        Some(ZikuliError::Display { .. }) => 4,
        Some(ZikuliError::InvalidArgument { .. }) => 2,
        Some(_) => 1,
        None => 1,
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Capture { rect, output } => cmd_capture(rect, output),
        Command::Find { pattern, similarity } => cmd_find(pattern, similarity),
        Command::Click { target, button } => cmd_click(target, button),
        Command::Type { text } => cmd_type(text),
        Command::Version => {
            println!("zikuli {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Connects to the X display named by `$DISPLAY`. Deliberately returns
/// the bare `ZikuliError` (no `anyhow::Context` wrapping) so
/// `exit_code_for` can still downcast it to `ZikuliError::Display` and
/// report exit code 4 rather than falling through to the generic "1".
fn connect() -> Result<Arc<X11Display>> {
    let display = X11Display::connect(None)?;
    Ok(Arc::new(display))
}

fn parse_rect(s: &str) -> Result<Rectangle> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(ZikuliError::InvalidArgument {
            argument: "rect".into(),
            detail: format!("expected \"x,y,w,h\", got {s:?}"),
        }
        .into());
    }
    let x: i32 = parts[0].parse().map_err(|_| ZikuliError::InvalidArgument {
        argument: "rect.x".into(),
        detail: parts[0].to_string(),
    })?;
    let y: i32 = parts[1].parse().map_err(|_| ZikuliError::InvalidArgument {
        argument: "rect.y".into(),
        detail: parts[1].to_string(),
    })?;
    let w: u32 = parts[2].parse().map_err(|_| ZikuliError::InvalidArgument {
        argument: "rect.w".into(),
        detail: parts[2].to_string(),
    })?;
    let h: u32 = parts[3].parse().map_err(|_| ZikuliError::InvalidArgument {
        argument: "rect.h".into(),
        detail: parts[3].to_string(),
    })?;
    Ok(Rectangle::new(x, y, w, h))
}

fn load_pattern(path: &str, similarity: Option<f64>) -> Result<Pattern> {
    let dynamic = image::open(path).with_context(|| format!("failed to read pattern image {path:?}"))?;
    let rgba = dynamic.to_rgba8();
    let (w, h) = (rgba.width(), rgba.height());
    let img = Image::new(rgba.into_raw(), w, h, PixelFormat::Rgba)
        .context("decoded pattern image has an inconsistent buffer size")?
        .convert(PixelFormat::Bgra);

    let mut pattern = Pattern::new(path, img);
    if let Some(s) = similarity {
        pattern = pattern.similar(s);
    }
    Ok(pattern)
}

/// Build the whole-virtual-screen `Region` every subcommand operates on,
/// carrying `config`'s `auto_wait_timeout_secs`/`poll_interval_secs`/
/// `find_failed_policy` through -- not just `default_similarity`.
fn whole_screen_region(display: Arc<X11Display>, config: &Config) -> Result<Region> {
    let bounds = display.monitors().context("failed to enumerate monitors")?.virtual_screen_bounds();
    let mut region = Region::new(bounds, display);
    region.set_auto_wait_timeout(config.auto_wait_timeout());
    region.set_poll_interval(config.poll_interval());
    region.set_find_failed_response(config.find_failed_policy);
    Ok(region)
}

fn cmd_capture(rect: Option<String>, output: String) -> Result<()> {
    let display = connect()?;
    let rect = match rect {
        Some(s) => parse_rect(&s)?,
        None => display.monitors().context("failed to enumerate monitors")?.virtual_screen_bounds(),
    };

    let image_buf = display.capture(rect).context("capture failed")?;
    let rgba = image_buf.convert(PixelFormat::Rgba);
    let out = image::RgbaImage::from_raw(rgba.width(), rgba.height(), rgba.data().to_vec())
        .context("captured buffer has an inconsistent size")?;
    out.save(&output).with_context(|| format!("failed to write {output:?}"))?;

    println!("captured {}x{} to {output}", rgba.width(), rgba.height());
    Ok(())
}

fn cmd_find(pattern_path: String, similarity: Option<f64>) -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let similarity = similarity.or(Some(config.default_similarity));
    let pattern = load_pattern(&pattern_path, similarity)?;

    let display = connect()?;
    let region = whole_screen_region(display, &config)?;

    match region.find(&pattern)? {
        Some(found) => {
            let b = found.bounds();
            println!("found at {},{} {}x{} score={:.4}", b.x, b.y, b.w, b.h, found.score());
        }
        None => println!("{pattern_path:?} not found (find_failed_policy did not abort)"),
    }
    Ok(())
}

fn cmd_click(target: Vec<String>, button: String) -> Result<()> {
    let button = parse_button(&button)?;
    let config = Config::load().unwrap_or_default();
    let display = connect()?;

    match target.as_slice() {
        [] => {
            let region = whole_screen_region(display, &config)?;
            let center = region.bounds().center();
            region.click_with_button(None, button)?;
            println!("clicked region center at {},{}", center.x, center.y);
        }
        [x, y] => {
            let x: i32 = x.parse().map_err(|_| ZikuliError::InvalidArgument {
                argument: "x".into(),
                detail: x.clone(),
            })?;
            let y: i32 = y.parse().map_err(|_| ZikuliError::InvalidArgument {
                argument: "y".into(),
                detail: y.clone(),
            })?;
            click_raw(&display, Point::new(x, y), button)?;
            println!("clicked {x},{y}");
        }
        [pattern_path] => {
            let pattern = load_pattern(pattern_path, Some(config.default_similarity))?;
            let region = whole_screen_region(display, &config)?;
            match region.click_with_button(Some(&pattern), button)? {
                Some(found) => {
                    let center = found.target();
                    println!("clicked {pattern_path:?} at {},{} score={:.4}", center.x, center.y, found.score());
                }
                None => println!("{pattern_path:?} not found (find_failed_policy did not abort); no click performed"),
            }
        }
        _ => bail!("click takes either a pattern path or an \"X Y\" coordinate pair"),
    }
    Ok(())
}

fn parse_button(s: &str) -> Result<Button> {
    match s.to_ascii_lowercase().as_str() {
        "left" => Ok(Button::Left),
        "right" => Ok(Button::Right),
        "middle" => Ok(Button::Middle),
        other => Err(ZikuliError::InvalidArgument {
            argument: "button".into(),
            detail: format!("{other:?} (use: left, middle, right)"),
        }
        .into()),
    }
}

fn click_raw(display: &X11Display, point: Point, button: Button) -> Result<()> {
    display.move_mouse_absolute(point)?;
    std::thread::sleep(std::time::Duration::from_millis(50));
    display.button_event(button, true)?;
    display.button_event(button, false)?;
    Ok(())
}

fn cmd_type(text: String) -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let display = connect()?;
    let region = whole_screen_region(display, &config)?;
    region.type_text(&text)?;
    println!("typed {} character(s)", text.chars().count());
    Ok(())
}
