//! Environment readiness check.

use crate::browser::find_browser;
use anyhow::Result;

/// Check browser and ffmpeg-suite availability.
pub async fn run() -> Result<()> {
    println!("Reelgrab Doctor");
    println!("===============");
    println!();

    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    println!("OS:   {os}");
    println!("Arch: {arch}");
    println!();

    let browser = find_browser();
    match &browser {
        Some(path) => println!("[OK] Browser found: {}", path.display()),
        None => println!(
            "[!!] Browser NOT found. Install Chromium or set REELGRAB_BROWSER_PATH."
        ),
    }

    let ffprobe = which::which("ffprobe").ok();
    match &ffprobe {
        Some(path) => println!("[OK] ffprobe found: {}", path.display()),
        None => println!("[!!] ffprobe NOT found. Stream analysis and merging will be skipped."),
    }

    let ffmpeg = which::which("ffmpeg").ok();
    match &ffmpeg {
        Some(path) => println!("[OK] ffmpeg found: {}", path.display()),
        None => println!("[!!] ffmpeg NOT found. Video and audio streams cannot be merged."),
    }

    println!();
    if browser.is_some() && ffprobe.is_some() && ffmpeg.is_some() {
        println!("Status: READY");
    } else if browser.is_some() {
        println!("Status: DEGRADED");
        println!("  Harvested videos will be saved without audio.");
    } else {
        println!("Status: NOT READY");
        println!("  A Chromium-family browser is required.");
    }

    Ok(())
}
