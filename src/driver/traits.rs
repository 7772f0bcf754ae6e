use super::hierarchy::{TreeNode, UiElement};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A point on the device screen, in grid units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Swipe direction (direction of the finger movement)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SwipeDirection {
    #[serde(alias = "up")]
    Up,
    #[serde(alias = "down")]
    Down,
    #[serde(alias = "left")]
    Left,
    #[serde(alias = "right")]
    Right,
}

impl SwipeDirection {
    pub fn opposite(self) -> Self {
        match self {
            SwipeDirection::Up => SwipeDirection::Down,
            SwipeDirection::Down => SwipeDirection::Up,
            SwipeDirection::Left => SwipeDirection::Right,
            SwipeDirection::Right => SwipeDirection::Left,
        }
    }
}

/// Physical or virtual key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyCode {
    Enter,
    Backspace,
    Back,
    Home,
    Lock,
    Tab,
    Power,
    VolumeUp,
    VolumeDown,
    RemoteUp,
    RemoteDown,
    RemoteLeft,
    RemoteRight,
    RemoteCenter,
}

/// Platform family reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
    Web,
    Process,
}

/// Display description fetched once per run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub platform: Platform,
    pub width_pixels: u32,
    pub height_pixels: u32,
    pub width_grid: u32,
    pub height_grid: u32,
}

impl DeviceInfo {
    /// Convert percentages (0..=100) of the screen into grid coordinates
    pub fn point_at_percent(&self, percent_x: u32, percent_y: u32) -> Point {
        Point::new(
            (self.width_grid * percent_x / 100) as i32,
            (self.height_grid * percent_y / 100) as i32,
        )
    }
}

/// What a tap lands on
#[derive(Debug, Clone)]
pub enum TapTarget {
    Point(Point),
    Element(UiElement),
}

/// Tap behaviour flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TapOptions {
    /// Repeat the tap once if the screen did not change afterwards
    pub retry_if_no_change: bool,
    /// Wait for the element to settle on screen before tapping
    pub wait_until_visible: bool,
    pub long_press: bool,
}

/// Swipe gesture shapes
#[derive(Debug, Clone, PartialEq)]
pub enum SwipeGesture {
    /// Full-screen swipe in a direction
    Direction(SwipeDirection),
    /// Swipe between two absolute points
    Points { start: Point, end: Point },
    /// Swipe starting at an element's center
    FromElement {
        center: Point,
        direction: SwipeDirection,
    },
}

/// Device capability interface
///
/// The engine drives every backend (mobile OS, web, terminal process) through
/// this trait only. Calls are synchronous from the engine's viewpoint: each
/// one is awaited before the next command starts.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Backend name, used in logs
    fn name(&self) -> &str;

    async fn open(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    async fn device_info(&self) -> Result<DeviceInfo>;

    /// Launch an application
    ///
    /// # Arguments
    /// * `app_id` - package name (Android), bundle id (iOS) or URL (web)
    /// * `stop_if_running` - restart the app if it is already running
    async fn launch_app(&self, app_id: &str, stop_if_running: bool) -> Result<()>;

    async fn stop_app(&self, app_id: &str) -> Result<()>;

    async fn clear_app_state(&self, app_id: &str) -> Result<()>;

    async fn clear_keychain(&self) -> Result<()>;

    /// Copy the app's on-disk state into `dest`
    async fn pull_app_state(&self, app_id: &str, dest: &Path) -> Result<()>;

    /// Restore the app's on-disk state from `source`
    async fn push_app_state(&self, app_id: &str, source: &Path) -> Result<()>;

    async fn tap(&self, target: &TapTarget, options: TapOptions) -> Result<()>;

    async fn swipe(&self, gesture: &SwipeGesture, duration_ms: u64) -> Result<()>;

    async fn press_key(&self, code: KeyCode) -> Result<()>;

    async fn input_text(&self, text: &str) -> Result<()>;

    async fn erase_text(&self, char_count: u32) -> Result<()>;

    async fn back_press(&self) -> Result<()>;

    async fn hide_keyboard(&self) -> Result<()>;

    async fn open_link(&self, url: &str) -> Result<()>;

    async fn set_location(&self, latitude: f64, longitude: f64) -> Result<()>;

    /// Save a PNG screenshot to `dest`
    async fn take_screenshot(&self, dest: &Path) -> Result<()>;

    /// Fresh snapshot of the on-screen view tree
    async fn view_hierarchy(&self) -> Result<TreeNode>;

    /// Route the device's outbound HTTP traffic through `host:port`
    async fn set_proxy(&self, host: &str, port: u16) -> Result<()>;

    async fn reset_proxy(&self) -> Result<()>;

    async fn is_unicode_input_supported(&self) -> Result<bool>;

    /// Block until on-screen animations settle
    async fn wait_for_animation_to_end(&self, _timeout_ms: Option<u64>) -> Result<()> {
        Ok(())
    }
}
