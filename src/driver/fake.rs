//! In-memory scriptable driver
//!
//! Records every interaction and serves view hierarchies from a queue, so
//! flows can be exercised without a device. Used by the test-suite and by
//! the `run` CLI subcommand.

use super::hierarchy::{attr, Bounds, TreeNode};
use super::traits::{
    DeviceInfo, Driver, KeyCode, Platform, Point, SwipeGesture, TapOptions, TapTarget,
};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Interaction recorded by [`FakeDriver`]
#[derive(Debug, Clone, PartialEq)]
pub enum FakeEvent {
    LaunchApp { app_id: String, stop_if_running: bool },
    StopApp(String),
    ClearState(String),
    ClearKeychain,
    PullAppState(String, PathBuf),
    PushAppState(String, PathBuf),
    Tap { point: Point, long_press: bool },
    Swipe { gesture: SwipeGesture, duration_ms: u64 },
    PressKey(KeyCode),
    InputText(String),
    EraseText(u32),
    BackPress,
    HideKeyboard,
    OpenLink(String),
    SetLocation { latitude: f64, longitude: f64 },
    TakeScreenshot(PathBuf),
    SetProxy { host: String, port: u16 },
    ResetProxy,
    WaitForAnimationToEnd,
}

impl FakeEvent {
    /// Events that change what is on screen
    pub fn is_user_interaction(&self) -> bool {
        matches!(
            self,
            FakeEvent::Tap { .. }
                | FakeEvent::Swipe { .. }
                | FakeEvent::PressKey(_)
                | FakeEvent::InputText(_)
                | FakeEvent::EraseText(_)
                | FakeEvent::BackPress
                | FakeEvent::HideKeyboard
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenState {
    NotInitialized,
    Open,
    Closed,
}

struct FakeState {
    open: OpenState,
    device_info: DeviceInfo,
    installed_apps: HashSet<String>,
    hierarchy: TreeNode,
    queued: VecDeque<TreeNode>,
    on_launch: HashMap<String, TreeNode>,
    on_tap: HashMap<String, TreeNode>,
    unicode_supported: bool,
    pushed_state: Option<String>,
    events: Vec<FakeEvent>,
    hierarchy_reads: usize,
}

/// Driver backed by an in-memory screen
///
/// Cloning shares the underlying state, so a test can keep a handle while
/// the engine owns another.
#[derive(Clone)]
pub struct FakeDriver {
    state: Arc<Mutex<FakeState>>,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                open: OpenState::NotInitialized,
                device_info: DeviceInfo {
                    platform: Platform::Android,
                    width_pixels: 1080,
                    height_pixels: 1920,
                    width_grid: 540,
                    height_grid: 960,
                },
                installed_apps: HashSet::new(),
                hierarchy: TreeNode::default(),
                queued: VecDeque::new(),
                on_launch: HashMap::new(),
                on_tap: HashMap::new(),
                unicode_supported: true,
                pushed_state: None,
                events: Vec::new(),
                hierarchy_reads: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        // A panicking test thread must not hide the recorded state from others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_open(&self) -> Result<MutexGuard<'_, FakeState>> {
        let state = self.lock();
        if state.open != OpenState::Open {
            bail!("Fake driver is not open");
        }
        Ok(state)
    }

    pub fn add_installed_app(&self, app_id: &str) {
        self.lock().installed_apps.insert(app_id.to_string());
    }

    /// Replace the current screen
    pub fn set_hierarchy(&self, root: TreeNode) {
        let mut state = self.lock();
        state.queued.clear();
        state.hierarchy = root;
    }

    /// Screens served by successive hierarchy reads; the last one stays
    pub fn queue_hierarchies(&self, screens: Vec<TreeNode>) {
        self.lock().queued.extend(screens);
    }

    /// Screen shown once `app_id` is launched
    pub fn on_launch(&self, app_id: &str, root: TreeNode) {
        self.lock().on_launch.insert(app_id.to_string(), root);
    }

    /// Screen shown after tapping an element with the given text
    pub fn on_tap(&self, text: &str, root: TreeNode) {
        self.lock().on_tap.insert(text.to_string(), root);
    }

    pub fn set_unicode_input_supported(&self, supported: bool) {
        self.lock().unicode_supported = supported;
    }

    pub fn set_device_info(&self, info: DeviceInfo) {
        self.lock().device_info = info;
    }

    pub fn events(&self) -> Vec<FakeEvent> {
        self.lock().events.clone()
    }

    pub fn event_count(&self, event: &FakeEvent) -> usize {
        self.lock().events.iter().filter(|e| *e == event).count()
    }

    pub fn hierarchy_reads(&self) -> usize {
        self.lock().hierarchy_reads
    }

    pub fn pushed_state(&self) -> Option<String> {
        self.lock().pushed_state.clone()
    }

    fn record(&self, event: FakeEvent) -> Result<()> {
        self.ensure_open()?.events.push(event);
        Ok(())
    }
}

#[async_trait]
impl Driver for FakeDriver {
    fn name(&self) -> &str {
        "Fake Device"
    }

    async fn open(&self) -> Result<()> {
        let mut state = self.lock();
        if state.open == OpenState::Open {
            bail!("Already open");
        }
        state.open = OpenState::Open;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.lock();
        match state.open {
            OpenState::Closed => bail!("Already closed"),
            OpenState::NotInitialized => bail!("Not open yet"),
            OpenState::Open => {
                state.open = OpenState::Closed;
                Ok(())
            }
        }
    }

    async fn device_info(&self) -> Result<DeviceInfo> {
        Ok(self.ensure_open()?.device_info.clone())
    }

    async fn launch_app(&self, app_id: &str, stop_if_running: bool) -> Result<()> {
        let mut state = self.ensure_open()?;
        if !state.installed_apps.contains(app_id) {
            bail!("App {} is not installed", app_id);
        }
        if let Some(screen) = state.on_launch.get(app_id).cloned() {
            state.queued.clear();
            state.hierarchy = screen;
        }
        state.events.push(FakeEvent::LaunchApp {
            app_id: app_id.to_string(),
            stop_if_running,
        });
        Ok(())
    }

    async fn stop_app(&self, app_id: &str) -> Result<()> {
        self.record(FakeEvent::StopApp(app_id.to_string()))
    }

    async fn clear_app_state(&self, app_id: &str) -> Result<()> {
        let mut state = self.ensure_open()?;
        if !state.installed_apps.contains(app_id) {
            log::info!("App {} not installed. Skipping clearAppState.", app_id);
            return Ok(());
        }
        state.events.push(FakeEvent::ClearState(app_id.to_string()));
        Ok(())
    }

    async fn clear_keychain(&self) -> Result<()> {
        self.record(FakeEvent::ClearKeychain)
    }

    async fn pull_app_state(&self, app_id: &str, dest: &Path) -> Result<()> {
        let snapshot: Vec<String> = {
            let state = self.ensure_open()?;
            state
                .events
                .iter()
                .filter(|e| e.is_user_interaction())
                .map(|e| format!("{:?}", e))
                .collect()
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;
        tokio::fs::write(dest, json)
            .await
            .with_context(|| format!("Failed to write app state to {}", dest.display()))?;

        self.record(FakeEvent::PullAppState(app_id.to_string(), dest.to_path_buf()))
    }

    async fn push_app_state(&self, app_id: &str, source: &Path) -> Result<()> {
        let content = tokio::fs::read_to_string(source)
            .await
            .with_context(|| format!("Failed to read app state from {}", source.display()))?;

        let mut state = self.ensure_open()?;
        state.pushed_state = Some(content);
        state.events.push(FakeEvent::PushAppState(
            app_id.to_string(),
            source.to_path_buf(),
        ));
        Ok(())
    }

    async fn tap(&self, target: &TapTarget, options: TapOptions) -> Result<()> {
        let mut state = self.ensure_open()?;
        let point = match target {
            TapTarget::Point(p) => *p,
            TapTarget::Element(element) => {
                let next = element
                    .tree_node
                    .text()
                    .and_then(|t| state.on_tap.get(t).cloned());
                if let Some(screen) = next {
                    state.queued.clear();
                    state.hierarchy = screen;
                }
                element.center()
            }
        };
        state.events.push(FakeEvent::Tap {
            point,
            long_press: options.long_press,
        });
        Ok(())
    }

    async fn swipe(&self, gesture: &SwipeGesture, duration_ms: u64) -> Result<()> {
        self.record(FakeEvent::Swipe {
            gesture: gesture.clone(),
            duration_ms,
        })
    }

    async fn press_key(&self, code: KeyCode) -> Result<()> {
        self.record(FakeEvent::PressKey(code))
    }

    async fn input_text(&self, text: &str) -> Result<()> {
        self.record(FakeEvent::InputText(text.to_string()))
    }

    async fn erase_text(&self, char_count: u32) -> Result<()> {
        self.record(FakeEvent::EraseText(char_count))
    }

    async fn back_press(&self) -> Result<()> {
        self.record(FakeEvent::BackPress)
    }

    async fn hide_keyboard(&self) -> Result<()> {
        self.record(FakeEvent::HideKeyboard)
    }

    async fn open_link(&self, url: &str) -> Result<()> {
        self.record(FakeEvent::OpenLink(url.to_string()))
    }

    async fn set_location(&self, latitude: f64, longitude: f64) -> Result<()> {
        self.record(FakeEvent::SetLocation {
            latitude,
            longitude,
        })
    }

    async fn take_screenshot(&self, dest: &Path) -> Result<()> {
        self.record(FakeEvent::TakeScreenshot(dest.to_path_buf()))
    }

    async fn view_hierarchy(&self) -> Result<TreeNode> {
        let mut state = self.ensure_open()?;
        state.hierarchy_reads += 1;
        if let Some(next) = state.queued.pop_front() {
            state.hierarchy = next;
        }
        Ok(state.hierarchy.clone())
    }

    async fn set_proxy(&self, host: &str, port: u16) -> Result<()> {
        self.record(FakeEvent::SetProxy {
            host: host.to_string(),
            port,
        })
    }

    async fn reset_proxy(&self) -> Result<()> {
        self.record(FakeEvent::ResetProxy)
    }

    async fn is_unicode_input_supported(&self) -> Result<bool> {
        Ok(self.ensure_open()?.unicode_supported)
    }

    async fn wait_for_animation_to_end(&self, _timeout_ms: Option<u64>) -> Result<()> {
        self.record(FakeEvent::WaitForAnimationToEnd)
    }
}

// ============================================================================
// Layout builders
// ============================================================================

/// A node with the given attributes and children
pub fn node(attributes: &[(&str, &str)], children: Vec<TreeNode>) -> TreeNode {
    TreeNode::new(
        attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        children,
    )
}

/// A leaf text element
pub fn text_element(text: &str, bounds: Bounds) -> TreeNode {
    node(
        &[(attr::TEXT, text), (attr::BOUNDS, &bounds.to_attribute())],
        vec![],
    )
}

/// A full-screen root holding `children`
pub fn screen(children: Vec<TreeNode>) -> TreeNode {
    node(
        &[(attr::BOUNDS, &Bounds::new(0, 0, 540, 960).to_attribute())],
        children,
    )
}
