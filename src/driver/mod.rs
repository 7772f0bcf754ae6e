pub mod common;
pub mod fake;
pub mod hierarchy;
pub mod traits;

pub use hierarchy::{Bounds, TreeNode, UiElement};
pub use traits::{DeviceInfo, Driver, KeyCode, Platform, Point, SwipeDirection};
