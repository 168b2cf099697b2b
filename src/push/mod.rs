//! Push notifications: composing what to show, routing clicks, and the
//! periodic property-update check that raises its own notification.

mod click;
mod notification;
mod updates;

pub use click::{click_target, route_click, ClickOutcome};
pub use notification::{compose, LogNotifier, Notification, Notifier};
pub use updates::{fetch_property_updates, PROPERTY_UPDATES_TAG};
