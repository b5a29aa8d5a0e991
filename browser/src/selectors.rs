//! Selectors for UI elements of the Google Meet web client.

use crate::driver::Locator;

/// Acknowledgement prompts that may cover the pre-join screen, e.g. the
/// "microphone/camera blocked" popups.
pub const DISMISS_OVERLAYS: [Locator; 3] = [
    Locator::has_text("button", "Dismiss"),
    Locator::has_text("button", "Got it"),
    Locator::has_text("button", "OK"),
];

/// Microphone toggle while the microphone is (probably) on.
pub const MICROPHONE_TOGGLE: Locator = Locator::css(
    r#"[aria-label*="microphone"][aria-label*="off"], [aria-label*="microphone"][data-is-muted="false"]"#,
);

/// Camera toggle while the camera is (probably) on.
pub const CAMERA_TOGGLE: Locator =
    Locator::css(r#"[aria-label*="camera"][aria-label*="off"], [aria-label*="camera"][data-is-muted="false"]"#);

/// Name field shown to guests that are not logged in.
pub const NAME_INPUT: Locator = Locator::css(r#"input[placeholder*="name"], input[aria-label*="name"]"#);

/// Join controls, in order of preference.
pub const JOIN_BUTTONS: [Locator; 5] = [
    Locator::has_text("span", "Join now"),
    Locator::has_text("span", "Ask to join"),
    Locator::has_text("button", "Join now"),
    Locator::has_text("button", "Ask to join"),
    Locator::css(r#"[aria-label="Join now"]"#),
];

/// Controls that only exist once inside the call.
pub const IN_MEETING_INDICATORS: [Locator; 3] = [
    Locator::css(r#"button[aria-label="Chat with everyone"]"#),
    Locator::css(r#"button[aria-label="Show everyone"]"#),
    Locator::css(r#"button[aria-label="Meeting details"]"#),
];

/// Shown while the host has not admitted us yet.
pub const WAITING_FOR_HOST: Locator =
    Locator::exact_text("div, span", "Please wait until a meeting host brings you into the call");

pub const LEAVE_BUTTONS: [Locator; 2] = [
    Locator::css(r#"button[aria-label="Leave call"]"#),
    Locator::has_text("button", "Leave call"),
];

/// Clicked once before recording to count as a user gesture.
pub const PAGE_BODY: Locator = Locator::css("body");
