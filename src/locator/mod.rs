//! Locator Strategy Engine
//!
//! Finds and activates a control whose markup is not known in advance by
//! trying independent strategies in order and stopping at the first element
//! that accepts the activation.

pub mod strategies;
pub mod table;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::driver::{BrowserDriver, ElementInfo};
use strategies::{default_strategies, Candidate, LocatorStrategy};
use table::{LocatorTable, RoleHints, ToggleWords};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    NameInput,
    CameraToggle,
    MicToggle,
    JoinControl,
    /// "Join from your browser" link shown instead of a native-app launch
    BrowserClientLink,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::NameInput,
        Role::CameraToggle,
        Role::MicToggle,
        Role::JoinControl,
        Role::BrowserClientLink,
    ];

    pub fn is_toggle(&self) -> bool {
        matches!(self, Role::CameraToggle | Role::MicToggle)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::NameInput => "name input",
            Role::CameraToggle => "camera toggle",
            Role::MicToggle => "microphone toggle",
            Role::JoinControl => "join control",
            Role::BrowserClientLink => "browser client link",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Activation {
    Activated { strategy: &'static str, css: String },
    /// Only toggles that are already off were found
    AlreadySatisfied,
    NotFound,
}

/// Current state of a media toggle, read from its attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleState {
    On,
    Off,
    Unknown,
}

impl ToggleState {
    pub fn of(element: &ElementInfo, words: &ToggleWords) -> Self {
        match element.attr("data-is-muted") {
            Some("false") => return ToggleState::On,
            Some("true") => return ToggleState::Off,
            _ => {}
        }
        match element.attr("aria-pressed") {
            Some("true") => return ToggleState::On,
            Some("false") => return ToggleState::Off,
            _ => {}
        }

        let label = element
            .accessible_label()
            .map(str::to_string)
            .unwrap_or_else(|| element.text.clone());
        // Longest match wins: "unmute" over "mute", "выключить" over "включить"
        let on = words.on.longest_in(&label).map(|w| w.chars().count());
        let off = words.off.longest_in(&label).map(|w| w.chars().count());
        match (on, off) {
            (Some(on), Some(off)) if on > off => ToggleState::On,
            (Some(_), None) => ToggleState::On,
            (_, Some(_)) => ToggleState::Off,
            (None, None) => ToggleState::Unknown,
        }
    }
}

pub struct LocatorEngine {
    strategies: Vec<Box<dyn LocatorStrategy>>,
    table: Arc<LocatorTable>,
}

impl LocatorEngine {
    pub fn new(table: Arc<LocatorTable>) -> Self {
        Self::with_strategies(table, default_strategies())
    }

    pub fn with_strategies(table: Arc<LocatorTable>, strategies: Vec<Box<dyn LocatorStrategy>>) -> Self {
        Self { strategies, table }
    }

    pub fn table(&self) -> &LocatorTable {
        &self.table
    }

    /// Find and activate the control for `role`. `input` is the text typed
    /// into text roles; other roles are clicked. Never fails: lookup and
    /// activation errors fall through to the next candidate.
    pub async fn activate(
        &self,
        driver: &dyn BrowserDriver,
        role: Role,
        hints: &RoleHints,
        input: Option<&str>,
    ) -> Activation {
        let mut saw_off_toggle = false;

        for strategy in &self.strategies {
            let candidates = strategy.candidates(driver, hints).await;
            for candidate in candidates {
                if !candidate.element.is_interactable() {
                    continue;
                }
                if role.is_toggle() {
                    match ToggleState::of(&candidate.element, &self.table.toggle_state) {
                        ToggleState::On => {}
                        ToggleState::Off => {
                            saw_off_toggle = true;
                            continue;
                        }
                        ToggleState::Unknown => continue,
                    }
                }

                match perform(driver, role, &candidate, input).await {
                    Ok(()) => {
                        debug!(
                            "Activated {} via {} ('{}' #{})",
                            role,
                            strategy.name(),
                            candidate.css,
                            candidate.index
                        );
                        return Activation::Activated {
                            strategy: strategy.name(),
                            css: candidate.css,
                        };
                    }
                    Err(e) => warn!(
                        "Activating {} via {} failed on '{}' #{}: {}",
                        role,
                        strategy.name(),
                        candidate.css,
                        candidate.index,
                        e
                    ),
                }
            }
        }

        if saw_off_toggle {
            Activation::AlreadySatisfied
        } else {
            Activation::NotFound
        }
    }
}

async fn perform(
    driver: &dyn BrowserDriver,
    role: Role,
    candidate: &Candidate,
    input: Option<&str>,
) -> anyhow::Result<()> {
    match (role, input) {
        (Role::NameInput, Some(text)) => driver.fill(&candidate.css, candidate.index, text).await,
        (Role::NameInput, None) => anyhow::bail!("no text to enter"),
        _ => driver.click(&candidate.css, candidate.index).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::{Effect, FakeElement, FakePage};
    use crate::platform::PlatformKind;

    fn engine() -> LocatorEngine {
        LocatorEngine::new(Arc::new(LocatorTable::embedded().unwrap()))
    }

    async fn activate(page: &FakePage, platform: PlatformKind, role: Role, input: Option<&str>) -> Activation {
        let engine = engine();
        let hints = engine.table().hints(platform, role);
        engine.activate(page, role, &hints, input).await
    }

    #[tokio::test]
    async fn test_activates_first_strategy_and_stops() {
        let page = FakePage::new()
            .element(FakeElement::new("join", "button").attr("jsname", "Qx7uuf").text("Join now"))
            .element(FakeElement::new("join-text", "button").text("Join now"));

        let result = activate(&page, PlatformKind::GoogleMeet, Role::JoinControl, None).await;
        assert!(matches!(result, Activation::Activated { strategy: "attribute", .. }));
        assert_eq!(page.clicks(), vec!["join"]);
    }

    #[tokio::test]
    async fn test_falls_back_to_text_scan_only_strategy_satisfiable() {
        let page = FakePage::new()
            .element(FakeElement::new("cancel", "button").text("Cancel"))
            .element(FakeElement::new("join", "button").text("Присоединиться"));

        let result = activate(&page, PlatformKind::YandexTelemost, Role::JoinControl, None).await;
        assert!(matches!(result, Activation::Activated { strategy: "text-scan", .. }));
        assert_eq!(page.clicks(), vec!["join"]);
    }

    #[tokio::test]
    async fn test_skips_hidden_and_failing_candidates() {
        let page = FakePage::new()
            .element(FakeElement::new("hidden", "button").attr("jsname", "Qx7uuf").hidden())
            .element(FakeElement::new("join", "button").text("Ask to join"));

        let result = activate(&page, PlatformKind::GoogleMeet, Role::JoinControl, None).await;
        assert!(matches!(result, Activation::Activated { .. }));
        assert_eq!(page.clicks(), vec!["join"]);
    }

    #[tokio::test]
    async fn test_not_found_is_not_an_error() {
        let page = FakePage::new().element(FakeElement::new("x", "button").text("Leave"));
        let result = activate(&page, PlatformKind::Zoom, Role::JoinControl, None).await;
        assert_eq!(result, Activation::NotFound);
        assert!(page.clicks().is_empty());
    }

    #[tokio::test]
    async fn test_toggle_fires_only_when_on() {
        let muted = FakePage::new().element(
            FakeElement::new("mic", "div")
                .attr("role", "button")
                .attr("data-is-muted", "true")
                .attr("aria-label", "Turn on microphone"),
        );
        let result = activate(&muted, PlatformKind::GoogleMeet, Role::MicToggle, None).await;
        assert_eq!(result, Activation::AlreadySatisfied);
        assert!(muted.clicks().is_empty());

        let live = FakePage::new()
            .element(
                FakeElement::new("cam", "div")
                    .attr("role", "button")
                    .attr("data-is-muted", "false")
                    .attr("aria-label", "Turn off camera"),
            )
            .on_click(
                "cam",
                vec![Effect::SetAttr {
                    key: "cam".into(),
                    name: "data-is-muted".into(),
                    value: "true".into(),
                }],
            );
        let result = activate(&live, PlatformKind::GoogleMeet, Role::CameraToggle, None).await;
        assert!(matches!(result, Activation::Activated { .. }));
        assert_eq!(live.clicks(), vec!["cam"]);
    }

    #[tokio::test]
    async fn test_name_input_is_filled() {
        let page = FakePage::new().element(
            FakeElement::new("name", "input").attr("placeholder", "Введите ваше имя"),
        );
        let result = activate(&page, PlatformKind::KonturTalk, Role::NameInput, Some("Meeting Bot")).await;
        assert!(matches!(result, Activation::Activated { .. }));
        assert_eq!(page.fills(), vec![("name".to_string(), "Meeting Bot".to_string())]);
    }

    #[test]
    fn test_toggle_state_from_labels() {
        let words = LocatorTable::embedded().unwrap().toggle_state;
        let labelled = |label: &str| ElementInfo {
            tag: "button".into(),
            attributes: [("aria-label".to_string(), label.to_string())].into_iter().collect(),
            visible: true,
            enabled: true,
            ..Default::default()
        };
        assert_eq!(ToggleState::of(&labelled("Mute"), &words), ToggleState::On);
        assert_eq!(ToggleState::of(&labelled("Unmute"), &words), ToggleState::Off);
        assert_eq!(ToggleState::of(&labelled("Выключить микрофон"), &words), ToggleState::On);
        assert_eq!(ToggleState::of(&labelled("Включить камеру"), &words), ToggleState::Off);
        assert_eq!(ToggleState::of(&labelled("Settings"), &words), ToggleState::Unknown);
    }
}
