//! Join Sequencer
//!
//! Each platform gets a declarative plan of ordered steps. Only navigation
//! and the sign-in check can stop a plan early; missing pre-join controls are
//! recorded and the verdict is left to the verifier.

use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::verifier::Verdict;
use crate::browser::{BrowserSessionHandle, BrowserSessionManager};
use crate::error::SessionError;
use crate::locator::{Activation, LocatorEngine, Role};
use crate::platform::{self, PlatformKind};
use crate::utils::config::JoinConfig;

const URL_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubStep {
    Navigate,
    LoginCheck,
    OpenBrowserClient,
    DisableCamera,
    DisableMic,
    EnterName,
    ClickJoin,
    Settle,
}

impl SubStep {
    pub fn role(&self) -> Option<Role> {
        match self {
            SubStep::OpenBrowserClient => Some(Role::BrowserClientLink),
            SubStep::DisableCamera => Some(Role::CameraToggle),
            SubStep::DisableMic => Some(Role::MicToggle),
            SubStep::EnterName => Some(Role::NameInput),
            SubStep::ClickJoin => Some(Role::JoinControl),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    AlreadySatisfied,
    NotFound,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub step: SubStep,
    pub outcome: StepOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanStep {
    pub step: SubStep,
    /// A required step that is not found is still only recorded
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPlan {
    pub platform: PlatformKind,
    pub steps: Vec<PlanStep>,
}

impl JoinPlan {
    pub fn for_platform(platform: PlatformKind) -> Self {
        use SubStep::*;
        let optional = |step| PlanStep {
            step,
            required: false,
        };
        let required = |step| PlanStep {
            step,
            required: true,
        };

        let pre_join: Vec<SubStep> = match platform {
            PlatformKind::GoogleMeet | PlatformKind::KonturTalk => {
                vec![DisableCamera, DisableMic, EnterName]
            }
            // Zoom and Teams first offer a native app; their web client sits behind a link
            PlatformKind::Zoom | PlatformKind::MicrosoftTeams => {
                vec![OpenBrowserClient, DisableCamera, DisableMic, EnterName]
            }
            // Telemost shows the name form before the device preview
            PlatformKind::YandexTelemost => vec![EnterName, DisableCamera, DisableMic],
        };

        let mut steps = vec![required(Navigate), required(LoginCheck)];
        steps.extend(pre_join.into_iter().map(optional));
        steps.push(required(ClickJoin));
        steps.push(required(Settle));
        Self { platform, steps }
    }
}

/// Record of one join call, kept for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinAttempt {
    pub platform: PlatformKind,
    pub url: String,
    pub steps: Vec<StepRecord>,
    /// Set when the plan stopped early
    #[serde(skip)]
    pub halted: Option<SessionError>,
    #[serde(skip)]
    pub verdict: Option<Verdict>,
}

impl JoinAttempt {
    fn new(platform: PlatformKind, url: &str) -> Self {
        Self {
            platform,
            url: url.to_string(),
            steps: Vec::new(),
            halted: None,
            verdict: None,
        }
    }

    fn record(&mut self, step: SubStep, outcome: StepOutcome, detail: Option<String>) {
        self.steps.push(StepRecord {
            step,
            outcome,
            detail,
        });
    }

    pub fn outcome_of(&self, step: SubStep) -> Option<StepOutcome> {
        self.steps.iter().find(|r| r.step == step).map(|r| r.outcome)
    }

    pub fn join_control_found(&self) -> bool {
        self.outcome_of(SubStep::ClickJoin) == Some(StepOutcome::Succeeded)
    }
}

pub struct JoinSequencer {
    manager: Arc<BrowserSessionManager>,
    engine: Arc<LocatorEngine>,
    config: JoinConfig,
    max_retries: u32,
}

impl JoinSequencer {
    pub fn new(
        manager: Arc<BrowserSessionManager>,
        engine: Arc<LocatorEngine>,
        config: JoinConfig,
        max_retries: u32,
    ) -> Self {
        Self {
            manager,
            engine,
            config,
            max_retries,
        }
    }

    pub async fn join(
        &self,
        handle: &BrowserSessionHandle,
        platform: PlatformKind,
        url: &str,
        display_name: &str,
    ) -> JoinAttempt {
        let target = platform.join_url(url);
        let mut attempt = JoinAttempt::new(platform, &target);
        let plan = JoinPlan::for_platform(platform);
        info!("Joining {} meeting {}", platform, target);

        for plan_step in &plan.steps {
            match plan_step.step {
                SubStep::Navigate => {
                    if let Err(e) = self.manager.navigate(handle, &target, self.max_retries).await {
                        attempt.record(SubStep::Navigate, StepOutcome::Failed, Some(e.to_string()));
                        attempt.halted = Some(e);
                        return attempt;
                    }
                    attempt.record(SubStep::Navigate, StepOutcome::Succeeded, None);
                }
                SubStep::LoginCheck => {
                    let current = tokio::time::timeout(URL_PROBE_TIMEOUT, handle.observe().current_url()).await;
                    match current {
                        Ok(Ok(landed)) if platform::is_auth_url(&landed) => {
                            warn!("{} redirected to sign-in page {}", platform, landed);
                            attempt.record(SubStep::LoginCheck, StepOutcome::Failed, Some(landed.clone()));
                            attempt.halted = Some(SessionError::LoginRequired { url: landed });
                            return attempt;
                        }
                        Ok(Ok(_)) => attempt.record(SubStep::LoginCheck, StepOutcome::Succeeded, None),
                        // Unreadable URL is left for the verifier to judge
                        _ => attempt.record(SubStep::LoginCheck, StepOutcome::Skipped, None),
                    }
                }
                SubStep::Settle => {
                    tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;
                    attempt.record(SubStep::Settle, StepOutcome::Succeeded, None);
                }
                step => {
                    let outcome = self.activate_step(handle, platform, step, display_name).await;
                    match outcome {
                        Err(e) => {
                            attempt.record(step, StepOutcome::Failed, Some(e.to_string()));
                            attempt.halted = Some(e);
                            return attempt;
                        }
                        Ok((StepOutcome::NotFound, _)) if plan_step.required => {
                            warn!("No join control found on {}; deferring to verification", platform);
                            attempt.record(
                                step,
                                StepOutcome::NotFound,
                                Some(SessionError::JoinControlNotFound.to_string()),
                            );
                        }
                        Ok((outcome, detail)) => attempt.record(step, outcome, detail),
                    }
                    if self.config.step_delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(self.config.step_delay_ms)).await;
                    }
                }
            }
        }

        attempt
    }

    async fn activate_step(
        &self,
        handle: &BrowserSessionHandle,
        platform: PlatformKind,
        step: SubStep,
        display_name: &str,
    ) -> Result<(StepOutcome, Option<String>), SessionError> {
        let Some(role) = step.role() else {
            return Ok((StepOutcome::Skipped, None));
        };
        if role == Role::NameInput && display_name.trim().is_empty() {
            return Ok((StepOutcome::Skipped, None));
        }
        let Some(driver) = handle.driver().await else {
            return Err(SessionError::Cancelled);
        };

        let hints = self.engine.table().hints(platform, role);
        let input = (role == Role::NameInput).then_some(display_name);
        let result = match self.engine.activate(driver.as_ref(), role, &hints, input).await {
            Activation::Activated { strategy, css } => {
                (StepOutcome::Succeeded, Some(format!("{} ({})", css, strategy)))
            }
            Activation::AlreadySatisfied => (StepOutcome::AlreadySatisfied, None),
            Activation::NotFound => (StepOutcome::NotFound, None),
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::NoCredentials;
    use crate::driver::fake::{Effect, FakeElement, FakeFactory, FakePage};
    use crate::locator::table::LocatorTable;

    struct Rig {
        factory: Arc<FakeFactory>,
        manager: Arc<BrowserSessionManager>,
        sequencer: JoinSequencer,
    }

    fn rig(page: FakePage) -> Rig {
        rig_with(Arc::new(FakeFactory::new(FakePage::new).queue(page)))
    }

    fn rig_with(factory: Arc<FakeFactory>) -> Rig {
        let dir = std::env::temp_dir().join(format!("meetbot-join-{}", uuid::Uuid::new_v4()));
        let manager = Arc::new(
            BrowserSessionManager::new(factory.clone(), Arc::new(NoCredentials), dir, 1_000)
                .with_retry_delay(Duration::ZERO),
        );
        let engine = Arc::new(LocatorEngine::new(Arc::new(LocatorTable::embedded().unwrap())));
        let config = JoinConfig {
            settle_ms: 0,
            step_delay_ms: 0,
            ..Default::default()
        };
        let sequencer = JoinSequencer::new(manager.clone(), engine, config, 1);
        Rig {
            factory,
            manager,
            sequencer,
        }
    }

    fn meet_lobby() -> FakePage {
        FakePage::new()
            .element(
                FakeElement::new("cam", "div")
                    .attr("role", "button")
                    .attr("data-is-muted", "false")
                    .attr("aria-label", "Turn off camera"),
            )
            .element(
                FakeElement::new("mic", "div")
                    .attr("role", "button")
                    .attr("data-is-muted", "true")
                    .attr("aria-label", "Turn on microphone"),
            )
            .element(FakeElement::new("name", "input").attr("placeholder", "Your name"))
            .element(FakeElement::new("join", "button").attr("jsname", "Qx7uuf").text("Ask to join"))
    }

    #[test]
    fn test_plans_keep_platform_differences() {
        let zoom = JoinPlan::for_platform(PlatformKind::Zoom);
        assert_eq!(zoom.steps[2].step, SubStep::OpenBrowserClient);

        let telemost = JoinPlan::for_platform(PlatformKind::YandexTelemost);
        assert_eq!(telemost.steps[2].step, SubStep::EnterName);

        for kind in PlatformKind::all() {
            let plan = JoinPlan::for_platform(kind);
            assert_eq!(plan.steps[0].step, SubStep::Navigate);
            assert_eq!(plan.steps[1].step, SubStep::LoginCheck);
            let join = plan.steps.iter().find(|s| s.step == SubStep::ClickJoin).unwrap();
            assert!(join.required);
            assert_eq!(plan.steps.last().unwrap().step, SubStep::Settle);
        }
    }

    #[tokio::test]
    async fn test_google_meet_lobby() {
        let rig = rig(meet_lobby());
        let handle = rig.manager.create("s").await.unwrap();

        let attempt = rig
            .sequencer
            .join(&handle, PlatformKind::GoogleMeet, "https://meet.google.com/abc-defg-hij", "Meeting Bot")
            .await;

        assert!(attempt.halted.is_none());
        assert_eq!(attempt.outcome_of(SubStep::DisableCamera), Some(StepOutcome::Succeeded));
        assert_eq!(attempt.outcome_of(SubStep::DisableMic), Some(StepOutcome::AlreadySatisfied));
        assert_eq!(attempt.outcome_of(SubStep::EnterName), Some(StepOutcome::Succeeded));
        assert!(attempt.join_control_found());

        let page = rig.factory.last_page().unwrap();
        assert_eq!(page.clicks(), vec!["cam", "join"]);
        assert_eq!(page.fills(), vec![("name".to_string(), "Meeting Bot".to_string())]);
        rig.manager.destroy(&handle).await;
    }

    #[tokio::test]
    async fn test_login_redirect_stops_the_plan() {
        let page = meet_lobby().redirect(
            "https://meet.google.com/abc-defg-hij",
            "https://accounts.google.com/ServiceLogin?continue=meet",
        );
        let rig = rig(page);
        let handle = rig.manager.create("s").await.unwrap();

        let attempt = rig
            .sequencer
            .join(&handle, PlatformKind::GoogleMeet, "https://meet.google.com/abc-defg-hij", "Bot")
            .await;

        assert!(matches!(attempt.halted, Some(SessionError::LoginRequired { .. })));
        assert_eq!(attempt.steps.len(), 2);
        assert!(rig.factory.last_page().unwrap().clicks().is_empty());
        rig.manager.destroy(&handle).await;
    }

    #[tokio::test]
    async fn test_missing_controls_are_not_fatal() {
        let rig = rig(FakePage::new());
        let handle = rig.manager.create("s").await.unwrap();

        let attempt = rig
            .sequencer
            .join(&handle, PlatformKind::KonturTalk, "https://talk.kontur.ru/room/1", "Bot")
            .await;

        assert!(attempt.halted.is_none());
        assert_eq!(attempt.outcome_of(SubStep::ClickJoin), Some(StepOutcome::NotFound));
        assert_eq!(attempt.outcome_of(SubStep::Settle), Some(StepOutcome::Succeeded));
        assert!(!attempt.join_control_found());
        let join = attempt
            .steps
            .iter()
            .find(|r| r.step == SubStep::ClickJoin)
            .unwrap();
        assert_eq!(join.detail.as_deref(), Some("join control not found"));
        rig.manager.destroy(&handle).await;
    }

    #[tokio::test]
    async fn test_zoom_uses_web_client() {
        let page = FakePage::new()
            .element(
                FakeElement::new("browser", "a")
                    .attr("href", "/wc/join/85512345678")
                    .text("Join from your browser"),
            )
            .on_click(
                "browser",
                vec![
                    Effect::SetUrl("https://us02web.zoom.us/wc/join/85512345678".into()),
                    Effect::AddElement(
                        FakeElement::new("join", "button")
                            .attr("class", "zm-btn preview-join-button")
                            .text("Join"),
                    ),
                ],
            );
        let rig = rig(page);
        let handle = rig.manager.create("s").await.unwrap();

        let attempt = rig
            .sequencer
            .join(&handle, PlatformKind::Zoom, "https://us02web.zoom.us/j/85512345678?pwd=x", "Bot")
            .await;

        assert_eq!(attempt.url, "https://us02web.zoom.us/wc/join/85512345678?pwd=x");
        assert_eq!(attempt.outcome_of(SubStep::OpenBrowserClient), Some(StepOutcome::Succeeded));
        assert!(attempt.join_control_found());
        assert_eq!(rig.factory.last_page().unwrap().clicks(), vec!["browser", "join"]);
        rig.manager.destroy(&handle).await;
    }

    #[tokio::test]
    async fn test_navigation_failure_halts() {
        let rig = rig_with(Arc::new(FakeFactory::new(|| FakePage::new().crash_on_goto(5))));
        let handle = rig.manager.create("s").await.unwrap();

        let attempt = rig
            .sequencer
            .join(&handle, PlatformKind::GoogleMeet, "https://meet.google.com/x", "Bot")
            .await;
        assert!(matches!(attempt.halted, Some(SessionError::AutomationCrash { .. })));
        assert_eq!(attempt.steps.len(), 1);
        rig.manager.destroy(&handle).await;
    }
}
