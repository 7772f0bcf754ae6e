//! Flow interpreter
//!
//! Walks a command list strictly in order. For every command it publishes a
//! start event, interpolates `${...}` expressions, records the evaluated
//! form in the metadata table and dispatches to a handler. Handlers report
//! whether they mutated device state; a mutation restarts the interaction
//! clock that all lookup timeouts are measured against.

use super::condition::ConditionEvaluator;
use super::error::{OrchestraError, OrchestraResult};
use super::events::{EventEmitter, OrchestraEvent};
use super::filters::build_filter;
use super::js_engine::{sanitize, JsEngine, ScriptEngine};
use super::lookup;
use super::state::{CommandMetadata, CommandOutcome, ErrorResolution, MetadataTable, OrchestraAppState};
use super::timeout::InteractionClock;
use crate::driver::hierarchy::{attr, UiElement};
use crate::driver::traits::{DeviceInfo, Driver, Point, SwipeDirection, SwipeGesture, TapOptions, TapTarget};
use crate::mock::{mitm, MitmProxy, NetworkMockController, NetworkProxy};
use crate::parser::types::{
    Command, CommandId, Condition, ElementSelector, FlowCommand, FlowConfig, InitFlow,
    InputRandomKind, InputRandomParams, LaunchAppParams, RepeatParams, RunFlowParams,
    ScrollUntilVisibleParams, SwipeParams, SwipeTarget, TapOnElementParams,
    TapOnRelativePointParams, DEFAULT_SWIPE_DURATION_MS,
};
use crate::utils::config::OrchestraConfig;
use anyhow::Context;
use std::path::Path;
use tokio::sync::broadcast;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

const MAX_ERASE_CHARACTERS: u32 = 50;
const DEFAULT_RANDOM_LENGTH: usize = 8;

/// Decides what happens after a command fails
pub trait FailureResolver: Send {
    fn resolve(&mut self, index: usize, command: &FlowCommand, error: &OrchestraError) -> ErrorResolution;
}

/// Abort on the first failure
pub struct FailFast;

impl FailureResolver for FailFast {
    fn resolve(&mut self, _index: usize, _command: &FlowCommand, _error: &OrchestraError) -> ErrorResolution {
        ErrorResolution::Fail
    }
}

impl<F> FailureResolver for F
where
    F: FnMut(usize, &FlowCommand, &OrchestraError) -> ErrorResolution + Send,
{
    fn resolve(&mut self, index: usize, command: &FlowCommand, error: &OrchestraError) -> ErrorResolution {
        self(index, command, error)
    }
}

pub struct Orchestra {
    driver: Box<dyn Driver>,
    js: Box<dyn ScriptEngine>,
    config: OrchestraConfig,
    clock: InteractionClock,
    /// Fetched on first use, dropped at the start of every run
    device_info: Option<DeviceInfo>,
    metadata: MetadataTable,
    emitter: EventEmitter,
    resolver: Box<dyn FailureResolver>,
    network_mock: NetworkMockController,
    copied_text: Option<String>,
    depth: usize,
}

impl Orchestra {
    pub fn new(driver: Box<dyn Driver>, config: OrchestraConfig) -> Self {
        let proxy = MitmProxy::new(config.proxy_port, mitm::default_work_dir(&config.state_dir))
            .with_binary(config.mitmdump_path.clone());
        let network_mock = NetworkMockController::new(Box::new(proxy), config.proxy_host.clone());

        Self {
            driver,
            js: Box::new(JsEngine::new()),
            config,
            clock: InteractionClock::new(),
            device_info: None,
            metadata: MetadataTable::new(),
            emitter: EventEmitter::default(),
            resolver: Box::new(FailFast),
            network_mock,
            copied_text: None,
            depth: 0,
        }
    }

    pub fn with_script_engine(mut self, js: Box<dyn ScriptEngine>) -> Self {
        self.js = js;
        self
    }

    pub fn with_failure_resolver(mut self, resolver: impl FailureResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    pub fn with_network_proxy(mut self, proxy: Box<dyn NetworkProxy>) -> Self {
        self.network_mock = NetworkMockController::new(proxy, self.config.proxy_host.clone());
        self
    }

    /// Subscribe to execution events
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestraEvent> {
        self.emitter.subscribe()
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub fn metadata(&self, id: CommandId) -> Option<&CommandMetadata> {
        self.metadata.get(id)
    }

    pub fn copied_text(&self) -> Option<&str> {
        self.copied_text.as_deref()
    }

    /// Stop the mock proxy, if one was started
    pub async fn close(&mut self) -> OrchestraResult<()> {
        self.network_mock.shutdown(self.driver.as_ref()).await?;
        Ok(())
    }

    /// Run a flow from a clean script state
    ///
    /// Without `initial_state`, an init flow declared by the flow's
    /// configuration runs first and its app state is restored before the
    /// main commands. Returns `false` when a command failure aborted the run.
    pub async fn run_flow(
        &mut self,
        commands: &[FlowCommand],
        initial_state: Option<OrchestraAppState>,
    ) -> OrchestraResult<bool> {
        self.js.init();
        self.clock.touch();
        self.device_info = None;

        let state = match initial_state {
            Some(state) => Some(state),
            None => match flow_config(commands).and_then(|c| c.init_flow.as_ref()) {
                Some(init_flow) => match self.run_init_flow(init_flow).await? {
                    Some(state) => Some(state),
                    None => return Ok(false),
                },
                None => None,
            },
        };

        if let Some(state) = &state {
            self.driver.clear_app_state(&state.app_id).await?;
            self.driver.push_app_state(&state.app_id, &state.file).await?;
        }

        self.emitter.emit(OrchestraEvent::FlowStarted {
            command_count: commands.len(),
            depth: self.depth,
        });
        let start = Instant::now();
        let success = self.execute_commands(commands).await;
        self.emitter.emit(OrchestraEvent::FlowFinished {
            success,
            duration_ms: elapsed_ms(start),
            depth: self.depth,
        });

        Ok(success)
    }

    /// Run an init flow and capture the app state it leaves behind
    pub async fn run_init_flow(&mut self, init_flow: &InitFlow) -> OrchestraResult<Option<OrchestraAppState>> {
        self.depth += 1;
        let result = Box::pin(self.run_flow(&init_flow.commands, None)).await;
        self.depth -= 1;
        if !result? {
            return Ok(None);
        }

        self.driver.stop_app(&init_flow.app_id).await?;

        let state_dir = &self.config.state_dir;
        tokio::fs::create_dir_all(state_dir)
            .await
            .with_context(|| format!("Failed to create state directory {}", state_dir.display()))?;
        let file = state_dir.join(format!("{}.state", Uuid::new_v4()));
        self.driver.pull_app_state(&init_flow.app_id, &file).await?;
        log::info!("Saved init flow state of {} to {}", init_flow.app_id, file.display());

        Ok(Some(OrchestraAppState {
            app_id: init_flow.app_id.clone(),
            file,
        }))
    }

    /// Top-level pass: `false` as soon as a failure resolves to FAIL
    pub async fn execute_commands(&mut self, commands: &[FlowCommand]) -> bool {
        for (index, command) in commands.iter().enumerate() {
            if let Err(error) = self.run_command(index, command).await {
                if self.resolver.resolve(index, command, &error) == ErrorResolution::Fail {
                    return false;
                }
            }
        }
        true
    }

    /// Nested pass in its own script scope; a FAIL resolution propagates the error
    async fn run_sub_flow(&mut self, commands: &[FlowCommand]) -> OrchestraResult<bool> {
        let scope = self.js.enter_scope();
        self.depth += 1;
        let result = self.run_sub_commands(commands).await;
        self.depth -= 1;
        self.js.leave_scope(scope);
        result
    }

    async fn run_sub_commands(&mut self, commands: &[FlowCommand]) -> OrchestraResult<bool> {
        let mut mutated = false;
        for (index, command) in commands.iter().enumerate() {
            match self.run_command(index, command).await {
                Ok(outcome) => mutated |= outcome.is_mutating(),
                Err(error) => match self.resolver.resolve(index, command, &error) {
                    ErrorResolution::Fail => return Err(error),
                    ErrorResolution::Continue => {}
                },
            }
        }
        Ok(mutated)
    }

    async fn run_command(&mut self, index: usize, command: &FlowCommand) -> OrchestraResult<CommandOutcome> {
        let id = command.id;
        let depth = self.depth;
        self.emitter.emit(OrchestraEvent::CommandStarted {
            index,
            id,
            command: command.command.description(),
            depth,
        });

        let start = Instant::now();
        let result = self.evaluate_and_execute(command).await;

        match &result {
            Ok(CommandOutcome::Skipped) => {
                self.emitter.emit(OrchestraEvent::CommandSkipped { index, id, depth });
            }
            Ok(_) => {
                self.emitter.emit(OrchestraEvent::CommandCompleted {
                    index,
                    id,
                    duration_ms: elapsed_ms(start),
                    depth,
                });
            }
            Err(error) => {
                log::debug!("Command {} failed: {}", id, error);
                self.emitter.emit(OrchestraEvent::CommandFailed {
                    index,
                    id,
                    error: error.to_string(),
                    duration_ms: elapsed_ms(start),
                    depth,
                });
            }
        }
        result
    }

    async fn evaluate_and_execute(&mut self, command: &FlowCommand) -> OrchestraResult<CommandOutcome> {
        let js = &mut self.js;
        let evaluated = command
            .command
            .evaluate_scripts(&mut |s: &str| js.interpolate(s))
            .map_err(OrchestraError::Script)?;

        let mut metadata = self.metadata.get_or_default(command.id);
        metadata.evaluated_command = Some(evaluated.clone());
        self.update_metadata(command.id, metadata);

        let outcome = self.execute(command.id, &evaluated).await?;
        if outcome.is_mutating() {
            self.clock.touch();
        }
        Ok(outcome)
    }

    async fn execute(&mut self, id: CommandId, command: &Command) -> OrchestraResult<CommandOutcome> {
        use CommandOutcome::{Mutated, Unmutated};

        match command {
            Command::TapOnElement(params) => self.tap_on_element(params).await,
            Command::LongPress(selector) => {
                let params = TapOnElementParams {
                    selector: selector.clone(),
                    long_press: Some(true),
                    ..Default::default()
                };
                self.tap_on_element(&params).await
            }
            Command::TapOnPoint(params) => {
                let options = TapOptions {
                    retry_if_no_change: params.retry_if_no_change.unwrap_or(true),
                    wait_until_visible: false,
                    long_press: params.long_press.unwrap_or(false),
                };
                self.driver
                    .tap(&TapTarget::Point(Point::new(params.x, params.y)), options)
                    .await?;
                Ok(Mutated)
            }
            Command::TapOnRelativePoint(params) => self.tap_on_relative_point(params).await,
            Command::InputText(text) => self.input_text(text).await,
            Command::InputRandom(params) => self.input_text(&random_input(params)).await,
            Command::EraseText(count) => {
                self.driver
                    .erase_text(count.unwrap_or(MAX_ERASE_CHARACTERS))
                    .await?;
                self.driver.wait_for_animation_to_end(None).await?;
                Ok(Mutated)
            }
            Command::PressKey(code) => {
                self.driver.press_key(*code).await?;
                Ok(Mutated)
            }
            Command::BackPress => {
                self.driver.back_press().await?;
                Ok(Mutated)
            }
            Command::HideKeyboard => {
                self.driver.hide_keyboard().await?;
                Ok(Mutated)
            }
            Command::CopyTextFrom(selector) => self.copy_text_from(selector).await,
            Command::PasteText => {
                if let Some(text) = self.copied_text.clone() {
                    self.driver.input_text(&text).await?;
                }
                Ok(Mutated)
            }
            Command::Swipe(params) => self.swipe(params).await,
            Command::Scroll => {
                self.driver
                    .swipe(&SwipeGesture::Direction(SwipeDirection::Up), DEFAULT_SWIPE_DURATION_MS)
                    .await?;
                Ok(Mutated)
            }
            Command::ScrollUntilVisible(params) => self.scroll_until_visible(params).await,
            Command::AssertVisible(selector) => {
                let condition = Condition {
                    visible: Some(selector.clone()),
                    ..Default::default()
                };
                self.assert_condition(&condition, None).await
            }
            Command::AssertNotVisible(selector) => {
                let condition = Condition {
                    not_visible: Some(selector.clone()),
                    ..Default::default()
                };
                self.assert_condition(&condition, None).await
            }
            Command::AssertCondition(params) => {
                self.assert_condition(&params.condition, params.timeout).await
            }
            Command::LaunchApp(params) => self.launch_app(params).await,
            Command::StopApp(app_id) => {
                self.driver.stop_app(app_id).await?;
                Ok(Mutated)
            }
            Command::ClearAppState(app_id) => {
                self.driver.clear_app_state(app_id).await?;
                Ok(Mutated)
            }
            Command::ClearKeychain => {
                self.driver.clear_keychain().await?;
                Ok(Mutated)
            }
            Command::OpenLink(link) => {
                self.driver.open_link(link).await?;
                Ok(Mutated)
            }
            Command::SetLocation(params) => {
                self.driver
                    .set_location(params.latitude, params.longitude)
                    .await?;
                Ok(Mutated)
            }
            Command::TakeScreenshot(path) => {
                let dir = &self.config.screenshots_dir;
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
                self.driver
                    .take_screenshot(&dir.join(format!("{}.png", path)))
                    .await?;
                Ok(Unmutated)
            }
            Command::WaitForAnimationToEnd(timeout) => {
                self.driver.wait_for_animation_to_end(*timeout).await?;
                Ok(Mutated)
            }
            Command::MockNetwork(path) => {
                self.network_mock
                    .start_or_update(self.driver.as_ref(), Path::new(path))
                    .await?;
                Ok(Unmutated)
            }
            Command::RunFlow(params) => self.run_flow_command(params).await,
            Command::Repeat(params) => self.repeat(id, params).await,
            Command::DefineVariables(env) => {
                for (name, value) in env {
                    self.js.define(name, value).map_err(OrchestraError::Script)?;
                }
                Ok(Unmutated)
            }
            Command::RunScript(params) => {
                if let Some(source) = &params.source {
                    log::debug!("Running script {}", source);
                }
                self.js
                    .run_script(&params.script, &params.env)
                    .map_err(OrchestraError::Script)?;
                Ok(Mutated)
            }
            Command::EvalScript(script) => {
                self.js.interpolate(script).map_err(OrchestraError::Script)?;
                Ok(Mutated)
            }
            Command::ApplyConfiguration(_) => Ok(Unmutated),
        }
    }

    // ------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------

    async fn tap_on_element(&mut self, params: &TapOnElementParams) -> OrchestraResult<CommandOutcome> {
        let Some(element) = self.find_optional(&params.selector).await? else {
            return Ok(CommandOutcome::Skipped);
        };

        let options = TapOptions {
            retry_if_no_change: params.retry_if_no_change.unwrap_or(true),
            wait_until_visible: params.wait_until_visible.unwrap_or(false),
            long_press: params.long_press.unwrap_or(false),
        };
        self.driver.tap(&TapTarget::Element(element), options).await?;
        Ok(CommandOutcome::Mutated)
    }

    async fn tap_on_relative_point(&mut self, params: &TapOnRelativePointParams) -> OrchestraResult<CommandOutcome> {
        let point = if params.point.contains('%') {
            let (x, y) = parse_percent_point(&params.point)?;
            self.device_info().await?.point_at_percent(x, y)
        } else {
            let (x, y) = parse_pair(&params.point)
                .ok_or_else(|| OrchestraError::InvalidCommand(format!("Invalid point: {}", params.point)))?;
            Point::new(x, y)
        };

        let options = TapOptions {
            retry_if_no_change: params.retry_if_no_change.unwrap_or(true),
            wait_until_visible: false,
            long_press: params.long_press.unwrap_or(false),
        };
        self.driver.tap(&TapTarget::Point(point), options).await?;
        Ok(CommandOutcome::Mutated)
    }

    async fn input_text(&mut self, text: &str) -> OrchestraResult<CommandOutcome> {
        if !text.is_ascii() && !self.driver.is_unicode_input_supported().await? {
            return Err(OrchestraError::UnicodeNotSupported(text.to_string()));
        }
        self.driver.input_text(text).await?;
        Ok(CommandOutcome::Mutated)
    }

    async fn copy_text_from(&mut self, selector: &ElementSelector) -> OrchestraResult<CommandOutcome> {
        let Some(element) = self.find_optional(selector).await? else {
            return Ok(CommandOutcome::Skipped);
        };

        let text = element
            .tree_node
            .attribute(attr::TEXT)
            .map(str::to_string)
            .ok_or_else(|| {
                OrchestraError::UnableToCopyTextFromElement(format!(
                    "Element does not contain text to copy: {}",
                    selector.description()
                ))
            })?;

        self.js
            .evaluate(&format!("lumi.copiedText = '{}'", sanitize(&text)))
            .map_err(OrchestraError::Script)?;
        self.copied_text = Some(text);
        Ok(CommandOutcome::Mutated)
    }

    async fn swipe(&mut self, params: &SwipeParams) -> OrchestraResult<CommandOutcome> {
        let gesture = match &params.target {
            SwipeTarget::Direction(direction) => SwipeGesture::Direction(*direction),
            SwipeTarget::Coordinates { start, end } => SwipeGesture::Points {
                start: *start,
                end: *end,
            },
            SwipeTarget::Relative { start, end } => {
                let info = self.device_info().await?;
                let (sx, sy) = parse_percent_point(start)?;
                let (ex, ey) = parse_percent_point(end)?;
                SwipeGesture::Points {
                    start: info.point_at_percent(sx, sy),
                    end: info.point_at_percent(ex, ey),
                }
            }
            SwipeTarget::Element { selector, direction } => {
                let Some(element) = self.find_optional(selector).await? else {
                    return Ok(CommandOutcome::Skipped);
                };
                SwipeGesture::FromElement {
                    center: element.center(),
                    direction: *direction,
                }
            }
        };

        self.driver.swipe(&gesture, params.duration_ms).await?;
        Ok(CommandOutcome::Mutated)
    }

    async fn scroll_until_visible(&mut self, params: &ScrollUntilVisibleParams) -> OrchestraResult<CommandOutcome> {
        let info = self.device_info().await?;
        let filter = build_filter(&params.selector, &info);
        let end = Instant::now() + Duration::from_millis(params.timeout);
        // Content moves down when the finger moves up
        let gesture = SwipeGesture::Direction(params.direction.opposite());

        let last_error = loop {
            self.driver.wait_for_animation_to_end(None).await?;
            let error = match lookup::find_element(
                self.driver.as_ref(),
                &filter,
                self.config.scroll_attempt_timeout_ms,
                self.config.poll_interval_ms,
            )
            .await
            {
                Ok(_) => return Ok(CommandOutcome::Mutated),
                Err(e) if e.is_element_not_found() => e,
                Err(e) => return Err(e),
            };

            self.driver
                .swipe(&gesture, self.config.scroll_swipe_duration_ms)
                .await?;

            if Instant::now() >= end {
                break error;
            }
        };

        if params.selector.optional {
            return Ok(CommandOutcome::Skipped);
        }
        Err(last_error)
    }

    async fn assert_condition(&mut self, condition: &Condition, timeout: Option<u64>) -> OrchestraResult<CommandOutcome> {
        let timeout = timeout.unwrap_or(self.config.lookup_timeout_ms);
        if self.evaluate_condition(condition, Some(timeout)).await? {
            return Ok(CommandOutcome::Unmutated);
        }

        if condition.is_optional() {
            return Ok(CommandOutcome::Skipped);
        }

        let hierarchy = self.driver.view_hierarchy().await?;
        Err(OrchestraError::AssertionFailure {
            message: format!("Assertion is false: {}", condition.description()),
            hierarchy: Box::new(hierarchy),
        })
    }

    async fn launch_app(&mut self, params: &LaunchAppParams) -> OrchestraResult<CommandOutcome> {
        let app_id = &params.app_id;
        let cleared = async {
            if params.clear_keychain == Some(true) {
                self.driver.clear_keychain().await?;
            }
            if params.clear_state == Some(true) {
                self.driver.clear_app_state(app_id).await?;
            }
            Ok::<_, anyhow::Error>(())
        }
        .await;
        if let Err(e) = cleared {
            log::debug!("Clearing state of {} failed: {:#}", app_id, e);
            return Err(OrchestraError::UnableToClearState(format!(
                "Unable to clear state for app {}",
                app_id
            )));
        }

        self.driver
            .launch_app(app_id, params.stop_app.unwrap_or(true))
            .await
            .map_err(|e| OrchestraError::UnableToLaunchApp(format!("Unable to launch app {}: {}", app_id, e)))?;
        Ok(CommandOutcome::Mutated)
    }

    async fn run_flow_command(&mut self, params: &RunFlowParams) -> OrchestraResult<CommandOutcome> {
        if let Some(label) = &params.label {
            log::debug!("Entering sub-flow {}", label);
        }
        if !self.check_guard(params.condition.as_ref()).await? {
            return Ok(CommandOutcome::Skipped);
        }
        let mutated = Box::pin(self.run_sub_flow(&params.commands)).await?;
        Ok(CommandOutcome::from_mutation(mutated))
    }

    async fn repeat(&mut self, id: CommandId, params: &RepeatParams) -> OrchestraResult<CommandOutcome> {
        let max_runs = params
            .times
            .as_deref()
            .and_then(|t| t.trim().parse::<i64>().ok())
            .map_or(u64::MAX, |n| n.max(0) as u64);

        let mut metadata = self.metadata.get_or_default(id);
        let mut counter: u64 = 0;
        let mut mutated = false;
        while counter < max_runs && self.check_guard(params.condition.as_ref()).await? {
            if counter > 0 {
                for child in &params.commands {
                    self.reset_command(child);
                }
            }

            mutated |= Box::pin(self.run_sub_flow(&params.commands)).await?;
            counter += 1;

            metadata.number_of_runs = Some(u32::try_from(counter).unwrap_or(u32::MAX));
            self.update_metadata(id, metadata.clone());
        }

        if counter == 0 {
            return Ok(CommandOutcome::Skipped);
        }
        Ok(CommandOutcome::from_mutation(mutated))
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn device_info(&mut self) -> OrchestraResult<DeviceInfo> {
        if let Some(info) = &self.device_info {
            return Ok(info.clone());
        }
        let info = self.driver.device_info().await?;
        self.device_info = Some(info.clone());
        Ok(info)
    }

    /// Lookup with the selector's default (interaction-adjusted) timeout
    async fn find_element(&mut self, selector: &ElementSelector) -> OrchestraResult<UiElement> {
        let nominal = if selector.optional {
            self.config.optional_lookup_timeout_ms
        } else {
            self.config.lookup_timeout_ms
        };
        let timeout = self.clock.adjusted(nominal);

        let info = self.device_info().await?;
        let filter = build_filter(selector, &info);
        lookup::find_element(
            self.driver.as_ref(),
            &filter,
            timeout,
            self.config.poll_interval_ms,
        )
        .await
    }

    /// `None` when an optional element is absent
    async fn find_optional(&mut self, selector: &ElementSelector) -> OrchestraResult<Option<UiElement>> {
        match self.find_element(selector).await {
            Ok(element) => Ok(Some(element)),
            Err(e) if e.is_element_not_found() && selector.optional => {
                log::info!("Optional element not found: {}", selector.description());
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn evaluate_condition(&mut self, condition: &Condition, timeout_ms: Option<u64>) -> OrchestraResult<bool> {
        let info = self.device_info().await?;
        let evaluator = ConditionEvaluator {
            driver: self.driver.as_ref(),
            device_info: &info,
            clock: &self.clock,
            config: &self.config,
        };
        evaluator.evaluate(condition, timeout_ms).await
    }

    /// Guards of composite commands are interpolated at every check
    async fn check_guard(&mut self, condition: Option<&Condition>) -> OrchestraResult<bool> {
        let Some(condition) = condition else {
            return Ok(true);
        };
        let js = &mut self.js;
        let evaluated = condition
            .evaluate_scripts(&mut |s: &str| js.interpolate(s))
            .map_err(OrchestraError::Script)?;
        self.evaluate_condition(&evaluated, None).await
    }

    fn update_metadata(&mut self, id: CommandId, metadata: CommandMetadata) {
        self.metadata.update(id, metadata.clone());
        self.emitter
            .emit(OrchestraEvent::CommandMetadataUpdated { id, metadata });
    }

    fn reset_command(&mut self, command: &FlowCommand) {
        self.metadata.reset(command.id);
        self.emitter.emit(OrchestraEvent::CommandReset {
            id: command.id,
            command: command.command.description(),
            depth: self.depth,
        });
        for child in command.command.sub_commands() {
            self.reset_command(child);
        }
    }
}

/// Configuration carried by the flow's leading `ApplyConfiguration`
fn flow_config(commands: &[FlowCommand]) -> Option<&FlowConfig> {
    commands.iter().find_map(|c| match &c.command {
        Command::ApplyConfiguration(config) => Some(config),
        _ => None,
    })
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn parse_pair(s: &str) -> Option<(i32, i32)> {
    let mut parts = s.split(',').map(|p| p.trim().parse::<i32>());
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(x)), Some(Ok(y)), None) => Some((x, y)),
        _ => None,
    }
}

/// `"x%, y%"` with both values in 0..=100
fn parse_percent_point(s: &str) -> OrchestraResult<(u32, u32)> {
    let invalid = || OrchestraError::InvalidCommand(format!("Invalid point: {}", s));
    let (x, y) = parse_pair(&s.replace('%', "")).ok_or_else(invalid)?;
    if !(0..=100).contains(&x) || !(0..=100).contains(&y) {
        return Err(invalid());
    }
    Ok((x as u32, y as u32))
}

fn random_input(params: &InputRandomParams) -> String {
    use fake::faker::internet::en::SafeEmail;
    use fake::faker::name::en::Name;
    use fake::Fake;
    use rand::distributions::Alphanumeric;
    use rand::Rng;

    let length = params.length.unwrap_or(DEFAULT_RANDOM_LENGTH);
    let mut rng = rand::thread_rng();
    match params.kind {
        InputRandomKind::Text => (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect(),
        InputRandomKind::Number => (0..length)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect(),
        InputRandomKind::Email => SafeEmail().fake(),
        InputRandomKind::PersonName => Name().fake(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::{screen, text_element, FakeDriver, FakeEvent};
    use crate::driver::hierarchy::{Bounds, TreeNode};
    use crate::mock::testing::CountingProxy;
    use crate::parser::types::{build_flow, AssertConditionParams};
    use std::collections::BTreeMap;

    fn test_config() -> OrchestraConfig {
        let dir = std::env::temp_dir().join(format!("lumi-orchestra-{}", Uuid::new_v4()));
        OrchestraConfig {
            screenshots_dir: dir.join("screenshots"),
            state_dir: dir.join("state"),
            ..Default::default()
        }
    }

    async fn orchestra_for(driver: &FakeDriver) -> Orchestra {
        driver.open().await.unwrap();
        Orchestra::new(Box::new(driver.clone()), test_config())
            .with_network_proxy(Box::new(CountingProxy::default()))
    }

    fn login_screen() -> TreeNode {
        screen(vec![
            text_element("Welcome", Bounds::new(20, 20, 200, 60)),
            text_element("Login", Bounds::new(20, 100, 200, 160)),
        ])
    }

    fn drain(rx: &mut broadcast::Receiver<OrchestraEvent>) -> Vec<OrchestraEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn tap_on(selector: ElementSelector) -> Command {
        Command::TapOnElement(TapOnElementParams {
            selector,
            ..Default::default()
        })
    }

    fn script_condition(script: &str) -> Condition {
        Condition {
            script_condition: Some(script.to_string()),
            ..Default::default()
        }
    }

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn continue_on_failure(_: usize, _: &FlowCommand, _: &OrchestraError) -> ErrorResolution {
        ErrorResolution::Continue
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_assert_and_tap() {
        let driver = FakeDriver::new();
        driver.add_installed_app("com.example");
        driver.on_launch("com.example", login_screen());
        let mut orchestra = orchestra_for(&driver).await;
        let mut rx = orchestra.subscribe();

        let flow = build_flow(vec![
            Command::LaunchApp(LaunchAppParams {
                app_id: "com.example".into(),
                ..Default::default()
            }),
            Command::AssertVisible(ElementSelector::text("Welcome")),
            tap_on(ElementSelector::text("Login")),
        ]);

        assert!(orchestra.run_flow(&flow, None).await.unwrap());

        let events = drain(&mut rx);
        let started = events
            .iter()
            .filter(|e| matches!(e, OrchestraEvent::CommandStarted { .. }))
            .count();
        let completed = events
            .iter()
            .filter(|e| matches!(e, OrchestraEvent::CommandCompleted { .. }))
            .count();
        let skipped = events
            .iter()
            .filter(|e| matches!(e, OrchestraEvent::CommandSkipped { .. }))
            .count();
        assert_eq!((started, completed, skipped), (3, 3, 0));
        assert!(matches!(
            events.last(),
            Some(OrchestraEvent::FlowFinished { success: true, depth: 0, .. })
        ));

        assert_eq!(
            driver.events(),
            vec![
                FakeEvent::LaunchApp {
                    app_id: "com.example".into(),
                    stop_if_running: true
                },
                FakeEvent::Tap {
                    point: Point::new(110, 130),
                    long_press: false
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_optional_element_is_skipped() {
        let driver = FakeDriver::new();
        driver.set_hierarchy(login_screen());
        let mut orchestra = orchestra_for(&driver).await;
        let mut rx = orchestra.subscribe();

        let flow = build_flow(vec![
            tap_on(ElementSelector::text("Accept cookies").optional()),
            Command::BackPress,
        ]);

        assert!(orchestra.run_flow(&flow, None).await.unwrap());
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, OrchestraEvent::CommandSkipped { index: 0, .. })));
        assert_eq!(driver.events(), vec![FakeEvent::BackPress]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_element_aborts_flow() {
        let driver = FakeDriver::new();
        driver.set_hierarchy(login_screen());
        let mut orchestra = orchestra_for(&driver).await;
        let mut rx = orchestra.subscribe();

        let flow = build_flow(vec![
            tap_on(ElementSelector::text("Sign up")),
            Command::BackPress,
        ]);

        let start = Instant::now();
        assert!(!orchestra.run_flow(&flow, None).await.unwrap());
        assert!(start.elapsed() >= Duration::from_millis(17000));
        assert!(driver.events().is_empty());

        let error = drain(&mut rx).into_iter().find_map(|e| match e {
            OrchestraEvent::CommandFailed { error, .. } => Some(error),
            _ => None,
        });
        assert_eq!(
            error.as_deref(),
            Some("Element not found: Text matching regex: Sign up")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_resolution_keeps_going() {
        let driver = FakeDriver::new();
        driver.set_unicode_input_supported(false);
        let mut orchestra = orchestra_for(&driver)
            .await
            .with_failure_resolver(continue_on_failure);

        let flow = build_flow(vec![
            Command::InputText("héllo".into()),
            Command::InputText("hello".into()),
        ]);

        assert!(orchestra.run_flow(&flow, None).await.unwrap());
        assert_eq!(driver.events(), vec![FakeEvent::InputText("hello".into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_inside_sub_flow_propagates() {
        let driver = FakeDriver::new();
        driver.set_hierarchy(login_screen());
        let mut orchestra = orchestra_for(&driver).await;

        let flow = build_flow(vec![
            Command::RunFlow(RunFlowParams {
                commands: vec![
                    FlowCommand::new(tap_on(ElementSelector::text("Nope"))),
                    FlowCommand::new(Command::HideKeyboard),
                ],
                ..Default::default()
            }),
            Command::BackPress,
        ]);

        assert!(!orchestra.run_flow(&flow, None).await.unwrap());
        assert!(driver.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_while_guard_holds() {
        let driver = FakeDriver::new();
        let mut orchestra = orchestra_for(&driver).await;
        let mut rx = orchestra.subscribe();

        let flow = build_flow(vec![
            Command::DefineVariables(vars(&[("counter", "0")])),
            Command::Repeat(RepeatParams {
                times: None,
                condition: Some(script_condition("${counter < 3}")),
                commands: vec![
                    FlowCommand::new(Command::EvalScript("${counter = Number(counter) + 1}".into())),
                    FlowCommand::new(Command::BackPress),
                ],
            }),
        ]);

        assert!(orchestra.run_flow(&flow, None).await.unwrap());
        assert_eq!(driver.event_count(&FakeEvent::BackPress), 3);
        assert_eq!(
            orchestra.metadata(CommandId(1)).and_then(|m| m.number_of_runs),
            Some(3)
        );

        let events = drain(&mut rx);
        let resets: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, OrchestraEvent::CommandReset { .. }))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(resets.len(), 4);

        let first_back_press = events
            .iter()
            .position(|e| matches!(e, OrchestraEvent::CommandCompleted { id: CommandId(3), .. }))
            .unwrap();
        assert!(resets[0] > first_back_press);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_times_bound() {
        let driver = FakeDriver::new();
        let mut orchestra = orchestra_for(&driver).await;

        let flow = build_flow(vec![Command::Repeat(RepeatParams {
            times: Some("2".into()),
            condition: None,
            commands: vec![FlowCommand::new(Command::BackPress)],
        })]);

        assert!(orchestra.run_flow(&flow, None).await.unwrap());
        assert_eq!(driver.event_count(&FakeEvent::BackPress), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_false_guard_skips_composite() {
        let driver = FakeDriver::new();
        let mut orchestra = orchestra_for(&driver).await;
        let mut rx = orchestra.subscribe();

        let flow = build_flow(vec![
            Command::Repeat(RepeatParams {
                times: None,
                condition: Some(script_condition("${1 > 2}")),
                commands: vec![FlowCommand::new(Command::BackPress)],
            }),
            Command::RunFlow(RunFlowParams {
                commands: vec![FlowCommand::new(Command::BackPress)],
                condition: Some(script_condition("${false}")),
                label: None,
            }),
        ]);

        assert!(orchestra.run_flow(&flow, None).await.unwrap());
        assert!(driver.events().is_empty());

        let skipped: Vec<usize> = drain(&mut rx)
            .iter()
            .filter_map(|e| match e {
                OrchestraEvent::CommandSkipped { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(skipped, vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sub_flow_variables_are_scoped() {
        let driver = FakeDriver::new();
        let mut orchestra = orchestra_for(&driver).await;

        let flow = build_flow(vec![
            Command::DefineVariables(vars(&[("outer", "before")])),
            Command::RunFlow(RunFlowParams {
                commands: vec![
                    FlowCommand::new(Command::DefineVariables(vars(&[("inner", "x")]))),
                    FlowCommand::new(Command::EvalScript("${outer = 'after'}".into())),
                ],
                ..Default::default()
            }),
            Command::AssertCondition(AssertConditionParams {
                condition: script_condition("${typeof inner === 'undefined'}"),
                timeout: None,
            }),
            Command::AssertCondition(AssertConditionParams {
                condition: script_condition("${outer === 'after'}"),
                timeout: None,
            }),
        ]);

        assert!(orchestra.run_flow(&flow, None).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sub_flow_definition_shadows_parent() {
        let driver = FakeDriver::new();
        let mut orchestra = orchestra_for(&driver).await;

        let flow = build_flow(vec![
            Command::DefineVariables(vars(&[("user", "parent")])),
            Command::RunFlow(RunFlowParams {
                commands: vec![
                    FlowCommand::new(Command::DefineVariables(vars(&[("user", "child")]))),
                    FlowCommand::new(Command::InputText("${user}".into())),
                ],
                ..Default::default()
            }),
            Command::InputText("${user}".into()),
        ]);

        assert!(orchestra.run_flow(&flow, None).await.unwrap());
        assert_eq!(
            driver.events(),
            vec![
                FakeEvent::InputText("child".into()),
                FakeEvent::InputText("parent".into()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_scope_released_after_sub_flow_failure() {
        let failing_sub_flow = || {
            Command::RunFlow(RunFlowParams {
                commands: vec![
                    FlowCommand::new(Command::DefineVariables(vars(&[("inner", "x")]))),
                    FlowCommand::new(Command::AssertCondition(AssertConditionParams {
                        condition: script_condition("${inner === 'y'}"),
                        timeout: None,
                    })),
                ],
                ..Default::default()
            })
        };

        let driver = FakeDriver::new();
        let mut orchestra = orchestra_for(&driver)
            .await
            .with_failure_resolver(continue_on_failure);
        let flow = build_flow(vec![
            failing_sub_flow(),
            Command::AssertCondition(AssertConditionParams {
                condition: script_condition("${typeof inner === 'undefined'}"),
                timeout: None,
            }),
        ]);
        assert!(orchestra.run_flow(&flow, None).await.unwrap());

        let mut orchestra = orchestra_for(&driver).await;
        let flow = build_flow(vec![failing_sub_flow()]);
        assert!(!orchestra.run_flow(&flow, None).await.unwrap());
        assert_eq!(orchestra.js.evaluate("typeof inner").unwrap(), "undefined");
    }

    #[tokio::test(start_paused = true)]
    async fn test_false_script_assertion_fails() {
        let driver = FakeDriver::new();
        let mut orchestra = orchestra_for(&driver).await;
        let mut rx = orchestra.subscribe();

        let flow = build_flow(vec![Command::AssertCondition(AssertConditionParams {
            condition: script_condition("${2 + 2 === 5}"),
            timeout: None,
        })]);

        assert!(!orchestra.run_flow(&flow, None).await.unwrap());
        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            OrchestraEvent::CommandFailed { error, .. } if error == "Assertion is false: false is true"
        )));
    }

    #[tokio::test]
    async fn test_mock_network_starts_proxy_once() {
        let dir = std::env::temp_dir().join(format!("lumi-orchestra-mock-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let rules = dir.join("rules.yaml");
        std::fs::write(&rules, "- path: /api/.*\n  response:\n    status: 500\n").unwrap();

        let driver = FakeDriver::new();
        driver.open().await.unwrap();
        let proxy = CountingProxy::default();
        let log = proxy.log.clone();
        let mut orchestra = Orchestra::new(Box::new(driver.clone()), test_config())
            .with_network_proxy(Box::new(proxy));

        let path = rules.display().to_string();
        let flow = build_flow(vec![
            Command::MockNetwork(path.clone()),
            Command::MockNetwork(path),
        ]);
        assert!(orchestra.run_flow(&flow, None).await.unwrap());
        assert_eq!(log.lock().unwrap().starts, 1);
        assert_eq!(
            driver.event_count(&FakeEvent::SetProxy {
                host: "127.0.0.1".into(),
                port: 8085
            }),
            1
        );

        orchestra.close().await.unwrap();
        assert_eq!(driver.event_count(&FakeEvent::ResetProxy), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_flow_state_is_restored() {
        let driver = FakeDriver::new();
        driver.add_installed_app("com.example");
        let mut orchestra = orchestra_for(&driver).await;

        let flow = build_flow(vec![
            Command::ApplyConfiguration(FlowConfig {
                app_id: "com.example".into(),
                name: None,
                init_flow: Some(InitFlow {
                    app_id: "com.example".into(),
                    commands: vec![FlowCommand::new(Command::InputText("seed".into()))],
                }),
            }),
            Command::BackPress,
        ]);

        assert!(orchestra.run_flow(&flow, None).await.unwrap());

        let events = driver.events();
        let position = |wanted: fn(&FakeEvent) -> bool| events.iter().position(|e| wanted(e)).unwrap();
        let input = position(|e| matches!(e, FakeEvent::InputText(_)));
        let stop = position(|e| matches!(e, FakeEvent::StopApp(_)));
        let pull = position(|e| matches!(e, FakeEvent::PullAppState(..)));
        let clear = position(|e| matches!(e, FakeEvent::ClearState(_)));
        let push = position(|e| matches!(e, FakeEvent::PushAppState(..)));
        let back = position(|e| matches!(e, FakeEvent::BackPress));
        assert!(input < stop && stop < pull && pull < clear && clear < push && push < back);

        assert!(driver.pushed_state().unwrap().contains("seed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_init_flow_aborts_run() {
        let driver = FakeDriver::new();
        driver.add_installed_app("com.example");
        driver.set_hierarchy(login_screen());
        let mut orchestra = orchestra_for(&driver).await;

        let flow = build_flow(vec![
            Command::ApplyConfiguration(FlowConfig {
                app_id: "com.example".into(),
                name: None,
                init_flow: Some(InitFlow {
                    app_id: "com.example".into(),
                    commands: vec![FlowCommand::new(tap_on(ElementSelector::text("Missing")))],
                }),
            }),
            Command::BackPress,
        ]);

        assert!(!orchestra.run_flow(&flow, None).await.unwrap());
        assert!(driver.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_given_state_skips_init_flow() {
        let dir = std::env::temp_dir().join(format!("lumi-orchestra-state-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("saved.state");
        std::fs::write(&file, "[\"saved\"]").unwrap();

        let driver = FakeDriver::new();
        driver.add_installed_app("com.example");
        let mut orchestra = orchestra_for(&driver).await;

        let flow = build_flow(vec![
            Command::ApplyConfiguration(FlowConfig {
                app_id: "com.example".into(),
                name: None,
                init_flow: Some(InitFlow {
                    app_id: "com.example".into(),
                    commands: vec![FlowCommand::new(Command::InputText("seed".into()))],
                }),
            }),
        ]);
        let state = OrchestraAppState {
            app_id: "com.example".into(),
            file: file.clone(),
        };

        assert!(orchestra.run_flow(&flow, Some(state)).await.unwrap());
        assert_eq!(
            driver.events(),
            vec![
                FakeEvent::ClearState("com.example".into()),
                FakeEvent::PushAppState("com.example".into(), file),
            ]
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn test_tap_on_relative_point() {
        let driver = FakeDriver::new();
        let mut orchestra = orchestra_for(&driver).await;

        let flow = build_flow(vec![Command::TapOnRelativePoint(TapOnRelativePointParams {
            point: "50%, 25%".into(),
            ..Default::default()
        })]);
        assert!(orchestra.run_flow(&flow, None).await.unwrap());
        assert_eq!(
            driver.events(),
            vec![FakeEvent::Tap {
                point: Point::new(270, 240),
                long_press: false
            }]
        );
    }

    #[test]
    fn test_percent_point_bounds() {
        assert_eq!(parse_percent_point("0%,100%").unwrap(), (0, 100));
        assert!(matches!(
            parse_percent_point("150%,10%"),
            Err(OrchestraError::InvalidCommand(_))
        ));
        assert!(parse_percent_point("a%,10%").is_err());
        assert!(parse_percent_point("10%").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_copy_and_paste_text() {
        let driver = FakeDriver::new();
        driver.set_hierarchy(screen(vec![text_element(
            "Order #42",
            Bounds::new(10, 10, 300, 50),
        )]));
        let mut orchestra = orchestra_for(&driver).await;

        let flow = build_flow(vec![
            Command::CopyTextFrom(ElementSelector::text("Order #\\d+")),
            Command::PasteText,
            Command::InputText("${lumi.copiedText}!".into()),
        ]);

        assert!(orchestra.run_flow(&flow, None).await.unwrap());
        assert_eq!(orchestra.copied_text(), Some("Order #42"));
        assert_eq!(
            driver.events(),
            vec![
                FakeEvent::InputText("Order #42".into()),
                FakeEvent::InputText("Order #42!".into()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_failure_message() {
        let driver = FakeDriver::new();
        let mut orchestra = orchestra_for(&driver).await;
        let mut rx = orchestra.subscribe();

        let flow = build_flow(vec![Command::LaunchApp(LaunchAppParams {
            app_id: "com.missing".into(),
            ..Default::default()
        })]);

        assert!(!orchestra.run_flow(&flow, None).await.unwrap());
        let error = drain(&mut rx).into_iter().find_map(|e| match e {
            OrchestraEvent::CommandFailed { error, .. } => Some(error),
            _ => None,
        });
        assert_eq!(
            error.as_deref(),
            Some("Unable to launch app com.missing: App com.missing is not installed")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_metadata_holds_evaluated_command() {
        let driver = FakeDriver::new();
        let mut orchestra = orchestra_for(&driver).await;

        let flow = build_flow(vec![
            Command::DefineVariables(vars(&[("name", "Ada")])),
            Command::InputText("Hi ${name}".into()),
        ]);

        assert!(orchestra.run_flow(&flow, None).await.unwrap());
        assert_eq!(
            orchestra
                .metadata(CommandId(1))
                .and_then(|m| m.evaluated_command.clone()),
            Some(Command::InputText("Hi Ada".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_until_visible_swipes_against_direction() {
        let driver = FakeDriver::new();
        let empty = screen(vec![]);
        let mut screens = vec![empty; 8];
        screens.push(screen(vec![text_element("Footer", Bounds::new(0, 800, 540, 860))]));
        driver.queue_hierarchies(screens);
        let mut orchestra = orchestra_for(&driver).await;

        let flow = build_flow(vec![Command::ScrollUntilVisible(ScrollUntilVisibleParams {
            selector: ElementSelector::text("Footer"),
            direction: SwipeDirection::Down,
            timeout: 20000,
        })]);

        assert!(orchestra.run_flow(&flow, None).await.unwrap());
        let swipes: Vec<FakeEvent> = driver
            .events()
            .into_iter()
            .filter(|e| matches!(e, FakeEvent::Swipe { .. }))
            .collect();
        assert!(!swipes.is_empty());
        assert!(swipes.iter().all(|e| *e
            == FakeEvent::Swipe {
                gesture: SwipeGesture::Direction(SwipeDirection::Up),
                duration_ms: 600
            }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_until_visible_gives_up() {
        let driver = FakeDriver::new();
        driver.set_hierarchy(screen(vec![]));
        let mut orchestra = orchestra_for(&driver).await;

        let flow = build_flow(vec![Command::ScrollUntilVisible(ScrollUntilVisibleParams {
            selector: ElementSelector::text("Footer"),
            direction: SwipeDirection::Down,
            timeout: 2000,
        })]);
        assert!(!orchestra.run_flow(&flow, None).await.unwrap());

        let optional = build_flow(vec![Command::ScrollUntilVisible(ScrollUntilVisibleParams {
            selector: ElementSelector::text("Footer").optional(),
            direction: SwipeDirection::Down,
            timeout: 2000,
        })]);
        assert!(orchestra.run_flow(&optional, None).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_restarts_lookup_clock() {
        let driver = FakeDriver::new();
        driver.set_hierarchy(login_screen());
        let mut orchestra = orchestra_for(&driver).await;

        let still_there = || Command::AssertNotVisible(ElementSelector::text("Welcome").optional());
        let flow = build_flow(vec![
            still_there(),
            // Window already used up by the previous wait
            still_there(),
            Command::BackPress,
            still_there(),
        ]);

        let start = Instant::now();
        assert!(orchestra.run_flow(&flow, None).await.unwrap());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(34000), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(36000), "{:?}", elapsed);
    }

    #[test]
    fn test_random_input_shapes() {
        let text = random_input(&InputRandomParams::new(InputRandomKind::Text));
        assert_eq!(text.len(), 8);
        assert!(text.chars().all(|c| c.is_ascii_alphanumeric()));

        let number = random_input(&InputRandomParams {
            kind: InputRandomKind::Number,
            length: Some(5),
        });
        assert_eq!(number.len(), 5);
        assert!(number.chars().all(|c| c.is_ascii_digit()));

        assert!(random_input(&InputRandomParams::new(InputRandomKind::Email)).contains('@'));
        assert!(!random_input(&InputRandomParams::new(InputRandomKind::PersonName)).is_empty());
    }
}
