//! Open/close lifecycle of an animatable field.
//!
//! A field is open while its value is non-null. Each animatable field gets a
//! [`PhaseStateMachine`] that moves through [`Phase`]s as the field opens and
//! closes, as the enter animation completes, and as optional asynchronous
//! content arrives. Visual effects are delegated to an [`AnimationDelegate`].
//!
//! ```text
//! Idle     --open-->                        Entering
//! Entering --transition end / fallback-->   Loading (async pending) | Visible
//! Loading  --async arrives-->               Visible
//! Entering | Loading | Visible --close-->   Exiting
//! Exiting  --exit timeout-->                Idle
//! Exiting  --reopen-->                      Entering
//! ```

use std::time::Duration;

use parse_display::Display;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    utils::timer::{TimerId, Timers},
    Source,
};


/// Extra time granted to an enter animation before the fallback timer
/// completes it.
pub const FALLBACK_GRACE: Duration = Duration::from_millis(50);

const DEFAULT_DURATION_MS: u64 = 300;

/// Lifecycle phase of an animatable field.
///
/// The phase field holds the `Display` form (`"idle"`, `"entering"`, ...).
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[display(style = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Entering,
    Loading,
    Visible,
    Exiting,
}

impl Phase {
    /// Returns `true` for the phases in which the field is shown.
    pub fn is_open(self) -> bool {
        matches!(self, Phase::Entering | Phase::Loading | Phase::Visible)
    }
}

/// Declaration of an animatable field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseConfig {
    /// Field whose nullability drives open/closed.
    pub field: String,
    /// Top-level field the current phase name is written to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_field: Option<String>,
    /// Field whose arrival gates `Loading -> Visible`.
    #[serde(default, rename = "async", skip_serializing_if = "Option::is_none")]
    pub async_field: Option<String>,
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
    /// Defaults to `duration_ms`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_duration_ms: Option<u64>,
}

fn default_duration_ms() -> u64 {
    DEFAULT_DURATION_MS
}

impl PhaseConfig {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            phase_field: None,
            async_field: None,
            duration_ms: DEFAULT_DURATION_MS,
            exit_duration_ms: None,
        }
    }
    pub fn with_phase_field(mut self, phase_field: impl Into<String>) -> Self {
        self.phase_field = Some(phase_field.into());
        self
    }
    pub fn with_async(mut self, async_field: impl Into<String>) -> Self {
        self.async_field = Some(async_field.into());
        self
    }
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
    pub fn with_exit_duration(mut self, exit_duration_ms: u64) -> Self {
        self.exit_duration_ms = Some(exit_duration_ms);
        self
    }

    /// The phase field. Defaults to `<field>_phase` with dots replaced by `_`.
    pub fn phase_field_name(&self) -> String {
        self.phase_field
            .clone()
            .unwrap_or_else(|| format!("{}_phase", self.field.replace('.', "_")))
    }
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
    pub fn enter_timeout(&self) -> Duration {
        self.duration() + FALLBACK_GRACE
    }
    pub fn exit_timeout(&self) -> Duration {
        Duration::from_millis(self.exit_duration_ms.unwrap_or(self.duration_ms))
    }
}

/// Failure reported by an [`AnimationDelegate`].
#[derive(Debug, Display, Clone, PartialEq, Eq)]
#[display("{0}")]
pub struct DelegateError(pub String);

impl std::error::Error for DelegateError {}

impl From<&str> for DelegateError {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}
impl From<String> for DelegateError {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Visual effects for phase changes.
///
/// Every callback is optional. Errors are logged and otherwise ignored; the
/// state machine completes its transition regardless.
pub trait AnimationDelegate {
    fn on_entering(&mut self, _machine: &PhaseStateMachine) -> Result<(), DelegateError> {
        Ok(())
    }
    fn on_loading(&mut self, _machine: &PhaseStateMachine) -> Result<(), DelegateError> {
        Ok(())
    }
    fn on_visible(&mut self, _machine: &PhaseStateMachine) -> Result<(), DelegateError> {
        Ok(())
    }
    fn on_exiting(&mut self, _machine: &PhaseStateMachine) -> Result<(), DelegateError> {
        Ok(())
    }
    fn on_idle(&mut self, _machine: &PhaseStateMachine) -> Result<(), DelegateError> {
        Ok(())
    }
    /// Asynchronous content arrived while loading or visible.
    fn on_async_ready(&mut self, _machine: &PhaseStateMachine) -> Result<(), DelegateError> {
        Ok(())
    }
    /// Asynchronous content arrived before the enter animation finished.
    ///
    /// The delegate may cut the enter animation short.
    fn on_content_ready_during_enter(
        &mut self,
        _machine: &PhaseStateMachine,
    ) -> Result<(), DelegateError> {
        Ok(())
    }
}

/// Delegate without visual effects.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDelegate;

impl AnimationDelegate for NullDelegate {}

/// Delegate that logs every callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceDelegate;

impl TraceDelegate {
    fn log(hook: Hook, machine: &PhaseStateMachine) -> Result<(), DelegateError> {
        tracing::debug!(field = machine.field(), phase = %machine.phase(), %hook, "animation");
        Ok(())
    }
}

impl AnimationDelegate for TraceDelegate {
    fn on_entering(&mut self, machine: &PhaseStateMachine) -> Result<(), DelegateError> {
        Self::log(Hook::Entering, machine)
    }
    fn on_loading(&mut self, machine: &PhaseStateMachine) -> Result<(), DelegateError> {
        Self::log(Hook::Loading, machine)
    }
    fn on_visible(&mut self, machine: &PhaseStateMachine) -> Result<(), DelegateError> {
        Self::log(Hook::Visible, machine)
    }
    fn on_exiting(&mut self, machine: &PhaseStateMachine) -> Result<(), DelegateError> {
        Self::log(Hook::Exiting, machine)
    }
    fn on_idle(&mut self, machine: &PhaseStateMachine) -> Result<(), DelegateError> {
        Self::log(Hook::Idle, machine)
    }
    fn on_async_ready(&mut self, machine: &PhaseStateMachine) -> Result<(), DelegateError> {
        Self::log(Hook::AsyncReady, machine)
    }
    fn on_content_ready_during_enter(
        &mut self,
        machine: &PhaseStateMachine,
    ) -> Result<(), DelegateError> {
        Self::log(Hook::ContentReadyDuringEnter, machine)
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[display(style = "snake_case")]
enum Hook {
    Entering,
    Loading,
    Visible,
    Exiting,
    Idle,
    AsyncReady,
    ContentReadyDuringEnter,
}

/// A phase change performed by a [`PhaseStateMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
}

/// Phase machine of one animatable field.
///
/// The owner feeds it the field's value, the async field's value, explicit
/// transition-end signals and fired timers. Every method that changes the
/// phase returns the [`Transition`] so the owner can write the phase field.
pub struct PhaseStateMachine {
    config: PhaseConfig,
    phase_field: String,
    phase: Phase,
    is_async_ready: bool,
    timer: Option<TimerId>,
    delegate: Option<Box<dyn AnimationDelegate>>,
}

impl PhaseStateMachine {
    pub fn new(config: PhaseConfig, delegate: Box<dyn AnimationDelegate>) -> Self {
        Self {
            phase_field: config.phase_field_name(),
            config,
            phase: Phase::Idle,
            is_async_ready: false,
            timer: None,
            delegate: Some(delegate),
        }
    }

    pub fn config(&self) -> &PhaseConfig {
        &self.config
    }
    pub fn field(&self) -> &str {
        &self.config.field
    }
    pub fn phase_field(&self) -> &str {
        &self.phase_field
    }
    pub fn async_field(&self) -> Option<&str> {
        self.config.async_field.as_deref()
    }
    pub fn phase(&self) -> Phase {
        self.phase
    }
    pub fn is_async_ready(&self) -> bool {
        self.is_async_ready
    }
    /// Returns `true` if `id` is this machine's outstanding timer.
    pub fn owns_timer(&self, id: TimerId) -> bool {
        self.timer == Some(id)
    }

    /// The field's value changed.
    ///
    /// `source` is `None` when the value was recomputed from another phase change.
    pub fn on_value_change(
        &mut self,
        value: &Value,
        source: impl Into<Option<Source>>,
        timers: &mut Timers,
    ) -> Option<Transition> {
        let open = !value.is_null();
        let to = match (self.phase, open) {
            (Phase::Idle | Phase::Exiting, true) => Phase::Entering,
            (Phase::Entering | Phase::Loading | Phase::Visible, false) => Phase::Exiting,
            _ => return None,
        };
        let source = source.into().map(tracing::field::display);
        tracing::trace!(field = self.field(), source, open, "animatable field changed");
        Some(self.enter(to, timers))
    }

    /// The async field's value changed.
    pub fn on_async_change(&mut self, value: &Value, timers: &mut Timers) -> Option<Transition> {
        if self.config.async_field.is_none() || value.is_null() {
            return None;
        }
        match self.phase {
            Phase::Entering => {
                self.is_async_ready = true;
                self.notify(Hook::ContentReadyDuringEnter);
                None
            }
            Phase::Loading => {
                self.is_async_ready = true;
                self.notify(Hook::AsyncReady);
                Some(self.enter(Phase::Visible, timers))
            }
            Phase::Visible => {
                self.is_async_ready = true;
                self.notify(Hook::AsyncReady);
                None
            }
            Phase::Idle | Phase::Exiting => None,
        }
    }

    /// The enter animation reported completion.
    pub fn on_transition_end(&mut self, timers: &mut Timers) -> Option<Transition> {
        if self.phase != Phase::Entering {
            return None;
        }
        Some(self.finish_enter(timers))
    }

    /// A timer fired. Timers owned by other machines are ignored.
    pub fn on_timer(&mut self, id: TimerId, timers: &mut Timers) -> Option<Transition> {
        if !self.owns_timer(id) {
            return None;
        }
        self.timer = None;
        match self.phase {
            Phase::Entering => Some(self.finish_enter(timers)),
            Phase::Exiting => Some(self.enter(Phase::Idle, timers)),
            _ => None,
        }
    }

    /// Cancel the outstanding timer and release the delegate.
    pub fn destroy(&mut self, timers: &mut Timers) {
        if let Some(id) = self.timer.take() {
            timers.cancel(id);
        }
        self.delegate = None;
    }

    fn finish_enter(&mut self, timers: &mut Timers) -> Transition {
        let to = if self.config.async_field.is_some() && !self.is_async_ready {
            Phase::Loading
        } else {
            Phase::Visible
        };
        self.enter(to, timers)
    }

    fn enter(&mut self, to: Phase, timers: &mut Timers) -> Transition {
        let from = self.phase;
        if let Some(id) = self.timer.take() {
            timers.cancel(id);
        }
        self.phase = to;
        let hook = match to {
            Phase::Entering => {
                self.is_async_ready = false;
                self.timer = Some(timers.schedule(self.config.enter_timeout()));
                Hook::Entering
            }
            Phase::Exiting => {
                self.timer = Some(timers.schedule(self.config.exit_timeout()));
                Hook::Exiting
            }
            Phase::Loading => Hook::Loading,
            Phase::Visible => Hook::Visible,
            Phase::Idle => Hook::Idle,
        };
        tracing::trace!(field = self.field(), %from, %to, "phase transition");
        self.notify(hook);
        Transition { from, to }
    }

    fn notify(&mut self, hook: Hook) {
        let Some(mut delegate) = self.delegate.take() else {
            return;
        };
        let result = match hook {
            Hook::Entering => delegate.on_entering(self),
            Hook::Loading => delegate.on_loading(self),
            Hook::Visible => delegate.on_visible(self),
            Hook::Exiting => delegate.on_exiting(self),
            Hook::Idle => delegate.on_idle(self),
            Hook::AsyncReady => delegate.on_async_ready(self),
            Hook::ContentReadyDuringEnter => delegate.on_content_ready_during_enter(self),
        };
        self.delegate = Some(delegate);
        if let Err(e) = result {
            tracing::warn!(field = self.field(), %hook, error = %e, "animation delegate failed");
        }
    }
}

impl std::fmt::Debug for PhaseStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseStateMachine")
            .field("field", &self.config.field)
            .field("phase", &self.phase)
            .field("is_async_ready", &self.is_async_ready)
            .field("timer", &self.timer)
            .finish()
    }
}
