use assert_call::call;

use crate::{AnimationDelegate, DelegateError, PhaseStateMachine};

/// Records every delegate callback as `"<field> <callback>"`.
pub struct CallDelegate;

impl AnimationDelegate for CallDelegate {
    fn on_entering(&mut self, m: &PhaseStateMachine) -> Result<(), DelegateError> {
        call!("{} entering", m.field());
        Ok(())
    }
    fn on_loading(&mut self, m: &PhaseStateMachine) -> Result<(), DelegateError> {
        call!("{} loading", m.field());
        Ok(())
    }
    fn on_visible(&mut self, m: &PhaseStateMachine) -> Result<(), DelegateError> {
        call!("{} visible", m.field());
        Ok(())
    }
    fn on_exiting(&mut self, m: &PhaseStateMachine) -> Result<(), DelegateError> {
        call!("{} exiting", m.field());
        Ok(())
    }
    fn on_idle(&mut self, m: &PhaseStateMachine) -> Result<(), DelegateError> {
        call!("{} idle", m.field());
        Ok(())
    }
    fn on_async_ready(&mut self, m: &PhaseStateMachine) -> Result<(), DelegateError> {
        call!("{} async_ready", m.field());
        Ok(())
    }
    fn on_content_ready_during_enter(
        &mut self,
        m: &PhaseStateMachine,
    ) -> Result<(), DelegateError> {
        call!("{} content_ready_during_enter", m.field());
        Ok(())
    }
}

/// Fails every callback.
pub struct FailingDelegate;

impl AnimationDelegate for FailingDelegate {
    fn on_entering(&mut self, _: &PhaseStateMachine) -> Result<(), DelegateError> {
        Err("element detached".into())
    }
    fn on_visible(&mut self, _: &PhaseStateMachine) -> Result<(), DelegateError> {
        Err("element detached".into())
    }
    fn on_exiting(&mut self, _: &PhaseStateMachine) -> Result<(), DelegateError> {
        Err("element detached".into())
    }
    fn on_idle(&mut self, _: &PhaseStateMachine) -> Result<(), DelegateError> {
        Err("element detached".into())
    }
}
