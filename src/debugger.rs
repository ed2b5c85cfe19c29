use tracing::{debug, warn};

use crate::{
    breakpoint::{BreakPoint, BreakPointId, ConditionId, DebugCondition, DebugEvent, RunState},
    bus::DebugBus,
    cache_line::{Access, DisallowReason, CACHE_LINE_NUM},
    error::BusResult,
    script::{Trigger, WP_LAST_ADDRESS, WP_LAST_VALUE},
    watchpoint::{WatchPoint, WatchPointId, WatchType},
};

impl DebugBus {
    /// Evaluates one trigger. Returns true when its condition held.
    fn check_and_execute(&mut self, trigger: &Trigger) -> bool {
        if trigger.executing.get() {
            // the action is already running further up the stack
            return false;
        }
        let hit = match &trigger.condition {
            None => true,
            Some(condition) => match condition(self) {
                Ok(hit) => hit,
                Err(err) => {
                    warn!("[DEBUG] Condition failed: {:#}", err);
                    false
                }
            },
        };
        if !hit {
            return false;
        }

        trigger.executing.set(true);
        let result = match &trigger.action {
            Some(action) => action(self),
            None => {
                self.do_break();
                Ok(())
            }
        };
        trigger.executing.set(false);
        if let Err(err) = result {
            warn!("[DEBUG] Action failed: {:#}", err);
        }
        true
    }

    // Watchpoints

    pub fn set_watchpoint(
        &mut self,
        kind: WatchType,
        begin: u32,
        end: u32,
        trigger: Trigger,
    ) -> BusResult<WatchPointId> {
        let id = self.watches.insert(kind, begin, end, trigger)?;
        debug!("[DEBUG] Watchpoint {} {:#06X}-{:#06X}", kind, begin, end);
        if !kind.is_io() {
            self.update_mem_watch();
        }
        Ok(id)
    }

    pub fn remove_watchpoint(&mut self, id: WatchPointId) {
        let removed = self.watches.remove(id);
        debug_assert!(removed.is_some(), "watchpoint {} not registered", id.0);
        if removed.is_some_and(|w| !w.kind.is_io()) {
            self.update_mem_watch();
        }
    }

    pub fn remove_all_watchpoints(&mut self) {
        let ids: Vec<_> = self.watches.watch_points().iter().map(|w| w.id).collect();
        for id in ids {
            self.watches.remove(id);
        }
        self.update_mem_watch();
    }

    pub fn watchpoints(&self) -> &[WatchPoint] {
        self.watches.watch_points()
    }

    /// Brings the MEMORY_WATCH bits of the mask in line with the watch tables.
    fn update_mem_watch(&mut self) {
        let mut toggled = [false; CACHE_LINE_NUM];
        for (region, toggle) in toggled.iter_mut().enumerate() {
            for access in [Access::Read, Access::Write] {
                let watched = self.watches.region_watched(access, region);
                if self
                    .mask
                    .set(access, region, DisallowReason::MEMORY_WATCH, watched)
                {
                    *toggle = true;
                }
            }
        }
        self.invalidate_regions(&toggled);
    }

    /// Runs the watchpoints of `kind` covering `address`. The address (and
    /// for writes the value) is visible to the scripts while they run.
    pub(crate) fn execute_watch(&mut self, kind: WatchType, address: u16, value: Option<u8>) {
        if self.run.fast_forward {
            return;
        }
        let matches = self.watches.matching(kind, address);
        if matches.is_empty() {
            return;
        }

        self.interpreter
            .set_variable(WP_LAST_ADDRESS, address.to_string());
        if let Some(value) = value {
            self.interpreter.set_variable(WP_LAST_VALUE, value.to_string());
        }
        for (id, trigger) in matches {
            if self.watches.contains(id) {
                self.check_and_execute(&trigger);
            }
        }
        self.interpreter.unset_variable(WP_LAST_ADDRESS);
        if value.is_some() {
            self.interpreter.unset_variable(WP_LAST_VALUE);
        }
    }

    // Breakpoints and conditions

    pub fn insert_breakpoint(&mut self, address: u16, trigger: Trigger) -> BreakPointId {
        debug!("[DEBUG] Breakpoint at {:#06X}", address);
        self.breaks.insert(address, trigger)
    }

    pub fn remove_breakpoint(&mut self, id: BreakPointId) {
        let removed = self.breaks.remove(id);
        debug_assert!(removed.is_some(), "breakpoint {} not registered", id.0);
    }

    pub fn breakpoints(&self) -> &[BreakPoint] {
        self.breaks.break_points()
    }

    pub fn set_condition(&mut self, trigger: Trigger) -> ConditionId {
        self.breaks.insert_condition(trigger)
    }

    pub fn remove_condition(&mut self, id: ConditionId) {
        let removed = self.breaks.remove_condition(id);
        debug_assert!(removed.is_some(), "condition {} not registered", id.0);
    }

    pub fn conditions(&self) -> &[DebugCondition] {
        self.breaks.conditions()
    }

    /// Called by the CPU core before fetching the instruction at `pc`.
    /// Returns true when the CPU must stop.
    pub fn check_breakpoints(&mut self, pc: u16) -> bool {
        if self.run.fast_forward {
            return false;
        }
        if std::mem::take(&mut self.run.continued) || self.run.step {
            // resuming: don't break again on the instruction we stopped at
            return false;
        }
        if self.breaks.is_quiet_at(pc) {
            return self.is_broken();
        }

        let hits: Vec<_> = self
            .breaks
            .at(pc)
            .iter()
            .map(|bp| (bp.id, bp.trigger.clone()))
            .collect();
        for (id, trigger) in hits {
            if self.breaks.contains(id) {
                self.check_and_execute(&trigger);
            }
        }

        let conditions: Vec<_> = self
            .breaks
            .conditions()
            .iter()
            .map(|c| (c.id, c.trigger.clone()))
            .collect();
        for (id, trigger) in conditions {
            if self.breaks.contains_condition(id) {
                self.check_and_execute(&trigger);
            }
        }
        self.is_broken()
    }

    /// Called by the CPU core after every executed instruction.
    pub fn after_instruction(&mut self) {
        if std::mem::take(&mut self.run.step) {
            self.do_break();
        }
    }

    // Run control

    pub fn do_break(&mut self) {
        if self.run.fast_forward || self.is_broken() {
            return;
        }
        debug!("[DEBUG] Break");
        self.run.state = RunState::Broken;
        self.cpu.exit_cpu_loop_sync();
        self.events.push_back(DebugEvent::Break);
        self.events.push_back(DebugEvent::StatusChanged {
            cpu: "suspended".to_string(),
        });
    }

    /// Arms a one-shot break after the next instruction and resumes.
    pub fn do_step(&mut self) {
        if self.is_broken() {
            self.run.step = true;
            self.resume();
        }
    }

    pub fn do_continue(&mut self) {
        self.run.step = false;
        if self.is_broken() {
            self.run.continued = true;
            self.resume();
        }
    }

    fn resume(&mut self) {
        debug!("[DEBUG] Resume");
        self.run.state = RunState::Running;
        self.events.push_back(DebugEvent::StatusChanged {
            cpu: "running".to_string(),
        });
    }

    pub fn is_broken(&self) -> bool {
        self.run.state == RunState::Broken
    }

    pub fn run_state(&self) -> RunState {
        self.run.state
    }

    pub fn set_fast_forward(&mut self, fast_forward: bool) {
        self.run.fast_forward = fast_forward;
    }

    pub fn is_fast_forward(&self) -> bool {
        self.run.fast_forward
    }

    /// Drains the notifications queued for the user interface.
    pub fn take_events(&mut self) -> Vec<DebugEvent> {
        self.events.drain(..).collect()
    }
}
