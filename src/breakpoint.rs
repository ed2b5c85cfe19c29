use serde::{Deserialize, Serialize};

use crate::script::Trigger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BreakPointId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConditionId(pub u32);

#[derive(Debug, Clone)]
pub struct BreakPoint {
    pub id: BreakPointId,
    pub address: u16,
    pub trigger: Trigger,
}

/// A breakpoint without an address, evaluated on every instruction.
#[derive(Debug, Clone)]
pub struct DebugCondition {
    pub id: ConditionId,
    pub trigger: Trigger,
}

/// Breakpoints kept sorted by address; ties stay in insertion order.
#[derive(Debug, Clone, Default)]
pub struct BreakpointEngine {
    break_points: Vec<BreakPoint>,
    conditions: Vec<DebugCondition>,
    next_id: u32,
}

impl BreakpointEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    pub fn insert(&mut self, address: u16, trigger: Trigger) -> BreakPointId {
        let id = BreakPointId(self.next_id());
        let index = self.break_points.partition_point(|bp| bp.address <= address);
        self.break_points.insert(
            index,
            BreakPoint {
                id,
                address,
                trigger,
            },
        );
        id
    }

    pub fn remove(&mut self, id: BreakPointId) -> Option<BreakPoint> {
        let index = self.break_points.iter().position(|bp| bp.id == id)?;
        Some(self.break_points.remove(index))
    }

    pub fn contains(&self, id: BreakPointId) -> bool {
        self.break_points.iter().any(|bp| bp.id == id)
    }

    pub fn break_points(&self) -> &[BreakPoint] {
        &self.break_points
    }

    /// Breakpoints at `address`, found with a lower/upper bound search.
    pub fn at(&self, address: u16) -> &[BreakPoint] {
        let lower = self.break_points.partition_point(|bp| bp.address < address);
        let upper = self.break_points.partition_point(|bp| bp.address <= address);
        &self.break_points[lower..upper]
    }

    pub fn insert_condition(&mut self, trigger: Trigger) -> ConditionId {
        let id = ConditionId(self.next_id());
        self.conditions.push(DebugCondition { id, trigger });
        id
    }

    pub fn remove_condition(&mut self, id: ConditionId) -> Option<DebugCondition> {
        let index = self.conditions.iter().position(|c| c.id == id)?;
        Some(self.conditions.remove(index))
    }

    pub fn contains_condition(&self, id: ConditionId) -> bool {
        self.conditions.iter().any(|c| c.id == id)
    }

    pub fn conditions(&self) -> &[DebugCondition] {
        &self.conditions
    }

    /// Nothing to evaluate at `address`.
    pub fn is_quiet_at(&self, address: u16) -> bool {
        self.conditions.is_empty() && self.at(address).is_empty()
    }

    pub fn clear(&mut self) {
        self.break_points.clear();
        self.conditions.clear();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    #[default]
    Running,
    Broken,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunControl {
    pub state: RunState,
    /// Last resume was a continue: skip breakpoints once at the resume address.
    pub continued: bool,
    /// Last resume was a step: break again after one instruction.
    pub step: bool,
    /// Replaying history; breakpoints and watchpoints are ignored.
    pub fast_forward: bool,
}

/// Notifications for the user interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebugEvent {
    Break,
    StatusChanged { cpu: String },
}
