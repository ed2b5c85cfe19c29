use std::{cell::Cell, collections::HashMap, fmt, rc::Rc};

use derivative::Derivative;

use crate::bus::DebugBus;

/// Variable set by watchpoints: the address (or port) that was accessed.
pub const WP_LAST_ADDRESS: &str = "wp_last_address";
/// Variable set by write watchpoints: the value that was written.
pub const WP_LAST_VALUE: &str = "wp_last_value";

/// The scripting side of the debugger, as far as the bus is concerned.
pub trait Interpreter {
    fn set_variable(&mut self, name: &str, value: String);
    fn unset_variable(&mut self, name: &str);
    fn variable(&self, name: &str) -> Option<&str>;
}

impl fmt::Debug for dyn Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Interpreter")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables {
    values: HashMap<String, String>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Interpreter for Variables {
    fn set_variable(&mut self, name: &str, value: String) {
        self.values.insert(name.to_string(), value);
    }

    fn unset_variable(&mut self, name: &str) {
        self.values.remove(name);
    }

    fn variable(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

pub type Condition = Rc<dyn Fn(&DebugBus) -> anyhow::Result<bool>>;
pub type Action = Rc<dyn Fn(&mut DebugBus) -> anyhow::Result<()>>;

/// Condition plus action shared by breakpoints, watchpoints and conditions.
///
/// Without a condition the trigger always fires; without an action it breaks
/// the CPU.
#[derive(Derivative, Clone, Default)]
#[derivative(Debug)]
pub struct Trigger {
    #[derivative(Debug = "ignore")]
    pub(crate) condition: Option<Condition>,
    #[derivative(Debug = "ignore")]
    pub(crate) action: Option<Action>,
    pub(crate) executing: Rc<Cell<bool>>,
}

impl Trigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when<F>(mut self, condition: F) -> Self
    where
        F: Fn(&DebugBus) -> anyhow::Result<bool> + 'static,
    {
        self.condition = Some(Rc::new(condition));
        self
    }

    pub fn then<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut DebugBus) -> anyhow::Result<()> + 'static,
    {
        self.action = Some(Rc::new(action));
        self
    }

    pub fn has_condition(&self) -> bool {
        self.condition.is_some()
    }

    pub fn has_action(&self) -> bool {
        self.action.is_some()
    }

    pub fn is_executing(&self) -> bool {
        self.executing.get()
    }
}
