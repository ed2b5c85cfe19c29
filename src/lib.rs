pub mod address_space;
pub mod breakpoint;
pub mod bus;
pub mod cache_line;
pub mod config;
pub mod cpu;
pub mod debuggable;
mod debugger;
pub mod device;
pub mod error;
pub mod global_write;
mod info;
pub mod io_bus;
pub mod machine;
pub mod memory;
pub mod multi;
pub mod ppi;
pub mod script;
pub mod slot;
pub mod utils;
pub mod watchpoint;

pub use breakpoint::{BreakPointId, ConditionId, DebugEvent, RunState};
pub use bus::{BusMessage, DebugBus, MessageQueue};
pub use config::MachineConfig;
pub use cpu::{CpuInterface, NullCpu, Scheduler};
pub use debuggable::Debuggable;
pub use device::{Device, DeviceId, EmuTime};
pub use error::{BusError, BusResult, Conflict};
pub use io_bus::Direction;
pub use machine::{Machine, MachineBuilder};
pub use script::{Interpreter, Trigger, Variables};
pub use slot::{SlotAddress, SlotState};
pub use utils::hexdump;
pub use watchpoint::{WatchPointId, WatchType};
use wasm_bindgen::prelude::*;

/// Installs a fmt subscriber honouring `RUST_LOG`, for native hosts.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}

/// BIOS in slot 0, RAM in slot 3 and the slot-select PPI.
pub fn get_machine(rom_data: &[u8]) -> anyhow::Result<Machine> {
    MachineBuilder::new()
        .rom_slot("MSX BIOS", rom_data, 0, 0, 0x0000, 0x8000)
        .ram_slot("Main RAM", 3, 0, 0x0000, 0x10000)
        .ppi()
        .build()
}

fn js_error(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

#[wasm_bindgen(js_name = Machine)]
pub struct JsMachine(Machine);

#[wasm_bindgen(js_class = Machine)]
impl JsMachine {
    #[wasm_bindgen(constructor)]
    pub fn new(rom_data: &[u8]) -> Result<JsMachine, JsValue> {
        console_error_panic_hook::set_once();
        let _ = tracing_wasm::try_set_as_global_default();

        get_machine(rom_data).map(Self).map_err(js_error)
    }

    #[wasm_bindgen(js_name = fromConfig)]
    pub fn from_config(json: &str) -> Result<JsMachine, JsValue> {
        console_error_panic_hook::set_once();
        let _ = tracing_wasm::try_set_as_global_default();

        let config = MachineConfig::from_json(json).map_err(js_error)?;
        Machine::from_config(&config).map(Self).map_err(js_error)
    }

    pub fn read(&mut self, address: u16) -> u8 {
        self.0.read(address)
    }

    pub fn write(&mut self, address: u16, value: u8) {
        self.0.write(address, value);
    }

    #[wasm_bindgen(js_name = readIo)]
    pub fn read_io(&mut self, port: u16) -> u8 {
        self.0.read_io(port)
    }

    #[wasm_bindgen(js_name = writeIo)]
    pub fn write_io(&mut self, port: u16, value: u8) {
        self.0.write_io(port, value);
    }

    #[wasm_bindgen(getter)]
    pub fn memory(&self) -> js_sys::Uint8Array {
        js_sys::Uint8Array::from(&self.0.memory()[..])
    }

    #[wasm_bindgen(getter = primarySlotConfig)]
    pub fn primary_slot_config(&self) -> u8 {
        self.0.primary_slot_config()
    }

    #[wasm_bindgen(js_name = slotInfo)]
    pub fn slot_info(&self, primary: u32, secondary: u32, page: u32) -> Result<String, JsValue> {
        self.0
            .bus
            .slot_info(primary, secondary, page)
            .map_err(js_error)
    }

    pub fn dump(&self, debuggable: &str, start: u32, len: u32) -> Result<String, JsValue> {
        self.0.dump(debuggable, start, len).map_err(js_error)
    }

    #[wasm_bindgen(js_name = setBreakpoint)]
    pub fn set_breakpoint(&mut self, address: u16) -> u32 {
        self.0.bus.insert_breakpoint(address, Trigger::new()).0
    }

    #[wasm_bindgen(js_name = removeBreakpoint)]
    pub fn remove_breakpoint(&mut self, id: u32) {
        self.0.bus.remove_breakpoint(BreakPointId(id));
    }

    #[wasm_bindgen(js_name = checkBreakpoints)]
    pub fn check_breakpoints(&mut self, pc: u16) -> bool {
        self.0.bus.check_breakpoints(pc)
    }

    #[wasm_bindgen(getter = isBroken)]
    pub fn is_broken(&self) -> bool {
        self.0.bus.is_broken()
    }

    #[wasm_bindgen(js_name = doContinue)]
    pub fn do_continue(&mut self) {
        self.0.bus.do_continue();
    }

    #[wasm_bindgen(js_name = doStep)]
    pub fn do_step(&mut self) {
        self.0.bus.do_step();
    }

    pub fn reset(&mut self) {
        self.0.reset();
    }

    /// Pending debugger events as JSON.
    #[wasm_bindgen(js_name = takeEvents)]
    pub fn take_events(&mut self) -> Result<String, JsValue> {
        serde_json::to_string(&self.0.bus.take_events()).map_err(js_error)
    }
}
