use std::{cell::RefCell, rc::Rc};

use msxbus::{
    bus::MessageQueue,
    memory::Ram,
    script::{WP_LAST_ADDRESS, WP_LAST_VALUE},
    BusMessage, DebugBus, DebugEvent, Device, Direction, EmuTime, RunState, Trigger, WatchType,
};
use tracing_subscriber::fmt;

#[cfg(test)]
#[ctor::ctor]
fn init() {
    let fmt_subscriber = fmt::Subscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(fmt_subscriber)
        .expect("Unable to set global tracing subscriber");
}

fn bus_with_ram() -> DebugBus {
    let mut bus = DebugBus::new();
    let ram = bus.add_device(Box::new(Ram::new("ram", 0x0000, 0x10000)));
    bus.register_mem_device(ram, 0, 0, 0x0000, 0x10000).unwrap();
    bus
}

type Log = Rc<RefCell<Vec<String>>>;

#[test]
fn test_write_watch_sees_written_value() {
    let mut bus = bus_with_ram();
    let seen: Log = Rc::default();
    let log = seen.clone();
    bus.set_watchpoint(
        WatchType::WriteMem,
        0xC000,
        0xC0FF,
        Trigger::new().then(move |bus| {
            let address = bus.interpreter().variable(WP_LAST_ADDRESS).unwrap_or("-");
            let value = bus.interpreter().variable(WP_LAST_VALUE).unwrap_or("-");
            let stored = bus.peek_mem(0xC010, 0);
            log.borrow_mut()
                .push(format!("{address} {value} {stored}"));
            Ok(())
        }),
    )
    .unwrap();

    bus.write_mem(0xC010, 66, 0);
    bus.write_mem(0xC100, 1, 0);
    assert_eq!(*seen.borrow(), vec!["49168 66 66".to_string()]);
    assert_eq!(bus.interpreter().variable(WP_LAST_ADDRESS), None);
    assert_eq!(bus.interpreter().variable(WP_LAST_VALUE), None);
}

#[test]
fn test_read_watch_fires_before_read() {
    let mut bus = bus_with_ram();
    bus.write_mem(0x8000, 1, 0);
    bus.set_watchpoint(
        WatchType::ReadMem,
        0x8000,
        0x8000,
        Trigger::new().then(|bus| {
            assert_eq!(bus.interpreter().variable(WP_LAST_VALUE), None);
            bus.write_mem(0x8000, 2, 0);
            Ok(())
        }),
    )
    .unwrap();

    // the action's write lands before the CPU's read
    assert_eq!(bus.read_mem(0x8000, 0), 2);
    // peeks never trigger watches
    bus.write_mem(0x8000, 3, 0);
    assert_eq!(bus.peek_mem(0x8000, 0), 3);
}

#[test]
fn test_watch_without_action_breaks() {
    let mut bus = bus_with_ram();
    let id = bus
        .set_watchpoint(WatchType::WriteMem, 0x4000, 0x4000, Trigger::new())
        .unwrap();
    bus.write_mem(0x4000, 0, 0);
    assert!(bus.is_broken());
    assert_eq!(bus.run_state(), RunState::Broken);

    bus.do_continue();
    bus.remove_watchpoint(id);
    bus.write_mem(0x4000, 0, 0);
    assert!(!bus.is_broken());
    assert!(bus.cache_mask().write_allowed(0x4000));
}

#[test]
fn test_io_watchpoints() {
    let mut bus = bus_with_ram();
    let seen: Log = Rc::default();
    let (read_log, write_log) = (seen.clone(), seen.clone());
    bus.set_watchpoint(
        WatchType::ReadIo,
        0xA8,
        0xA8,
        Trigger::new().then(move |bus| {
            let port = bus.interpreter().variable(WP_LAST_ADDRESS).unwrap_or("-");
            read_log.borrow_mut().push(format!("in {port}"));
            Ok(())
        }),
    )
    .unwrap();
    bus.set_watchpoint(
        WatchType::WriteIo,
        0x98,
        0x99,
        Trigger::new()
            .when(|bus| Ok(bus.interpreter().variable(WP_LAST_VALUE) != Some("0")))
            .then(move |bus| {
                let value = bus.interpreter().variable(WP_LAST_VALUE).unwrap_or("-");
                write_log.borrow_mut().push(format!("out {value}"));
                Ok(())
            }),
    )
    .unwrap();

    bus.read_io(0xA8, 0);
    bus.read_io(0xA9, 0);
    bus.write_io(0x99, 0, 0);
    bus.write_io(0x99, 7, 0);
    bus.write_io(0x9A, 7, 0);
    assert_eq!(
        *seen.borrow(),
        vec!["in 168".to_string(), "out 7".to_string()]
    );

    assert!(bus
        .set_watchpoint(WatchType::WriteIo, 0x00, 0x100, Trigger::new())
        .is_err());
}

#[test]
fn test_breakpoints_fire_in_registration_order() {
    let mut bus = bus_with_ram();
    let order: Log = Rc::default();

    let first = order.clone();
    let own_id = Rc::new(RefCell::new(None));
    let own = own_id.clone();
    let id = bus.insert_breakpoint(
        0x0038,
        Trigger::new().then(move |bus| {
            first.borrow_mut().push("first".to_string());
            // remove itself while the breakpoints at 0x0038 are being evaluated
            if let Some(id) = own.borrow_mut().take() {
                bus.remove_breakpoint(id);
            }
            Ok(())
        }),
    );
    *own_id.borrow_mut() = Some(id);

    let second = order.clone();
    bus.insert_breakpoint(
        0x0038,
        Trigger::new().then(move |_| {
            second.borrow_mut().push("second".to_string());
            Ok(())
        }),
    );
    let elsewhere = order.clone();
    bus.insert_breakpoint(
        0x0000,
        Trigger::new().then(move |_| {
            elsewhere.borrow_mut().push("elsewhere".to_string());
            Ok(())
        }),
    );

    assert!(!bus.check_breakpoints(0x0038));
    assert_eq!(*order.borrow(), vec!["first", "second"]);
    assert_eq!(bus.breakpoints().len(), 2);

    assert!(!bus.check_breakpoints(0x0038));
    assert_eq!(*order.borrow(), vec!["first", "second", "second"]);
}

#[test]
fn test_breakpoint_removed_by_sibling_is_skipped() {
    let mut bus = bus_with_ram();
    let fired: Log = Rc::default();

    let victim = Rc::new(RefCell::new(None));
    let target = victim.clone();
    bus.insert_breakpoint(
        0x0100,
        Trigger::new().then(move |bus| {
            if let Some(id) = target.borrow_mut().take() {
                bus.remove_breakpoint(id);
            }
            Ok(())
        }),
    );
    let log = fired.clone();
    let id = bus.insert_breakpoint(
        0x0100,
        Trigger::new().then(move |_| {
            log.borrow_mut().push("victim".to_string());
            Ok(())
        }),
    );
    *victim.borrow_mut() = Some(id);

    bus.check_breakpoints(0x0100);
    assert!(fired.borrow().is_empty());
}

#[test]
fn test_conditions_and_run_control_events() {
    let mut bus = bus_with_ram();
    let condition = bus.set_condition(Trigger::new().when(|bus| Ok(bus.peek_mem(0xF000, 0) == 0x42)));

    assert!(!bus.check_breakpoints(0x1234));
    bus.write_mem(0xF000, 0x42, 0);
    assert!(bus.check_breakpoints(0x1234));
    assert_eq!(bus.conditions().len(), 1);

    bus.do_step();
    assert!(!bus.check_breakpoints(0x1235));
    bus.after_instruction();
    assert!(bus.is_broken());

    bus.remove_condition(condition);
    bus.do_continue();
    assert!(!bus.check_breakpoints(0x1236));
    assert!(!bus.check_breakpoints(0x1237));

    let status: Vec<_> = bus
        .take_events()
        .into_iter()
        .filter_map(|event| match event {
            DebugEvent::StatusChanged { cpu } => Some(cpu),
            DebugEvent::Break => None,
        })
        .collect();
    assert_eq!(status, vec!["suspended", "running", "suspended", "running"]);
    assert!(bus.take_events().is_empty());
}

#[test]
fn test_fast_forward_suppresses_watches() {
    let mut bus = bus_with_ram();
    let hits = Rc::new(RefCell::new(0));
    let counter = hits.clone();
    bus.set_watchpoint(
        WatchType::WriteMem,
        0x9000,
        0x9000,
        Trigger::new().then(move |_| {
            *counter.borrow_mut() += 1;
            Ok(())
        }),
    )
    .unwrap();
    bus.insert_breakpoint(0x9000, Trigger::new());

    bus.set_fast_forward(true);
    bus.write_mem(0x9000, 1, 0);
    assert!(!bus.check_breakpoints(0x9000));
    assert_eq!(*hits.borrow(), 0);
    // the write itself still happens
    assert_eq!(bus.peek_mem(0x9000, 0), 1);

    bus.set_fast_forward(false);
    bus.write_mem(0x9000, 2, 0);
    assert_eq!(*hits.borrow(), 1);
}

/// Device that asks for a break when a magic value is written to its port.
#[derive(Debug)]
struct DebugDevice {
    queue: MessageQueue,
}

impl Device for DebugDevice {
    fn name(&self) -> &str {
        "debugdevice"
    }

    fn write_io(&mut self, _port: u16, value: u8, _time: EmuTime) {
        if value == 0xFF {
            self.queue.borrow_mut().push_back(BusMessage::Break);
        }
    }
}

#[test]
fn test_device_requested_break() {
    let mut bus = DebugBus::new();
    let device = bus.add_device(Box::new(DebugDevice {
        queue: bus.message_queue(),
    }));
    bus.register_io_port(0x2E, device, Direction::Out);

    bus.write_io(0x2E, 0x00, 0);
    assert!(!bus.is_broken());
    bus.write_io(0x2E, 0xFF, 0);
    assert!(bus.is_broken());
    assert_eq!(bus.take_events().first(), Some(&DebugEvent::Break));
}

#[test]
fn test_failing_action_does_not_stop_siblings() {
    let mut bus = bus_with_ram();
    let hits = Rc::new(RefCell::new(0));
    let counter = hits.clone();
    bus.set_watchpoint(
        WatchType::WriteMem,
        0xA000,
        0xA000,
        Trigger::new().then(|_| anyhow::bail!("invalid command name \"foo\"")),
    )
    .unwrap();
    bus.set_watchpoint(
        WatchType::WriteMem,
        0xA000,
        0xA000,
        Trigger::new().then(move |_| {
            *counter.borrow_mut() += 1;
            Ok(())
        }),
    )
    .unwrap();

    bus.write_mem(0xA000, 0, 0);
    assert_eq!(*hits.borrow(), 1);
    assert!(!bus.is_broken());
}
