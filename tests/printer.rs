mod common;

use hploop::{
    frame::message,
    controller::{Value, printer::{printed_text, expand_columns}},
    Error,
    };
use common::*;


/// printer status bytes: no error, printer in 8 bit mode
const READY: [u8; 2] = [0x00, 0x10];

#[test]
fn discovery() {
    let mut engine = engine(vec![Device::new(0x10), Device::printer(READY)]);
    engine.print_text(b"HELLO", true).unwrap();
    assert!(! engine.is_idle());
    run(&mut engine).unwrap();
    assert_eq!(engine.printer_address(), Some(2));
    assert_eq!(engine.queued_prints(), 0);
    let devices = &engine.transport_mut().devices;
    assert!(devices[0].received.is_empty());
    assert_eq!(devices[1].received, b"HELLO\r\n");
    assert!(engine.addressing().is_unaddressed());
}

#[test]
fn polling_starts_at_selected() {
    let mut engine = engine(vec![Device::printer(READY), Device::new(0x10), Device::printer(READY)]);
    select(&mut engine, 2);
    engine.print_text(b"A", true).unwrap();
    run(&mut engine).unwrap();
    assert_eq!(engine.printer_address(), Some(3));
    assert!(engine.transport_mut().devices[0].received.is_empty());
}

#[test]
fn explicit_printer() {
    let mut engine = engine(vec![Device::printer(READY), Device::new(0x10), Device::printer(READY)]);
    engine.registers_mut().recall(3.);
    engine.prtsel().unwrap();
    engine.print_text(b"A", true).unwrap();
    run(&mut engine).unwrap();
    assert_eq!(engine.printer_address(), Some(3));
    assert_eq!(engine.transport_mut().devices[2].received, b"A\r\n");
}

#[test]
fn manual_addressing() {
    let mut engine = engine(vec![Device::new(0x10), Device::printer(READY)]);
    select(&mut engine, 1);
    engine.manio();
    engine.print_text(b"A", true).unwrap();
    // the selected device is used as is, without polling
    assert_eq!(run(&mut engine), Err(Error::NoPrinter));
    assert_eq!(engine.queued_prints(), 0);
    assert!(engine.is_bus_enabled());
}

#[test]
fn no_printer() {
    let mut engine = engine(vec![Device::new(0x10), Device::instrument(b"")]);
    engine.print_text(b"A", true).unwrap();
    assert_eq!(run(&mut engine), Err(Error::NoPrinter));
    assert_eq!(engine.queued_prints(), 0);
    assert!(engine.is_idle());
}

#[test]
fn printer_error() {
    let mut engine = engine(vec![Device::printer([0x08, 0x10])]);
    engine.print_text(b"A", true).unwrap();
    assert_eq!(run(&mut engine), Err(Error::PrinterError));
    assert!(engine.transport_mut().devices[0].received.is_empty());
}

#[test]
fn printing_disabled() {
    let mut engine = engine(vec![Device::printer(READY)]);
    engine.registers_mut().recall(-1.);
    engine.prtsel().unwrap();
    engine.print_text(b"A", true).unwrap();
    assert!(engine.is_idle());
    assert_eq!(engine.queued_prints(), 0);
    assert!(engine.transport_mut().sent.is_empty());
}

#[test]
fn queued_lines() {
    let mut engine = engine(vec![Device::printer(READY)]);
    engine.print_text(b"ONE", true).unwrap();
    engine.print_text(b"TWO", false).unwrap();
    assert_eq!(engine.queued_prints(), 2);
    run(&mut engine).unwrap();
    // the second line switches to right justification
    assert_eq!(engine.transport_mut().devices[0].received, b"ONE\r\n\xe8TWO\r\n");
}

#[test]
fn line_queued_while_unaddressing() {
    let mut engine = engine(vec![Device::printer(READY)]);
    engine.print_text(b"ONE", true).unwrap();
    // run until the printer got its line and is being unaddressed
    while ! engine.transport_mut().sent.last().is_some_and(|frame| frame.is(message::UNL))
        || engine.transport_mut().devices[0].received.len() < 5
        {engine.resume(false).unwrap();}
    engine.print_text(b"TWO", true).unwrap();
    assert_eq!(engine.queued_prints(), 1);
    run(&mut engine).unwrap();
    assert_eq!(engine.transport_mut().devices[0].received, b"ONE\r\nTWO\r\n");
    assert_eq!(engine.queued_prints(), 0);
    assert!(engine.is_idle());
}

#[test]
fn text_then_bitmap() {
    let mut engine = engine(vec![Device::printer(READY)]);
    let bits: Vec<u8> = (0 .. 7).map(|row| 1 << row).collect();
    engine.print_text(b"AB", true).unwrap();
    engine.print_lcd(&bits, 1, 0, 0, 8, 7).unwrap();
    assert_eq!(engine.queued_prints(), 2);
    run(&mut engine).unwrap();
    let received = &engine.transport_mut().devices[0].received;
    assert_eq!(&received[.. 4], b"AB\r\n");
    // the bitmap switches the printer to column mode
    assert_eq!(received[4], 0xd2);
    assert_eq!(expand_columns(&received[4 ..], 8).as_slice(), &[0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0]);
    assert_eq!(engine.queued_prints(), 0);
}

#[test]
fn requests_behind_print() {
    let mut engine = engine(vec![Device::instrument(b""), Device::printer(READY)]);
    select(&mut engine, 1);
    engine.print_text(b"X", true).unwrap();
    // the request waits for the print job
    engine.id().unwrap();
    // only one request may wait
    assert_eq!(engine.nloop(), Err(Error::Busy));
    assert!(Error::Busy.is_retryable());

    run(&mut engine).unwrap();
    assert_eq!(engine.transport_mut().devices[1].received, b"X\r\n");
    assert_eq!(engine.registers().alpha.as_slice(), b"HP3468A");
    assert!(engine.is_idle());
}

#[test]
fn trace_printing() {
    let mut engine = engine(vec![Device::instrument(b""), Device::printer(READY)]);
    engine.registers_mut().flags.trace_print = true;
    engine.registers_mut().flags.printer_exists = true;
    select(&mut engine, 1);
    engine.id().unwrap();
    run(&mut engine).unwrap();
    assert_eq!(engine.registers().alpha.as_slice(), b"HP3468A");
    assert_eq!(printed_text(&engine.transport_mut().devices[1].received).as_slice(), b"HP3468A");
    assert_eq!(engine.depth(), 0);

    engine.transport_mut().devices[1].received.clear();
    engine.nloop().unwrap();
    run(&mut engine).unwrap();
    assert_eq!(engine.registers().x, Value::Real(2.));
    assert_eq!(engine.transport_mut().devices[1].received, b"2\r\n");
}

#[test]
fn normal_printing() {
    let mut engine = engine(vec![Device::instrument(b""), Device::printer(READY)]);
    engine.registers_mut().flags.normal_print = true;
    engine.registers_mut().flags.printer_exists = true;
    select(&mut engine, 1);
    engine.id().unwrap();
    run(&mut engine).unwrap();
    assert_eq!(printed_text(&engine.transport_mut().devices[1].received).as_slice(), b"HP3468A");

    // nothing is printed without a printer declared
    engine.transport_mut().devices[1].received.clear();
    engine.registers_mut().flags.printer_exists = false;
    engine.id().unwrap();
    run(&mut engine).unwrap();
    assert!(engine.transport_mut().devices[1].received.is_empty());
}

#[test]
fn trace_without_printer() {
    let mut engine = engine(vec![Device::instrument(b"")]);
    engine.registers_mut().flags.trace_print = true;
    engine.registers_mut().flags.printer_exists = true;
    select(&mut engine, 1);
    engine.id().unwrap();
    // the result is delivered before printing fails
    assert_eq!(run(&mut engine), Err(Error::NoPrinter));
    assert_eq!(engine.registers().alpha.as_slice(), b"HP3468A");
}

#[test]
fn display_bitmap() {
    let mut engine = engine(vec![Device::printer(READY)]);
    // 8 columns, 7 rows, a diagonal
    let bits: Vec<u8> = (0 .. 7).map(|row| 1 << row).collect();
    engine.print_lcd(&bits, 1, 0, 0, 8, 7).unwrap();
    run(&mut engine).unwrap();
    let received = &engine.transport_mut().devices[0].received;
    assert_eq!(received[0], 0xd2);
    assert_eq!(expand_columns(received, 8).as_slice(), &[0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0]);

    assert_eq!(engine.print_lcd(&bits, 1, 0, 0, 8, 9), Err(Error::InvalidData));
    // geometry too large to be computed
    assert_eq!(engine.print_lcd(&[0; 8], usize::MAX / 4, 0, 0, 8, 2), Err(Error::InvalidData));
    assert_eq!(engine.print_lcd(&[0; 8], 1, 0, 0, 8, usize::MAX), Err(Error::InvalidData));
    assert!(engine.is_idle());
}
