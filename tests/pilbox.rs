//! tests on a real loop: a serial loop adapter on /dev/ttyUSB0, with at least a printer plugged

use std::time::Duration;
use serial_test::serial;

use hploop::{
    bridge::{PilBox, drive},
    controller::Value,
    LoopEngine, LoopSettings,
    };


fn test<T, F>(test: T)
where
    T: FnOnce(LoopEngine<PilBox>) -> F,
    F: Future<Output = LoopEngine<PilBox>>,
{
    let _ = env_logger::builder().is_test(true).try_init();
    tokio::runtime::Runtime::new()
    .expect("failed to create runtime")
    .block_on(async move {
        let adapter = PilBox::open("/dev/ttyUSB0").await.expect("failed to open loop adapter");
        let mut engine = LoopEngine::new(adapter, LoopSettings::default());
        engine.open().expect("failed to open loop");
        drive(&mut engine).await.expect("failed to clear loop");
        let engine = tokio::time::timeout(Duration::from_secs(10), test(engine))
            .await.expect("aborted test because took too long");
        engine.into_transport().close().await.expect("failed to release loop adapter");
    });
}

#[test]
#[serial]
#[ignore = "needs a loop adapter"]
fn count_devices() {
    test(|mut engine| async move {
        engine.nloop().unwrap();
        drive(&mut engine).await.unwrap();
        assert!(matches!(engine.registers().x, Value::Real(count) if count >= 1.));
        engine
    });
}

#[test]
#[serial]
#[ignore = "needs a loop adapter"]
fn identify_first() {
    test(|mut engine| async move {
        engine.registers_mut().recall(1.);
        engine.select().unwrap();
        engine.aid().unwrap();
        drive(&mut engine).await.unwrap();
        engine.id().unwrap();
        drive(&mut engine).await.unwrap();
        assert!(! engine.registers().alpha.is_empty());
        engine
    });
}

#[test]
#[serial]
#[ignore = "needs a loop adapter"]
fn print_line() {
    test(|mut engine| async move {
        engine.print_text(b"HPLOOP TEST", true).unwrap();
        drive(&mut engine).await.unwrap();
        assert!(engine.printer_address().is_some());
        assert_eq!(engine.queued_prints(), 0);
        engine
    });
}

#[test]
#[serial]
#[ignore = "needs a loop adapter"]
fn release_and_reopen() {
    let _ = env_logger::builder().is_test(true).try_init();
    tokio::runtime::Runtime::new()
    .expect("failed to create runtime")
    .block_on(async {
        for _ in 0 .. 2 {
            let adapter = PilBox::open("/dev/ttyUSB0").await.expect("failed to open loop adapter");
            let mut engine = LoopEngine::new(adapter, LoopSettings::default());
            engine.open().unwrap();
            drive(&mut engine).await.unwrap();
            engine.nloop().unwrap();
            drive(&mut engine).await.unwrap();
            tokio::time::timeout(Duration::from_secs(2), engine.into_transport().close())
                .await.expect("release took too long")
                .expect("failed to release loop adapter");
        }
    });
}
