use elcon_lib::battery::Battery;
use elcon_lib::bus::{Bus, LoopbackBus};
use elcon_lib::driver::{ChargerDriver, DriverSettings};
use elcon_lib::protocol::{pack_command, Address, Status};
use elcon_lib::simulator::{ChargerSimulator, SimulatorSettings};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

fn driver_settings() -> DriverSettings {
    DriverSettings {
        volts: 16.6,
        amps: 3.0,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn driver_charges_simulated_battery() {
    let bus = LoopbackBus::default();
    let simulator = ChargerSimulator::new(
        bus.endpoint(),
        Battery::new(3.0, 4),
        SimulatorSettings::default(),
    );
    let reports = simulator.subscribe();
    let (driver, handle) = ChargerDriver::new(bus.endpoint(), driver_settings());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let simulator_task = tokio::spawn(simulator.run(shutdown_rx));
    let driver_task = tokio::spawn(driver.run());

    sleep(Duration::from_secs(3)).await;
    assert!(!reports.borrow().active, "no command sent before start");

    assert!(handle.start().await);
    sleep(Duration::from_secs(10)).await;
    {
        let report = reports.borrow();
        assert!(report.active);
        assert_eq!(report.volts, 16.6);
        assert_eq!(report.output_amps, 3.0);
        assert!(!report.flags.timeout);
        assert!(report.battery.charge_state_ah() > 1.5);
        assert!(report.status_sent > 0);
    }
    let driver_report = handle.report();
    assert!(driver_report.running);
    assert!(driver_report.commands_sent >= 10);
    let status = driver_report.last_status.expect("status from the charger");
    assert_eq!(status.source, Address::Charger as u8);
    assert_eq!(status.voltage, 16.6);
    assert_eq!(status.current, 3.0);

    assert!(handle.finish().await);
    driver_task.await.unwrap().unwrap();
    shutdown_tx.send(true).unwrap();
    let session = simulator_task.await.unwrap().unwrap();
    assert!(session.battery().charge_state_ah() > 1.5);
}

#[tokio::test(start_paused = true)]
async fn simulator_times_out_and_recovers() {
    let bus = LoopbackBus::default();
    let simulator = ChargerSimulator::new(
        bus.endpoint(),
        Battery::new(3.0, 4),
        SimulatorSettings::default(),
    );
    let reports = simulator.subscribe();
    let (driver, handle) = ChargerDriver::new(bus.endpoint(), driver_settings());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let simulator_task = tokio::spawn(simulator.run(shutdown_rx));
    let driver_task = tokio::spawn(driver.run());

    handle.start().await;
    sleep(Duration::from_secs(5)).await;
    assert!(reports.borrow().active);

    handle.stop().await;
    sleep(Duration::from_secs(5)).await;
    {
        let report = reports.borrow();
        assert!(!report.active);
        assert!(report.flags.timeout);
        assert_eq!(report.volts, 16.6);
        assert_eq!(report.amps, 0.0);
        assert_eq!(report.output_amps, 0.0);
        assert!(report.since_last_update.unwrap() > Duration::from_secs(2));
    }
    // the charger keeps reporting, now with the timeout bit and no current
    let status = handle.report().last_status.expect("status from the charger");
    assert!(status.flags.timeout);
    assert_eq!(status.voltage, 16.6);
    assert_eq!(status.current, 0.0);
    assert_eq!(status.flags.to_string(), "HW=OK Temp=OK Vin=OK Bat=OK T/O=XX");
    let charge_after_timeout = reports.borrow().battery.charge_state_ah();

    sleep(Duration::from_secs(5)).await;
    assert_eq!(
        reports.borrow().battery.charge_state_ah(),
        charge_after_timeout,
        "idle charger must not charge"
    );

    handle.start().await;
    sleep(Duration::from_secs(3)).await;
    {
        let report = reports.borrow();
        assert!(report.active);
        assert!(!report.flags.timeout);
        assert!(report.battery.charge_state_ah() > charge_after_timeout);
    }
    assert!(!handle.report().last_status.unwrap().flags.timeout);

    handle.finish().await;
    driver_task.await.unwrap().unwrap();
    drop(shutdown_tx);
    let session = simulator_task.await.unwrap().unwrap();
    assert!(session.is_active());
}

#[tokio::test(start_paused = true)]
async fn power_limit_applies_on_the_wire() {
    let bus = LoopbackBus::default();
    let mut monitor = bus.endpoint();
    let (driver, handle) = ChargerDriver::new(
        bus.endpoint(),
        DriverSettings {
            volts: 120.0,
            amps: 10.0,
            ..Default::default()
        },
    );
    let driver_task = tokio::spawn(driver.run());

    handle.start().await;
    let frame = monitor.recv().await.unwrap();
    assert_eq!(frame.arbitration_id(), 0x1806_E5F4);
    // 1000W * 0.95 / 120V = 7.916A, sent as 79 tenths
    assert_eq!(frame.data(), &[0x04, 0xB0, 0x00, 0x4F, 0x01]);

    handle.set_max_watts(500.0).await;
    handle.set_volts(100.0).await;
    let mut last = monitor.recv().await.unwrap();
    while last.data()[0..2] != [0x03, 0xE8] {
        last = monitor.recv().await.unwrap();
    }
    // 500W * 0.95 / 100V = 4.75A
    assert_eq!(last.data(), &[0x03, 0xE8, 0x00, 0x2F, 0x01]);

    handle.finish().await;
    driver_task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn charger_reports_zero_current_when_battery_is_above_supply() {
    let bus = LoopbackBus::default();
    let simulator = ChargerSimulator::new(
        bus.endpoint(),
        Battery::new(3.0, 4),
        SimulatorSettings::default(),
    );
    let (driver, handle) = ChargerDriver::new(
        bus.endpoint(),
        DriverSettings {
            volts: 14.0,
            amps: 3.0,
            ..Default::default()
        },
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let simulator_task = tokio::spawn(simulator.run(shutdown_rx));
    let driver_task = tokio::spawn(driver.run());

    handle.start().await;
    sleep(Duration::from_secs(5)).await;
    let status = handle.report().last_status.expect("status from the charger");
    assert_eq!(status.voltage, 14.0);
    assert_eq!(status.current, 0.0);
    assert!(!status.flags.timeout);

    handle.finish().await;
    driver_task.await.unwrap().unwrap();
    shutdown_tx.send(true).unwrap();
    let session = simulator_task.await.unwrap().unwrap();
    assert_eq!(session.battery().charge_state_ah(), 1.5);
}

#[tokio::test(start_paused = true)]
async fn driver_skips_commands_without_current() {
    let bus = LoopbackBus::default();
    let mut monitor = bus.endpoint();
    let (driver, handle) = ChargerDriver::new(
        bus.endpoint(),
        DriverSettings {
            volts: 120.0,
            amps: 0.0,
            ..Default::default()
        },
    );
    let driver_task = tokio::spawn(driver.run());

    handle.start().await;
    sleep(Duration::from_secs(5)).await;
    let report = handle.report();
    assert!(report.running);
    assert_eq!(report.commands_sent, 0);
    assert!(
        tokio::time::timeout(Duration::from_secs(1), monitor.recv())
            .await
            .is_err(),
        "no frame may reach the bus"
    );

    // a positive current resumes sending
    handle.set_amps(2.0).await;
    let frame = monitor.recv().await.unwrap();
    assert_eq!(frame.data(), &[0x04, 0xB0, 0x00, 0x14, 0x01]);

    handle.finish().await;
    driver_task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn driver_ignores_frames_for_other_nodes() {
    let bus = LoopbackBus::default();
    let injector = bus.endpoint();
    let (driver, handle) = ChargerDriver::new(bus.endpoint(), driver_settings());
    let driver_task = tokio::spawn(driver.run());

    // a command addressed to the charger is not a status for us
    injector
        .send(pack_command(Address::Manager as u8, Address::Charger as u8, 12.0, 1.0, true).unwrap())
        .unwrap();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.report().last_status, None);

    let status = elcon_lib::protocol::pack_status(
        Address::Charger as u8,
        Address::Manager as u8,
        25.6,
        0.8,
        Default::default(),
    )
    .unwrap();
    injector.send(status).unwrap();
    sleep(Duration::from_secs(1)).await;
    let received: Status = handle.report().last_status.unwrap();
    assert_eq!(received.voltage, 25.6);
    assert_eq!(received.current, 0.8);
    assert_eq!(received.destination, Address::Manager as u8);

    handle.finish().await;
    driver_task.await.unwrap().unwrap();
}
