#![no_std]
#![no_main]
#![deny(unused_must_use)]

use defmt::*;
use defmt_rtt as _; // global logger
use embassy_executor::Spawner;
use embassy_nrf::gpio::{AnyPin, Input, Level, Output, OutputDrive, Pin, Pull};
use embassy_nrf::spim::Spim;
use embassy_nrf::{bind_interrupts, peripherals, spim};
use embassy_time::{Delay, Duration, Timer};
use embedded_hal_bus::spi::ExclusiveDevice;
use ncp_host::{
    CommandClass, Config, EmbassyClock, FrameTransport, InterruptBridge, NoLine, Runner, SpiBus, State, WaitTime,
};
use static_cell::StaticCell;
use {embassy_nrf as _, panic_probe as _};

bind_interrupts!(struct Irqs {
    SERIAL0 => spim::InterruptHandler<peripherals::SERIAL0>;
});

const PACKET_SIZE: usize = 1600;
const PACKETS: usize = 8;

/// Frame type of the NCP's operating-mode request on the common queue.
const OPERMODE_REQUEST: u8 = 0x10;

type Spi = ExclusiveDevice<Spim<'static, peripherals::SERIAL0>, Output<'static>, Delay>;
type NcpRunner = Runner<'static, 'static, SpiBus<Spi>, EmbassyClock, NoLine>;

#[embassy_executor::task]
async fn ncp_task(mut runner: NcpRunner) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn irq_task(bridge: InterruptBridge<'static, 'static, NoLine>, mut host_irq: Input<'static>) {
    match bridge.watch(&mut host_irq).await {}
}

#[embassy_executor::task]
async fn blink_task(led: AnyPin) -> ! {
    let mut led = Output::new(led, Level::High, OutputDrive::Standard);
    loop {
        led.set_high();
        Timer::after(Duration::from_millis(100)).await;
        led.set_low();
        Timer::after(Duration::from_millis(100)).await;
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Hello World!");
    let p = embassy_nrf::init(Default::default());
    unwrap!(spawner.spawn(blink_task(p.P1_06.degrade())));

    let host_irq = Input::new(p.P0_23, Pull::None);
    let mut reset = Output::new(p.P0_12, Level::Low, OutputDrive::Standard);
    Timer::after(Duration::from_millis(10)).await;
    reset.set_high();
    Timer::after(Duration::from_millis(50)).await;

    let mut config = spim::Config::default();
    config.frequency = spim::Frequency::M8;
    let spim = Spim::new(p.SERIAL0, Irqs, p.P0_17, p.P0_14, p.P0_13, config);
    let csn = Output::new(p.P0_18, Level::High, OutputDrive::HighDrive);
    let spi = unwrap!(ExclusiveDevice::new(spim, csn, Delay));

    let transport = unwrap!(FrameTransport::new(SpiBus::new(spi), Config::new().with_block_size(256)));

    static BUFFER: StaticCell<[u8; PACKET_SIZE * PACKETS]> = StaticCell::new();
    static STATE: StaticCell<State<'static>> = StaticCell::new();
    let buffer = BUFFER.init([0; PACKET_SIZE * PACKETS]);
    let state = STATE.init(unwrap!(State::new(buffer, PACKET_SIZE, NoLine)));

    let (control, runner, bridge) = unwrap!(ncp_host::new(state, transport).await);
    unwrap!(spawner.spawn(ncp_task(runner)));
    unwrap!(spawner.spawn(irq_task(bridge, host_irq)));

    let request = [0u8; 16];
    match control
        .send_command(CommandClass::Common, OPERMODE_REQUEST, &request, WaitTime::Millis(1000))
        .await
    {
        Ok(response) => {
            let desc = unwrap!(response.descriptor());
            info!("opermode response: status {=u8:02x}", desc.status);
            control.free(response);
        }
        Err(e) => warn!("opermode failed: {:?}", e),
    }

    loop {
        match control.receive(WaitTime::Forever).await {
            Ok(packet) => {
                if let Ok(desc) = packet.descriptor() {
                    info!("rx frame {:?} type {=u8:02x} len {}", desc.queue, desc.frame_type, desc.length);
                }
                control.free(packet);
            }
            Err(e) => warn!("receive failed: {:?}", e),
        }
    }
}
