#![no_std]
#![no_main]

/// modules
mod usb;

/// configuration
use defmt_rtt as _;
use panic_probe as _;

/// system
use rtic_monotonics::systick::prelude::*;
systick_monotonic!(Mono, 1000);

/// hal
use stm32f4xx_hal::i2c::I2c;
use stm32f4xx_hal::prelude::*;
use stm32f4xx_hal::{gpio, pac, rcc::Clocks, timer};

use snowtrack::hub::{HubSession, Timebase};
use snowtrack::link::{GatedLink, LinkState};
use snowtrack::lossy::{LossyChannel, RESULT_QUEUE_LEN};
use snowtrack::shtp::{clear_bus, I2cBus, Reinit};
use snowtrack_common::QuaternionSample;

/// Acquisition to link.
static RESULTS: LossyChannel<QuaternionSample, RESULT_QUEUE_LEN> = LossyChannel::new();
static LINK: LinkState = LinkState::new();

/// type
type HubBus = I2cBus<I2c<pac::I2C1>, RebuildI2c1>;
type HubReset = gpio::PB0<gpio::Output<gpio::PushPull>>;
type HubDelay = timer::DelayUs<pac::TIM5>;
type Hub = HubSession<HubBus, HubReset, HubDelay, MonoClock>;
type Replies = GatedLink<'static, usb::ReplyQueue>;

const HUB_I2C_KHZ: u32 = 100;
/// Longest the forwarder waits on the result channel per pass.
const FORWARD_TIMEOUT_MS: u32 = 100;
/// Consecutive full-buffer retries before a reply is dropped.
const MAX_WRITE_STALLS: u32 = 10;

/// Tears down I2C1 after the bus wedges, clocks a stuck hub off SDA and
/// brings the peripheral back up.
pub struct RebuildI2c1 {
    clocks: Clocks,
    delay: timer::DelayUs<pac::TIM2>,
}

impl Reinit<I2c<pac::I2C1>> for RebuildI2c1 {
    fn reinit(&mut self, i2c: I2c<pac::I2C1>) -> I2c<pac::I2C1> {
        use gpio::alt::i2c1::{Scl, Sda};

        let (i2c1, pins) = i2c.release();
        match pins {
            (Scl::PB8(scl), Sda::PB9(sda)) => {
                let mut scl = scl.into_open_drain_output();
                let mut sda = sda.into_open_drain_output();
                match clear_bus(&mut scl, &mut sda, &mut self.delay) {
                    Ok(true) => {}
                    Ok(false) => defmt::warn!("hub bus: SDA still held low"),
                    Err(e) => defmt::warn!("hub bus clear failed: {:?}", e),
                }
                i2c1.i2c(
                    (scl.into_input(), sda.into_input()),
                    HUB_I2C_KHZ.kHz(),
                    &self.clocks,
                )
            }
            pins => i2c1.i2c(pins, HUB_I2C_KHZ.kHz(), &self.clocks),
        }
    }
}

pub struct MonoClock;

impl Timebase for MonoClock {
    fn now_us(&self) -> u64 {
        Mono::now().duration_since_epoch().to_millis() as u64 * 1_000
    }
}

pub struct MonoDelay;

impl embedded_hal_async::delay::DelayNs for MonoDelay {
    async fn delay_ns(&mut self, ns: u32) {
        Mono::delay(ns.div_ceil(1_000_000).millis()).await;
    }

    async fn delay_ms(&mut self, ms: u32) {
        Mono::delay(ms.millis()).await;
    }
}

#[rtic::app(device = stm32f4xx_hal::pac, peripherals = true, dispatchers = [USART1, I2C2_ER, I2C2_EV, SPI4])]
mod app {
    use rtic::Mutex;
    use rtic_sync::{channel::Receiver, make_channel};
    use usb_device::{class_prelude::UsbBusAllocator, UsbError};

    use snowtrack::acquisition::{Acquisition, AcquisitionConfig};
    use snowtrack::command::{
        CommandConsumer, CommandIngest, IngestConfig, RecordingSwitch, COMMAND_QUEUE_LEN,
    };
    use snowtrack::err::log::log_err;
    use snowtrack::hub::SessionConfig;
    use snowtrack::link::ResultForwarder;
    use snowtrack::shtp::{Framer, FramerConfig};
    use snowtrack_common::cmd::Command;
    use stm32f4xx_hal::otg_fs;

    use crate::usb::{
        usb_setup, InboundFrame, ReplyFrame, ReplyQueue, UsbLink, INBOUND_FRAME_LEN,
        INBOUND_QUEUE_LEN, REPLY_QUEUE_LEN,
    };

    use super::*;

    #[shared]
    struct Shared {
        usb: UsbLink,
    }

    #[local]
    struct Local {
        acquisition: Acquisition<'static, Hub, RESULT_QUEUE_LEN>,
        ingest: CommandIngest<'static, Replies, MonoDelay>,
        consumer: CommandConsumer<'static, RecordingSwitch, Replies>,
        forwarder: ResultForwarder<'static, Replies, MonoDelay, RESULT_QUEUE_LEN>,
        inbound_s: rtic_sync::channel::Sender<'static, InboundFrame, INBOUND_QUEUE_LEN>,
    }

    #[init(local = [
        ep_memory: [u32; 1024] = [0; 1024],
        usb_bus: Option<UsbBusAllocator<otg_fs::UsbBusType>> = None,
    ])]
    fn init(cx: init::Context) -> (Shared, Local) {
        let dp = cx.device;
        let rcc = dp.RCC.constrain();
        let hse = 16.MHz();
        let sysclk = 64.MHz();
        let clocks = rcc
            .cfgr
            .use_hse(hse)
            .sysclk(sysclk)
            .require_pll48clk()
            .freeze();

        Mono::start(cx.core.SYST, sysclk.to_Hz());
        defmt::info!("Booted. Initializing...");

        let gpioa = dp.GPIOA.split();
        let gpiob = dp.GPIOB.split();

        // Hub
        let hub_reset: HubReset = gpiob.pb0.into_push_pull_output_in_state(gpio::PinState::High);
        // data-ready line; the hub is polled instead
        let _hub_int = gpiob.pb1.into_pull_up_input();
        let i2c = dp
            .I2C1
            .i2c((gpiob.pb8, gpiob.pb9), HUB_I2C_KHZ.kHz(), &clocks);
        let rebuild = RebuildI2c1 {
            clocks,
            delay: dp.TIM2.delay_us(&clocks),
        };
        let bus = I2cBus::with_reinit(i2c, rebuild);
        let hub = HubSession::new(
            Framer::new(bus, FramerConfig::default()),
            hub_reset,
            dp.TIM5.delay_us(&clocks),
            MonoClock,
            SessionConfig::default(),
        );
        let acquisition = Acquisition::new(hub, &RESULTS, AcquisitionConfig::default());
        // Hub

        // USB link
        let usb_periph = otg_fs::USB {
            usb_global: dp.OTG_FS_GLOBAL,
            usb_device: dp.OTG_FS_DEVICE,
            usb_pwrclk: dp.OTG_FS_PWRCLK,
            pin_dm: gpio::alt::otg_fs::Dm::PA11(gpioa.pa11.into_alternate()),
            pin_dp: gpio::alt::otg_fs::Dp::PA12(gpioa.pa12.into_alternate()),
            hclk: clocks.hclk(),
        };
        let usb = match usb_setup(usb_periph, cx.local.usb_bus, cx.local.ep_memory) {
            Ok(usb) => usb,
            Err(_) => {
                defmt::error!("USB descriptor setup failed");
                panic!();
            }
        };
        // USB link

        // Channels
        let (cmd_s, cmd_r) = make_channel!(Command, COMMAND_QUEUE_LEN);
        let (inbound_s, inbound_r) = make_channel!(InboundFrame, INBOUND_QUEUE_LEN);
        let (reply_s, reply_r) = make_channel!(ReplyFrame, REPLY_QUEUE_LEN);
        let replies = || GatedLink::new(&LINK, ReplyQueue(reply_s.clone()));

        let ingest = CommandIngest::new(cmd_s, replies(), MonoDelay, IngestConfig::default());
        let consumer = CommandConsumer::new(cmd_r, RecordingSwitch::new(), replies());
        let forwarder = ResultForwarder::new(&RESULTS, replies(), MonoDelay, FORWARD_TIMEOUT_MS);
        // Channels

        if acquire::spawn().is_err()
            || commands::spawn().is_err()
            || forward::spawn().is_err()
            || inbound::spawn(inbound_r).is_err()
            || outbound::spawn(reply_r).is_err()
        {
            defmt::error!("Error spawning tasks");
            panic!();
        }

        (
            Shared { usb },
            Local {
                acquisition,
                ingest,
                consumer,
                forwarder,
                inbound_s,
            },
        )
    }

    #[task(priority = 1, local = [acquisition])]
    async fn acquire(cx: acquire::Context) {
        // returns only if the hub handshake fails
        let e = cx.local.acquisition.supervise(&mut MonoDelay).await;
        log_err(e.into());
        panic!();
    }

    #[task(priority = 1, local = [consumer])]
    async fn commands(cx: commands::Context) {
        cx.local.consumer.run().await;
    }

    #[task(priority = 2, local = [forwarder])]
    async fn forward(cx: forward::Context) {
        cx.local.forwarder.run().await;
    }

    #[task(priority = 2, local = [ingest])]
    async fn inbound(
        cx: inbound::Context,
        mut frames: Receiver<'static, InboundFrame, INBOUND_QUEUE_LEN>,
    ) {
        while let Ok(frame) = frames.recv().await {
            cx.local.ingest.on_bytes(&frame).await;
        }
    }

    #[task(priority = 2, shared = [usb])]
    async fn outbound(
        mut cx: outbound::Context,
        mut replies: Receiver<'static, ReplyFrame, REPLY_QUEUE_LEN>,
    ) {
        while let Ok(frame) = replies.recv().await {
            let mut sent = 0;
            let mut stalls = 0;
            while sent < frame.len() {
                match cx.shared.usb.lock(|usb| usb.write(&frame[sent..])) {
                    Ok(n) => sent += n,
                    Err(UsbError::WouldBlock) if stalls < MAX_WRITE_STALLS => {
                        stalls += 1;
                        Mono::delay(1.millis()).await;
                    }
                    Err(_) => {
                        defmt::warn!("reply dropped after {} bytes", sent);
                        break;
                    }
                }
            }
        }
    }

    #[task(binds = OTG_FS, priority = 3, shared = [usb], local = [
        inbound_s,
        rx_buf: [u8; INBOUND_FRAME_LEN] = [0; INBOUND_FRAME_LEN],
    ])]
    fn usb_fs(mut cx: usb_fs::Context) {
        let rx_buf = cx.local.rx_buf;
        let n = cx.shared.usb.lock(|usb| usb.poll(&LINK, rx_buf));
        if n == 0 {
            return;
        }
        let Ok(frame) = InboundFrame::from_slice(&rx_buf[..n]) else {
            return;
        };
        if cx.local.inbound_s.try_send(frame).is_err() {
            defmt::warn!("inbound frame dropped");
        }
    }
}
