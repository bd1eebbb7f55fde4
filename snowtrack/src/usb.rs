use heapless::Vec;
use rtic_sync::channel::{Sender, TrySendError};
use snowtrack::err::LinkError;
use snowtrack::link::{Link, LinkState};
use snowtrack_common::msg::MAX_REPLY_LEN;
use stm32f4xx_hal::otg_fs::{UsbBus, UsbBusType, USB};
use usb_device::{
    class_prelude::UsbBusAllocator,
    device::{BuilderError, StringDescriptors, UsbDevice, UsbDeviceBuilder, UsbDeviceState, UsbVidPid},
    UsbError,
};
use usbd_serial::SerialPort;

/// Largest inbound frame; one full-speed bulk packet.
pub const INBOUND_FRAME_LEN: usize = 64;
pub const INBOUND_QUEUE_LEN: usize = 4;
pub const REPLY_QUEUE_LEN: usize = 8;

pub type InboundFrame = Vec<u8, INBOUND_FRAME_LEN>;
pub type ReplyFrame = Vec<u8, MAX_REPLY_LEN>;

/// CDC serial port standing in for the radio link.
pub struct UsbLink {
    dev: UsbDevice<'static, UsbBusType>,
    serial: SerialPort<'static, UsbBusType>,
}

pub fn usb_setup(
    usb: USB,
    usb_bus: &'static mut Option<UsbBusAllocator<UsbBusType>>,
    ep_memory: &'static mut [u32; 1024],
) -> Result<UsbLink, BuilderError> {
    let bus: &'static UsbBusAllocator<UsbBusType> = usb_bus.insert(UsbBus::new(usb, ep_memory));
    let serial = SerialPort::new(bus);
    let dev = UsbDeviceBuilder::new(bus, UsbVidPid(0x1209, 0x6EF2))
        .device_class(usbd_serial::USB_CLASS_CDC)
        .strings(&[StringDescriptors::default()
            .manufacturer("Snowtrack")
            .product("Snowtrack Motion Tracker")
            .serial_number("0001")])?
        .build();

    Ok(UsbLink { dev, serial })
}

impl UsbLink {
    /// Service the device, update the connection state and read whatever
    /// the host sent into `buf`. Returns the number of bytes read.
    pub fn poll(&mut self, link: &LinkState, buf: &mut [u8]) -> usize {
        let active = self.dev.poll(&mut [&mut self.serial]);
        if self.dev.state() == UsbDeviceState::Configured && self.serial.dtr() {
            link.on_connect();
        } else {
            link.on_disconnect();
        }
        if !active {
            return 0;
        }
        match self.serial.read(buf) {
            Ok(n) => n,
            Err(UsbError::WouldBlock) => 0,
            Err(_) => {
                defmt::warn!("usb read failed");
                0
            }
        }
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<usize, UsbError> {
        self.serial.write(bytes)
    }
}

/// Outbound side of the link as seen by the core: frames are queued for the
/// task that owns the serial port.
#[derive(Clone)]
pub struct ReplyQueue(pub Sender<'static, ReplyFrame, REPLY_QUEUE_LEN>);

impl Link for ReplyQueue {
    fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let frame = ReplyFrame::from_slice(bytes).map_err(|_| LinkError::Busy)?;
        self.0.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => LinkError::Busy,
            TrySendError::NoReceiver(_) => LinkError::Disconnected,
        })
    }
}
