//! Serial (tty) links, 8N1 without flow control.

use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPortType, StopBits};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::{Connector, StreamLink};

/// Wait used for reads without a timeout; the read is retried when it
/// expires.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// Which tty to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialDevice {
    Path(PathBuf),
    /// The single tty whose USB device reports this vendor and product ID.
    UsbId { vid: u16, pid: u16 },
}

impl fmt::Display for SerialDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerialDevice::Path(path) => write!(f, "{}", path.display()),
            SerialDevice::UsbId { vid, pid } => write!(f, "usb {vid:04x}:{pid:04x}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub device: SerialDevice,
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: SerialDevice::Path(PathBuf::from("/dev/ttyACM0")),
            baud_rate: 115_200,
        }
    }
}

impl SerialConfig {
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.device = SerialDevice::Path(path.into());
        self
    }

    pub fn with_usb_id(mut self, vid: u16, pid: u16) -> Self {
        self.device = SerialDevice::UsbId { vid, pid };
        self
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

/// An open serial port.
///
/// With a read timeout set, a read that sees no data fails with
/// [`ErrorKind::TimedOut`]. Without one, reads wait for data. The port has a
/// single timeout, so writes share the read timeout. A port cannot be shut
/// down from another handle: a blocked reader returns within its timeout.
pub struct SerialLink {
    port: Box<dyn serialport::SerialPort>,
    path: PathBuf,
    blocking: bool,
}

impl fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialLink")
            .field("path", &self.path)
            .field("blocking", &self.blocking)
            .finish()
    }
}

impl SerialLink {
    /// Open `path` at `baud_rate` and discard anything the device sent before.
    pub fn open(path: impl Into<PathBuf>, baud_rate: u32) -> io::Result<Self> {
        let path = path.into();
        let port = serialport::new(path.to_string_lossy(), baud_rate)
            .data_bits(DataBits::Eight)
            .flow_control(FlowControl::None)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(IDLE_WAIT)
            .open()?;
        port.clear(ClearBuffer::All)?;
        debug!(path = %path.display(), baud_rate, "serial port configured");
        Ok(Self {
            port,
            path,
            blocking: true,
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.port.read(buf) {
                Err(err) if self.blocking && err.kind() == ErrorKind::TimedOut => continue,
                other => return other,
            }
        }
    }
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl StreamLink for SerialLink {
    fn try_clone_link(&self) -> io::Result<Self> {
        Ok(Self {
            port: self.port.try_clone()?,
            path: self.path.clone(),
            blocking: self.blocking,
        })
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.port.set_timeout(timeout.unwrap_or(IDLE_WAIT))?;
        self.blocking = timeout.is_none();
        Ok(())
    }

    fn set_write_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    fn shutdown(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Port names whose USB vendor and product ID match, sorted.
fn matching_ports(
    ports: impl IntoIterator<Item = (String, Option<(u16, u16)>)>,
    vid: u16,
    pid: u16,
) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = ports
        .into_iter()
        .filter(|(_, id)| *id == Some((vid, pid)))
        .map(|(name, _)| PathBuf::from(name))
        .collect();
    found.sort();
    found
}

/// Device nodes of every serial port backed by a USB device with this vendor
/// and product ID, sorted.
pub fn find_usb_devices(vid: u16, pid: u16) -> io::Result<Vec<PathBuf>> {
    let ports = serialport::available_ports()?;
    Ok(matching_ports(
        ports.into_iter().map(|info| {
            let id = match info.port_type {
                SerialPortType::UsbPort(usb) => Some((usb.vid, usb.pid)),
                _ => None,
            };
            (info.port_name, id)
        }),
        vid,
        pid,
    ))
}

/// Opens the configured tty on each start.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    config: SerialConfig,
}

impl SerialConnector {
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    /// The device node the config selects.
    pub fn resolve(&self) -> Result<PathBuf> {
        match &self.config.device {
            SerialDevice::Path(path) => Ok(path.clone()),
            SerialDevice::UsbId { vid, pid } => {
                // Enumeration fails outright on hosts without a device tree
                // to scan; nothing can match there.
                let candidates = find_usb_devices(*vid, *pid).unwrap_or_else(|err| {
                    debug!(error = %err, "serial port enumeration failed");
                    Vec::new()
                });
                pick(&self.config.device, candidates)
            }
        }
    }
}

fn pick(device: &SerialDevice, mut candidates: Vec<PathBuf>) -> Result<PathBuf> {
    match candidates.len() {
        0 => Err(TransportError::DeviceNotFound {
            device: device.to_string(),
        }),
        1 => Ok(candidates.remove(0)),
        _ => Err(TransportError::AmbiguousDevice {
            device: device.to_string(),
            candidates,
        }),
    }
}

impl Connector for SerialConnector {
    type Link = SerialLink;

    fn connect(&mut self) -> Result<SerialLink> {
        let path = self.resolve()?;
        let link = SerialLink::open(&path, self.config.baud_rate).map_err(|source| {
            TransportError::Connect {
                target: path.display().to_string(),
                source,
            }
        })?;
        info!(path = %path.display(), baud_rate = self.config.baud_rate, "serial port opened");
        Ok(link)
    }

    fn describe(&self) -> String {
        format!("serial://{}", self.config.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("packlink-serial-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn discovery_matches_usb_ids() {
        let ports = || {
            vec![
                ("/dev/ttyACM1".to_string(), Some((0x2e8a, 0x000a))),
                ("/dev/ttyACM0".to_string(), Some((0x2e8a, 0x000a))),
                ("/dev/ttyUSB0".to_string(), Some((0x0403, 0x6001))),
                ("/dev/ttyS0".to_string(), None),
            ]
        };

        assert_eq!(
            matching_ports(ports(), 0x2e8a, 0x000a),
            vec![PathBuf::from("/dev/ttyACM0"), PathBuf::from("/dev/ttyACM1")]
        );
        assert_eq!(
            matching_ports(ports(), 0x0403, 0x6001),
            vec![PathBuf::from("/dev/ttyUSB0")]
        );
        assert!(matching_ports(ports(), 0x1234, 0x5678).is_empty());
    }

    #[test]
    fn pick_requires_exactly_one_candidate() {
        let device = SerialDevice::UsbId { vid: 0x2e8a, pid: 0x000a };
        assert!(matches!(
            pick(&device, Vec::new()),
            Err(TransportError::DeviceNotFound { device }) if device == "usb 2e8a:000a"
        ));
        assert_eq!(
            pick(&device, vec![PathBuf::from("/dev/ttyACM0")]).unwrap(),
            PathBuf::from("/dev/ttyACM0")
        );
        let err = pick(
            &device,
            vec![PathBuf::from("/dev/ttyACM0"), PathBuf::from("/dev/ttyACM1")],
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::AmbiguousDevice { candidates, .. } if candidates.len() == 2));
    }

    #[test]
    fn unknown_usb_id_is_not_found() {
        let connector = SerialConnector::new(SerialConfig::default().with_usb_id(0xdead, 0xbeef));
        assert!(matches!(
            connector.resolve(),
            Err(TransportError::DeviceNotFound { .. })
        ));
    }

    #[test]
    fn non_tty_paths_fail_to_connect() {
        let dir = temp_dir("plain");
        let path = dir.join("not-a-tty");
        std::fs::write(&path, b"").unwrap();

        let mut connector = SerialConnector::new(SerialConfig::default().with_path(&path));
        assert!(matches!(connector.connect(), Err(TransportError::Connect { .. })));
        assert_eq!(connector.describe(), format!("serial://{}", path.display()));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_device_fails_to_connect() {
        let mut connector =
            SerialConnector::new(SerialConfig::default().with_path("/dev/packlink-no-such-tty"));
        assert!(matches!(
            connector.connect(),
            Err(TransportError::Connect { target, .. }) if target == "/dev/packlink-no-such-tty"
        ));
    }
}
