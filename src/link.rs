//! Physical links to the ELM327 adapter
//!
//! Every transport kind (USB serial, Bluetooth RFCOMM, WiFi TCP) and the
//! in-process simulator sit behind [`AdapterLink`], so the transport only
//! deals in bytes.

use crate::constants::timing;
use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use serialport::{available_ports, SerialPortType};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Information about a serial port
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortInfo {
    pub name: String,
    pub port_type: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    /// FTDI, CH340 or CP210x bridge, the chips ELM327 clones ship with
    pub is_elm_bridge: bool,
}

impl PortInfo {
    pub fn is_bluetooth(&self) -> bool {
        self.port_type == "Bluetooth"
    }
}

/// Connection state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

/// Byte-level access to an open adapter handle
pub trait AdapterLink: Send {
    /// Write the whole buffer
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Return whatever bytes are waiting, possibly none. Never blocks for
    /// longer than the link's own short read timeout.
    fn read_available(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Drop stale input before a new command
    fn clear_input(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Human readable description for logs
    fn describe(&self) -> String;
}

// USB vendor ids of the serial bridges used in ELM327 clones
const VID_FTDI: u16 = 0x0403;
const VID_CH340: u16 = 0x1A86;
const VID_CP210X: u16 = 0x10C4;

/// List all available serial ports, including Bluetooth RFCOMM bindings
pub fn list_ports() -> Result<Vec<PortInfo>, TransportError> {
    let ports = available_ports()
        .map_err(|e| TransportError::Io(format!("Failed to list ports: {}", e)))?;

    let port_infos: Vec<PortInfo> = ports
        .into_iter()
        .map(|p| {
            let (port_type, vid, pid, manufacturer, product, serial_number, is_elm_bridge) =
                match &p.port_type {
                    SerialPortType::UsbPort(usb) => {
                        let is_bridge = matches!(usb.vid, VID_FTDI | VID_CH340 | VID_CP210X);
                        (
                            "USB".to_string(),
                            Some(usb.vid),
                            Some(usb.pid),
                            usb.manufacturer.clone(),
                            usb.product.clone(),
                            usb.serial_number.clone(),
                            is_bridge,
                        )
                    }
                    SerialPortType::PciPort => {
                        ("PCI".to_string(), None, None, None, None, None, false)
                    }
                    SerialPortType::BluetoothPort => {
                        ("Bluetooth".to_string(), None, None, None, None, None, false)
                    }
                    SerialPortType::Unknown => {
                        ("Unknown".to_string(), None, None, None, None, None, false)
                    }
                };

            PortInfo {
                name: p.port_name,
                port_type,
                vid,
                pid,
                manufacturer,
                product,
                serial_number,
                is_elm_bridge,
            }
        })
        .collect();

    Ok(port_infos)
}

fn normalize_mac(mac: &str) -> String {
    mac.chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn looks_like_device_path(target: &str) -> bool {
    target.starts_with('/') || target.to_ascii_uppercase().starts_with("COM")
}

/// Resolve a Bluetooth target to the serial device the OS bound it to.
///
/// An explicit device path (`/dev/rfcomm0`, `COM7`) is used as is. A MAC
/// address is matched, ignoring separators and case, against the name and
/// serial number of Bluetooth-type ports.
pub fn resolve_bluetooth_port(target: &str, ports: &[PortInfo]) -> Result<String, TransportError> {
    let target = target.trim();
    if target.is_empty() {
        return Err(TransportError::InvalidTarget {
            target: target.to_string(),
            reason: "empty Bluetooth target".to_string(),
        });
    }

    if looks_like_device_path(target) {
        return Ok(target.to_string());
    }

    let mac = normalize_mac(target);
    if mac.len() != 12 {
        return Err(TransportError::InvalidTarget {
            target: target.to_string(),
            reason: "expected a MAC address or a device path".to_string(),
        });
    }

    ports
        .iter()
        .filter(|p| p.is_bluetooth())
        .find(|p| {
            normalize_mac(&p.name).contains(&mac)
                || p
                    .serial_number
                    .as_deref()
                    .map(|s| normalize_mac(s).contains(&mac))
                    .unwrap_or(false)
        })
        .map(|p| p.name.clone())
        .ok_or_else(|| TransportError::DeviceNotFound(format!("No paired Bluetooth port for {}", target)))
}

/// Serial link over a USB bridge or a Bluetooth RFCOMM binding
pub struct SerialLink {
    port: Box<dyn serialport::SerialPort>,
    name: String,
}

impl SerialLink {
    /// Open a port 8N1 without flow control
    pub fn open(port_name: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self, TransportError> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(read_timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => TransportError::DeviceNotFound(port_name.to_string()),
                _ => TransportError::OpenFailed {
                    target: port_name.to_string(),
                    reason: e.to_string(),
                },
            })?;

        log::info!("Opened {} at {} baud", port_name, baud_rate);
        Ok(Self {
            port,
            name: port_name.to_string(),
        })
    }
}

impl AdapterLink for SerialLink {
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.port
            .write_all(data)
            .map_err(|e| TransportError::Io(format!("Write error: {}", e)))?;
        self.port
            .flush()
            .map_err(|e| TransportError::Io(format!("Flush error: {}", e)))
    }

    fn read_available(&mut self) -> Result<Vec<u8>, TransportError> {
        let bytes_to_read = self
            .port
            .bytes_to_read()
            .map_err(|e| TransportError::Io(format!("Error checking available bytes: {}", e)))?;

        if bytes_to_read == 0 {
            return Ok(Vec::new());
        }

        let mut buffer = vec![0u8; bytes_to_read as usize];
        let bytes_read = match self.port.read(&mut buffer) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::TimedOut => 0,
            Err(e) => return Err(TransportError::Io(format!("Read error: {}", e))),
        };

        buffer.truncate(bytes_read);
        Ok(buffer)
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| TransportError::Io(format!("Failed to clear buffers: {}", e)))
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// TCP link to a WiFi adapter
pub struct TcpLink {
    stream: TcpStream,
    peer: SocketAddr,
}

impl TcpLink {
    /// Parse `host:port` into a socket address
    pub fn resolve(target: &str) -> Result<SocketAddr, TransportError> {
        let invalid = |reason: &str| TransportError::InvalidTarget {
            target: target.to_string(),
            reason: reason.to_string(),
        };

        let (host, port) = target
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected host:port"))?;
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port: u16 = port.parse().map_err(|_| invalid("invalid port"))?;
        if port == 0 {
            return Err(invalid("port must be non-zero"));
        }

        (host, port)
            .to_socket_addrs()
            .map_err(|e| TransportError::DeviceNotFound(format!("{}: {}", target, e)))?
            .next()
            .ok_or_else(|| TransportError::DeviceNotFound(target.to_string()))
    }

    pub fn connect(target: &str, connect_timeout: Duration) -> Result<Self, TransportError> {
        let peer = Self::resolve(target)?;
        let stream = TcpStream::connect_timeout(&peer, connect_timeout).map_err(|e| {
            TransportError::OpenFailed {
                target: target.to_string(),
                reason: e.to_string(),
            }
        })?;

        // Short read timeout so read_available returns promptly
        stream.set_read_timeout(Some(timing::READ_POLL))?;
        stream.set_nodelay(true)?;

        log::info!("Connected to WiFi adapter at {}", peer);
        Ok(Self { stream, peer })
    }
}

impl AdapterLink for TcpLink {
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.stream
            .write_all(data)
            .map_err(|e| TransportError::Io(format!("Write error: {}", e)))
    }

    fn read_available(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut buffer = [0u8; 512];
        match self.stream.read(&mut buffer) {
            Ok(0) => Err(TransportError::Io("Connection closed by adapter".to_string())),
            Ok(n) => Ok(buffer[..n].to_vec()),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(Vec::new()),
            Err(e) => Err(TransportError::Io(format!("Read error: {}", e))),
        }
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bt_port(name: &str, serial: Option<&str>) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            port_type: "Bluetooth".to_string(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: serial.map(str::to_string),
            is_elm_bridge: false,
        }
    }

    #[test]
    fn test_bluetooth_explicit_path() {
        assert_eq!(
            resolve_bluetooth_port("/dev/rfcomm0", &[]).unwrap(),
            "/dev/rfcomm0"
        );
        assert_eq!(resolve_bluetooth_port("COM7", &[]).unwrap(), "COM7");
    }

    #[test]
    fn test_bluetooth_mac_match() {
        let ports = vec![
            bt_port("/dev/cu.Bluetooth-Incoming-Port", None),
            bt_port("/dev/cu.OBDII-00-1D-A5-68-98-8B", None),
        ];
        assert_eq!(
            resolve_bluetooth_port("00:1d:a5:68:98:8b", &ports).unwrap(),
            "/dev/cu.OBDII-00-1D-A5-68-98-8B"
        );
    }

    #[test]
    fn test_bluetooth_mac_via_serial_number() {
        let ports = vec![bt_port("COM9", Some("001DA568988B"))];
        assert_eq!(resolve_bluetooth_port("00:1D:A5:68:98:8B", &ports).unwrap(), "COM9");
    }

    #[test]
    fn test_bluetooth_not_found() {
        let ports = vec![bt_port("/dev/cu.Other", None)];
        assert!(matches!(
            resolve_bluetooth_port("00:1D:A5:68:98:8B", &ports),
            Err(TransportError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_bluetooth_invalid_target() {
        assert!(matches!(
            resolve_bluetooth_port("not-a-mac", &[]),
            Err(TransportError::InvalidTarget { .. })
        ));
        assert!(matches!(
            resolve_bluetooth_port("", &[]),
            Err(TransportError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn test_usb_port_ignored_for_mac() {
        let mut usb = bt_port("/dev/ttyUSB0-001DA568988B", None);
        usb.port_type = "USB".to_string();
        assert!(resolve_bluetooth_port("00:1D:A5:68:98:8B", &[usb]).is_err());
    }

    #[test]
    fn test_tcp_resolve() {
        let addr = TcpLink::resolve("192.168.0.10:35000").unwrap();
        assert_eq!(addr.port(), 35000);
        assert!(TcpLink::resolve("192.168.0.10").is_err());
        assert!(TcpLink::resolve(":35000").is_err());
        assert!(TcpLink::resolve("192.168.0.10:abc").is_err());
        assert!(TcpLink::resolve("192.168.0.10:0").is_err());
    }
}
