//! USB printer-class devices
//!
//! Enumeration walks every attached device's configurations looking for
//! printer-class interfaces (class 7, subclass 1, protocol 1 or 2,
//! preferring 2 — the bidirectional protocol).  The selected interface
//! must expose a bulk OUT endpoint; a bulk IN endpoint is only required
//! for protocol 2.  Each candidate's IEEE 1284 device ID is fetched with
//! the class-specific `GET_DEVICE_ID` request and turned into a
//! canonical `usb://<make>/<model>?serial=<sn>` URI.
//!
//! The descriptor walk, interface selection, and device-ID parsing are
//! transport-independent so they can be exercised against mock
//! descriptor trees; the `usb` cargo feature adds the `rusb`-backed
//! enumeration and bulk transport.

use super::percent_encode;
#[cfg(feature = "usb")]
use crate::error::DeviceError;

/// USB base class for printers
pub const CLASS_PRINTER: u8 = 7;

/// One endpoint of an alternate setting
#[derive(Debug, Clone, Copy)]
pub struct EndpointDesc {
    /// Endpoint address; bit 7 set means device-to-host
    pub address: u8,
    /// Whether this is a bulk endpoint
    pub is_bulk: bool,
}

impl EndpointDesc {
    fn is_input(self) -> bool {
        self.address & 0x80 != 0
    }
}

/// One alternate setting of an interface
#[derive(Debug, Clone)]
pub struct AltSettingDesc {
    /// bInterfaceNumber
    pub interface_number: u8,
    /// bAlternateSetting
    pub alternate_setting: u8,
    /// bInterfaceClass
    pub class: u8,
    /// bInterfaceSubClass
    pub subclass: u8,
    /// bInterfaceProtocol
    pub protocol: u8,
    /// Endpoints of this setting
    pub endpoints: Vec<EndpointDesc>,
}

/// One interface with its alternate settings
#[derive(Debug, Clone, Default)]
pub struct InterfaceDesc {
    /// Alternate settings, in descriptor order
    pub alt_settings: Vec<AltSettingDesc>,
}

/// One device configuration
#[derive(Debug, Clone, Default)]
pub struct ConfigDesc {
    /// bConfigurationValue
    pub value: u8,
    /// Interfaces of this configuration
    pub interfaces: Vec<InterfaceDesc>,
}

/// The printer interface chosen from a device's descriptor tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrinterPort {
    /// bConfigurationValue of the owning configuration
    pub config_value: u8,
    /// Index of the configuration in descriptor order
    pub config_index: u8,
    /// bInterfaceNumber
    pub interface_number: u8,
    /// bAlternateSetting to select
    pub alternate_setting: u8,
    /// How many alternate settings the interface has
    pub num_alt_settings: u8,
    /// 1 = unidirectional, 2 = bidirectional
    pub protocol: u8,
    /// Bulk OUT endpoint address
    pub write_endpoint: u8,
    /// Bulk IN endpoint address, recorded for protocol 2 only
    pub read_endpoint: Option<u8>,
}

/// Pick the best printer-class interface from a descriptor tree
///
/// Bidirectional (protocol 2) interfaces win over unidirectional ones;
/// among equals the first in descriptor order is kept.  Returns `None`
/// when no usable interface exists.
pub fn select_printer_port(configs: &[ConfigDesc]) -> Option<PrinterPort> {
    let mut best: Option<PrinterPort> = None;

    for (config_index, config) in configs.iter().enumerate() {
        for interface in &config.interfaces {
            for alt in &interface.alt_settings {
                if alt.class != CLASS_PRINTER || alt.subclass != 1 {
                    continue;
                }
                if alt.protocol != 1 && alt.protocol != 2 {
                    continue;
                }
                if best.is_some_and(|b| alt.protocol <= b.protocol) {
                    continue;
                }

                let mut write_endpoint = None;
                let mut read_endpoint = None;
                for ep in &alt.endpoints {
                    if !ep.is_bulk {
                        continue;
                    }
                    if ep.is_input() {
                        read_endpoint.get_or_insert(ep.address);
                    } else {
                        write_endpoint.get_or_insert(ep.address);
                    }
                }

                // Bulk OUT is mandatory; bulk IN only matters for the
                // bidirectional protocol.
                let Some(write_endpoint) = write_endpoint else {
                    continue;
                };
                if alt.protocol == 2 && read_endpoint.is_none() {
                    continue;
                }

                best = Some(PrinterPort {
                    config_value: config.value,
                    config_index: config_index as u8,
                    interface_number: alt.interface_number,
                    alternate_setting: alt.alternate_setting,
                    num_alt_settings: interface.alt_settings.len() as u8,
                    protocol: alt.protocol,
                    write_endpoint,
                    read_endpoint: (alt.protocol == 2).then_some(read_endpoint).flatten(),
                });
            }
        }
    }

    best
}

/// Fields parsed from an IEEE 1284 device ID string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId {
    /// `MANUFACTURER`/`MFG` value, `Unknown` when absent
    pub make: String,
    /// `MODEL`/`MDL` value, `Unknown` when absent
    pub model: String,
    /// `SERIALNUMBER`/`SERN`/`SN` value, if present
    pub serial: Option<String>,
}

impl DeviceId {
    /// Parse the `KEY:value;` pairs of a 1284 device ID
    pub fn parse(id: &str) -> DeviceId {
        let mut make = None;
        let mut model = None;
        let mut serial = None;

        for field in id.split(';') {
            let Some((key, value)) = field.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key.trim().to_ascii_uppercase().as_str() {
                "MANUFACTURER" | "MFG" => make.get_or_insert_with(|| value.to_string()),
                "MODEL" | "MDL" => model.get_or_insert_with(|| value.to_string()),
                "SERIALNUMBER" | "SERN" | "SN" => serial.get_or_insert_with(|| value.to_string()),
                _ => continue,
            };
        }

        DeviceId {
            make: make.unwrap_or_else(|| "Unknown".to_string()),
            model: model.unwrap_or_else(|| "Unknown".to_string()),
            serial,
        }
    }

    /// Assemble the canonical device URI for this ID
    ///
    /// `fallback_serial` supplies the USB serial-number string
    /// descriptor for devices whose 1284 ID omits the serial field.
    pub fn to_uri(&self, fallback_serial: Option<&str>) -> String {
        let serial = self
            .serial
            .as_deref()
            .or(fallback_serial)
            .filter(|s| !s.is_empty());

        match serial {
            Some(serial) => format!(
                "usb://{}/{}?serial={}",
                percent_encode(&self.make),
                percent_encode(&self.model),
                percent_encode(serial)
            ),
            None => format!(
                "usb://{}/{}",
                percent_encode(&self.make),
                percent_encode(&self.model)
            ),
        }
    }
}

/// Decode the length-prefixed `GET_DEVICE_ID` reply
///
/// The first two bytes carry the total length; some printers put it in
/// the wrong byte order, so an implausible big-endian value falls back
/// to little-endian.
pub fn decode_device_id(raw: &[u8]) -> String {
    if raw.len() < 2 {
        return String::new();
    }

    let mut length = usize::from(raw[0]) << 8 | usize::from(raw[1]);
    if length < 14 || length > raw.len() {
        length = usize::from(raw[1]) << 8 | usize::from(raw[0]);
    }
    length = length.clamp(2, raw.len());

    String::from_utf8_lossy(&raw[2..length])
        .trim_end_matches('\0')
        .to_string()
}

#[cfg(feature = "usb")]
pub use real::{list_devices, open};

#[cfg(not(feature = "usb"))]
pub(super) fn open(
    _uri: &super::DeviceUri,
) -> Result<Box<dyn super::Transport>, crate::error::DeviceError> {
    Err(crate::error::DeviceError::Unavailable(
        "built without USB support".into(),
    ))
}

#[cfg(feature = "usb")]
mod real {
    //! rusb-backed enumeration and bulk transport

    use std::time::Duration;

    use rusb::{Context, DeviceHandle, UsbContext};
    use tracing::{debug, warn};

    use super::super::{DeviceUri, Transport};
    use super::{decode_device_id, select_printer_port, AltSettingDesc, ConfigDesc, DeviceError, DeviceId, EndpointDesc, InterfaceDesc, PrinterPort};

    /// Control transfer timeout for `GET_DEVICE_ID`
    const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

    /// List attached printer-class devices
    ///
    /// The callback receives each candidate's canonical URI; returning
    /// `true` commits that device and stops the walk, returning its
    /// open transport.
    pub fn list_devices<F>(mut callback: F) -> Result<Option<Box<dyn Transport>>, DeviceError>
    where
        F: FnMut(&str) -> bool,
    {
        let context = Context::new()?;

        for device in context.devices()?.iter() {
            let Ok(descriptor) = device.device_descriptor() else {
                continue;
            };
            if descriptor.num_configurations() == 0
                || descriptor.vendor_id() == 0
                || descriptor.product_id() == 0
            {
                continue;
            }

            // Mirror the descriptor tree and pick the printer interface.
            let mut configs = Vec::new();
            for index in 0..descriptor.num_configurations() {
                let Ok(config) = device.config_descriptor(index) else {
                    continue;
                };
                let mut interfaces = Vec::new();
                for interface in config.interfaces() {
                    let mut alt_settings = Vec::new();
                    for alt in interface.descriptors() {
                        alt_settings.push(AltSettingDesc {
                            interface_number: alt.interface_number(),
                            alternate_setting: alt.setting_number(),
                            class: alt.class_code(),
                            subclass: alt.sub_class_code(),
                            protocol: alt.protocol_code(),
                            endpoints: alt
                                .endpoint_descriptors()
                                .map(|ep| EndpointDesc {
                                    address: ep.address(),
                                    is_bulk: ep.transfer_type() == rusb::TransferType::Bulk,
                                })
                                .collect(),
                        });
                    }
                    interfaces.push(InterfaceDesc { alt_settings });
                }
                configs.push(ConfigDesc {
                    value: config.number(),
                    interfaces,
                });
            }

            let Some(port) = select_printer_port(&configs) else {
                continue;
            };

            let handle = match device.open() {
                Ok(handle) => handle,
                Err(e) => {
                    debug!(error = %e, "unable to open USB device");
                    continue;
                }
            };

            match setup_and_identify(&handle, &descriptor, port) {
                Ok(uri) => {
                    if callback(&uri) {
                        debug!(%uri, "committed USB device");
                        return Ok(Some(Box::new(UsbTransport {
                            handle,
                            interface_number: port.interface_number,
                            write_endpoint: port.write_endpoint,
                            read_endpoint: port.read_endpoint,
                        })));
                    }
                    let _ = handle.release_interface(port.interface_number);
                }
                Err(e) => {
                    debug!(error = %e, "unable to identify USB printer");
                }
            }
        }

        Ok(None)
    }

    /// Open the device matching a stored `usb://` URI
    pub fn open(uri: &DeviceUri) -> Result<Box<dyn Transport>, DeviceError> {
        let DeviceUri::Usb { make, model, serial } = uri else {
            return Err(DeviceError::BadUri(uri.to_string()));
        };

        let found = list_devices(|candidate| {
            match candidate.parse::<DeviceUri>() {
                Ok(DeviceUri::Usb {
                    make: cmake,
                    model: cmodel,
                    serial: cserial,
                }) => {
                    cmake == *make
                        && cmodel == *model
                        && (serial.is_none() || cserial == *serial)
                }
                _ => false,
            }
        })?;

        found.ok_or_else(|| DeviceError::Unavailable(format!("no USB device matches {uri}")))
    }

    fn setup_and_identify(
        handle: &DeviceHandle<Context>,
        descriptor: &rusb::DeviceDescriptor,
        port: PrinterPort,
    ) -> Result<String, DeviceError> {
        let _ = handle.set_auto_detach_kernel_driver(true);

        let current = handle.active_configuration().unwrap_or(0);
        if current != port.config_value {
            handle.set_active_configuration(port.config_value)?;
        }

        handle.claim_interface(port.interface_number)?;

        if port.num_alt_settings > 1 {
            if let Err(e) =
                handle.set_alternate_setting(port.interface_number, port.alternate_setting)
            {
                let _ = handle.release_interface(port.interface_number);
                return Err(e.into());
            }
        }

        // Class-specific GET_DEVICE_ID on the claimed interface.
        let mut raw = [0u8; 1024];
        let request_type = rusb::request_type(
            rusb::Direction::In,
            rusb::RequestType::Class,
            rusb::Recipient::Interface,
        );
        let index = (u16::from(port.interface_number) << 8) | u16::from(port.alternate_setting);
        let n = handle.read_control(
            request_type,
            0,
            u16::from(port.config_index),
            index,
            &mut raw,
            CONTROL_TIMEOUT,
        )?;

        let device_id = decode_device_id(&raw[..n]);
        let parsed = DeviceId::parse(&device_id);

        let fallback = handle
            .read_serial_number_string_ascii(descriptor)
            .ok()
            .filter(|s| !s.is_empty());

        Ok(parsed.to_uri(fallback.as_deref()))
    }

    struct UsbTransport {
        handle: DeviceHandle<Context>,
        interface_number: u8,
        write_endpoint: u8,
        read_endpoint: Option<u8>,
    }

    impl Transport for UsbTransport {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
            let Some(endpoint) = self.read_endpoint else {
                return Ok(0);
            };
            // Infinite timeout: the printer flow-controls us.
            Ok(self.handle.read_bulk(endpoint, buf, Duration::ZERO)?)
        }

        fn write_all(&mut self, mut data: &[u8]) -> Result<(), DeviceError> {
            while !data.is_empty() {
                let written = self
                    .handle
                    .write_bulk(self.write_endpoint, data, Duration::ZERO)?;
                if written == 0 {
                    return Err(DeviceError::IncompleteWrite {
                        written: 0,
                        expected: data.len(),
                    });
                }
                data = &data[written..];
            }
            Ok(())
        }
    }

    impl Drop for UsbTransport {
        fn drop(&mut self) {
            if let Err(e) = self.handle.release_interface(self.interface_number) {
                warn!(error = %e, "unable to release USB interface");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn printer_alt(number: u8, protocol: u8, with_in: bool) -> AltSettingDesc {
        let mut endpoints = vec![EndpointDesc {
            address: 0x01,
            is_bulk: true,
        }];
        if with_in {
            endpoints.push(EndpointDesc {
                address: 0x82,
                is_bulk: true,
            });
        }
        AltSettingDesc {
            interface_number: number,
            alternate_setting: 0,
            class: CLASS_PRINTER,
            subclass: 1,
            protocol,
            endpoints,
        }
    }

    #[test]
    fn prefers_bidirectional_protocol() {
        // Two printer-class interfaces on one device; protocol 2 wins.
        let configs = [ConfigDesc {
            value: 1,
            interfaces: vec![
                InterfaceDesc {
                    alt_settings: vec![printer_alt(0, 1, false)],
                },
                InterfaceDesc {
                    alt_settings: vec![printer_alt(1, 2, true)],
                },
            ],
        }];

        let port = select_printer_port(&configs).unwrap();
        assert_eq!(port.protocol, 2);
        assert_eq!(port.interface_number, 1);
        assert_eq!(port.write_endpoint, 0x01);
        assert_eq!(port.read_endpoint, Some(0x82));
    }

    #[test]
    fn unidirectional_needs_no_read_endpoint() {
        let configs = [ConfigDesc {
            value: 1,
            interfaces: vec![InterfaceDesc {
                alt_settings: vec![printer_alt(0, 1, false)],
            }],
        }];

        let port = select_printer_port(&configs).unwrap();
        assert_eq!(port.protocol, 1);
        assert_eq!(port.read_endpoint, None);
    }

    #[test]
    fn protocol_2_requires_bulk_in() {
        let configs = [ConfigDesc {
            value: 1,
            interfaces: vec![
                InterfaceDesc {
                    alt_settings: vec![printer_alt(0, 2, false)],
                },
                InterfaceDesc {
                    alt_settings: vec![printer_alt(1, 1, false)],
                },
            ],
        }];

        // The protocol-2 setting lacks a bulk IN endpoint, so the
        // unidirectional interface is chosen instead.
        let port = select_printer_port(&configs).unwrap();
        assert_eq!(port.protocol, 1);
        assert_eq!(port.interface_number, 1);
    }

    #[test]
    fn ignores_non_printer_interfaces() {
        let mut alt = printer_alt(0, 2, true);
        alt.class = 8; // mass storage
        let configs = [ConfigDesc {
            value: 1,
            interfaces: vec![InterfaceDesc {
                alt_settings: vec![alt],
            }],
        }];
        assert!(select_printer_port(&configs).is_none());
    }

    #[test]
    fn device_id_field_priority() {
        let id = DeviceId::parse("MFG:Aux;MANUFACTURER:Zebra Technologies;MDL:ZD420;SN:99J1;");
        assert_eq!(id.make, "Zebra Technologies");
        assert_eq!(id.model, "ZD420");
        assert_eq!(id.serial.as_deref(), Some("99J1"));

        let id = DeviceId::parse("MFG:Acme;MDL:Widget;");
        assert_eq!(id.make, "Acme");
        assert_eq!(id.serial, None);

        let id = DeviceId::parse("MDL:Widget;");
        assert_eq!(id.make, "Unknown");
    }

    #[test]
    fn serial_descriptor_fallback() {
        // 1284 ID without a serial field; the string descriptor fills
        // the gap.
        let id = DeviceId::parse("MFG:Acme;MDL:Widget;CMD:ESCPOS;");
        assert_eq!(id.to_uri(Some("ABC123")), "usb://Acme/Widget?serial=ABC123");
        assert_eq!(id.to_uri(None), "usb://Acme/Widget");
    }

    #[test]
    fn uri_is_percent_encoded() {
        let id = DeviceId::parse("MFG:Zijiang;MDL:POS58 Printer;");
        assert_eq!(id.to_uri(None), "usb://Zijiang/POS58%20Printer");
    }

    #[test]
    fn device_id_length_prefix() {
        // Big-endian length prefix.
        let mut raw = vec![0u8, 16];
        raw.extend_from_slice(b"MFG:Acme;\0\0\0\0\0");
        assert_eq!(decode_device_id(&raw), "MFG:Acme;");

        // Swapped prefix still decodes.
        let mut raw = vec![16u8, 0];
        raw.extend_from_slice(b"MFG:Acme;\0\0\0\0\0");
        assert_eq!(decode_device_id(&raw), "MFG:Acme;");
    }
}
