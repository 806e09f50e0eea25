//! Register read capability over a half-duplex Modbus RTU serial link.
//!
//! A source performs exactly one request/response exchange per `poll`
//! call and never retries; retry policy belongs to the acquisition
//! loop, which keeps this layer a thin, testable transport shim.

use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio_modbus::client::{rtu, Context, Reader};
use tokio_modbus::slave::{Slave, SlaveContext};
use tokio_serial::SerialStream;

use crate::error::ProtocolError;
use crate::models::RegisterBlock;

// ---

/// Capability to read a fixed-size block of input registers from one
/// physical device.
#[async_trait]
pub trait RegisterSource: Send {
    /// Read `count` input registers starting at `start_offset` from the
    /// device at `device_address`, waiting at most `timeout` for the
    /// complete response.
    ///
    /// Precondition: `count > 0`; violations fail with
    /// [`ProtocolError::InvalidArgument`] before any I/O.
    async fn poll(
        &mut self,
        device_address: u8,
        start_offset: u16,
        count: u16,
        timeout: Duration,
    ) -> Result<RegisterBlock, ProtocolError>;
}

/// Production source: one owned Modbus RTU context over a serial port.
///
/// The serial handle is exclusive to this source (and therefore to the
/// one acquisition loop that owns it); nothing else may talk on the
/// link.
pub struct ModbusRtuSource {
    device_id: String,
    ctx: Context,
}

impl ModbusRtuSource {
    /// Open the serial port and attach a Modbus RTU client to it.
    pub fn open(device_id: &str, port: &str, baud_rate: u32) -> Result<Self> {
        // ---
        let builder = tokio_serial::new(port, baud_rate);
        let stream = SerialStream::open(&builder)
            .with_context(|| format!("Failed to open serial port '{port}'"))?;

        Ok(ModbusRtuSource {
            device_id: device_id.to_string(),
            ctx: rtu::attach(stream),
        })
    }
}

#[async_trait]
impl RegisterSource for ModbusRtuSource {
    async fn poll(
        &mut self,
        device_address: u8,
        start_offset: u16,
        count: u16,
        timeout: Duration,
    ) -> Result<RegisterBlock, ProtocolError> {
        // ---
        if count == 0 {
            return Err(ProtocolError::InvalidArgument(
                "register count must be > 0".to_string(),
            ));
        }

        self.ctx.set_slave(Slave(device_address));

        // The client returns a nested result: transport faults outside,
        // Modbus exception responses inside.
        let response = tokio::time::timeout(
            timeout,
            self.ctx.read_input_registers(start_offset, count),
        )
        .await
        .map_err(|_| ProtocolError::Timeout(timeout.as_millis()))?;

        let values = response
            .map_err(|e| ProtocolError::Framing(e.to_string()))?
            .map_err(|e| ProtocolError::DeviceNack(e.to_string()))?;

        Ok(RegisterBlock {
            device_id: self.device_id.clone(),
            start_offset,
            values,
            captured_at: Utc::now(),
        })
    }
}
