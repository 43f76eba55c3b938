//! Modbus register sensors published to Zenoh.
//!
//! Each configured sensor reads a block of holding or input registers from a
//! hub (Modbus TCP, RTU over TCP, or serial RTU), decodes the block into a
//! value and publishes a report whenever its state changes.
//!
//! # Decoding
//!
//! Register sensors are decoded through a packed-binary structure: either
//! picked from the data type and register count (`int`, `uint`, `float`,
//! `string`) or written out for `custom` sensors. A single decoded number is
//! scaled, offset and formatted with the configured precision; several values
//! are joined with commas. Bit sensors report one bit of their block.
//!
//! # Key Expressions
//!
//! ```text
//! regsight/modbus/<hub>/<sensor>
//! regsight/modbus/@/status
//! ```

pub mod bits;
pub mod config;
pub mod decode;
pub mod poller;
pub mod sensor;
pub mod setup;
pub mod structure;
pub mod transport;
